use super::job::JobMaster;
use super::protocol::*;
use crate::cluster::types::ExecutorId;
use crate::error::RuntimeError;

use axum::{
    Extension, Json, Router,
    extract::Path,
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;

/// Routes of the master's HTTP surface.
pub fn router(master: Arc<JobMaster>) -> Router {
    Router::new()
        .route(ENDPOINT_EXECUTORS, get(handle_list_executors))
        .route(ENDPOINT_REGISTER, post(handle_register_executor))
        .route(ENDPOINT_DEREGISTER, post(handle_deregister_executor))
        .route(ENDPOINT_HEARTBEAT, post(handle_executor_heartbeat))
        .route(ENDPOINT_JOB_STATUS, get(handle_job_status))
        .layer(Extension(master))
}

pub async fn handle_list_executors(
    Extension(master): Extension<Arc<JobMaster>>,
) -> (StatusCode, Json<ExecutorsResponse>) {
    let capacity = master.membership().capacity();
    let executors = master
        .membership()
        .alive_executors()
        .into_iter()
        .map(|member| ExecutorView {
            used_slots: capacity.usage(&member.id).map_or(0, |usage| usage.used),
            id: member.id.0,
            state: member.state,
            endpoint: member.endpoint,
            capacity: member.capacity,
        })
        .collect();

    (StatusCode::OK, Json(ExecutorsResponse { executors }))
}

pub async fn handle_register_executor(
    Extension(master): Extension<Arc<JobMaster>>,
    Json(req): Json<RegisterExecutorRequest>,
) -> (StatusCode, Json<RegistrationResponse>) {
    if req.capacity == 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(RegistrationResponse {
                success: false,
                error: Some("capacity must be at least 1".to_string()),
            }),
        );
    }

    match master.register_executor(ExecutorId(req.id), req.capacity, req.endpoint) {
        Ok(()) => (
            StatusCode::OK,
            Json(RegistrationResponse {
                success: true,
                error: None,
            }),
        ),
        Err(e) => {
            tracing::error!("Failed to register executor: {}", e);
            let status = match e {
                RuntimeError::DuplicateExecutor(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(RegistrationResponse {
                    success: false,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_deregister_executor(
    Extension(master): Extension<Arc<JobMaster>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<RegistrationResponse>) {
    match master.deregister_executor(&ExecutorId(id)) {
        Ok(()) => (
            StatusCode::OK,
            Json(RegistrationResponse {
                success: true,
                error: None,
            }),
        ),
        Err(e) => {
            tracing::error!("Failed to deregister executor: {}", e);
            let status = match e {
                RuntimeError::UnknownExecutor(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(RegistrationResponse {
                    success: false,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_executor_heartbeat(
    Extension(master): Extension<Arc<JobMaster>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<RegistrationResponse>) {
    let id = ExecutorId(id);
    if master.membership().heartbeat(&id) {
        (
            StatusCode::OK,
            Json(RegistrationResponse {
                success: true,
                error: None,
            }),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(RegistrationResponse {
                success: false,
                error: Some(format!("executor {} is not registered", id)),
            }),
        )
    }
}

pub async fn handle_job_status(
    Extension(master): Extension<Arc<JobMaster>>,
) -> (StatusCode, Json<JobStatusResponse>) {
    match master.latest_job_status() {
        Some(status) => (
            StatusCode::OK,
            Json(JobStatusResponse {
                status: Some(status),
            }),
        ),
        None => (StatusCode::NOT_FOUND, Json(JobStatusResponse { status: None })),
    }
}
