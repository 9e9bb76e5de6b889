//! Task Handler Registry
//!
//! Maps the handler names used in a physical plan (e.g. "tokenize", "count") to the async
//! closures implementing those stages, so the runtime stays generic over user code.

use super::context::TaskContext;
use crate::error::{RuntimeError, RuntimeResult};

use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type alias for a thread-safe, asynchronous stage handler.
/// It receives the attempt's `TaskContext` and resolves to `anyhow::Result<()>`.
pub type TaskHandlerFn = Arc<
    dyn Fn(Arc<TaskContext>) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

/// Registry holding the mapping between handler names and their implementation.
pub struct TaskHandlerRegistry {
    handlers: DashMap<String, TaskHandlerFn>,
}

impl TaskHandlerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a handler under `handler_name`, replacing any previous one.
    pub fn register<F, Fut>(&self, handler_name: &str, handler: F)
    where
        F: Fn(Arc<TaskContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        // Box::pin erases the concrete future type so different handlers share one map.
        let handler_fn: TaskHandlerFn = Arc::new(move |ctx: Arc<TaskContext>| {
            Box::pin(handler(ctx)) as Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        });

        self.handlers.insert(handler_name.to_string(), handler_fn);

        tracing::info!("Registered task handler: {}", handler_name);
    }

    /// Runs the handler registered under `handler_name`.
    ///
    /// Handler errors that wrap a `RuntimeError` keep their kind; any other error becomes
    /// `TaskExecution`.
    pub async fn execute(&self, handler_name: &str, ctx: Arc<TaskContext>) -> RuntimeResult<()> {
        // Clone out of the map so no shard lock is held while the handler runs.
        let handler_fn = self
            .handlers
            .get(handler_name)
            .map(|entry| entry.value().clone());

        let Some(handler_fn) = handler_fn else {
            tracing::error!("Unknown task handler: {}", handler_name);
            return Err(RuntimeError::UnknownHandler(handler_name.to_string()));
        };

        tracing::debug!(
            "Executing {} attempt {} with handler '{}'",
            ctx.task_group(),
            ctx.attempt(),
            handler_name
        );
        handler_fn(ctx).await.map_err(RuntimeError::from_handler_error)
    }

    pub fn list_handlers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn has_handler(&self, handler_name: &str) -> bool {
        self.handlers.contains_key(handler_name)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for TaskHandlerRegistry {
    fn default() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }
}
