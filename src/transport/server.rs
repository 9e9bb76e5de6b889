use super::protocol::{self, PartitionRequest, ResponseStatus};
use crate::config::TransportConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::shuffle::store::BlockStore;
use crate::shuffle::types::BlockId;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Serves committed blocks of the local `BlockStore` to remote fetchers.
///
/// A fixed set of accept loops hands connections to a fixed pool of workers. Each worker
/// serves one connection at a time until the peer closes it or it sits idle for
/// `connection_idle_timeout_ms`.
pub struct PartitionTransportServer {
    local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Clone, Copy)]
struct ConnectionSettings {
    idle_timeout: Duration,
    max_frame_bytes: u32,
}

impl PartitionTransportServer {
    pub async fn start(
        bind_ip: IpAddr,
        config: &TransportConfig,
        store: Arc<dyn BlockStore>,
    ) -> RuntimeResult<Self> {
        let addr = SocketAddr::new(bind_ip, config.port);
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket
            .bind(addr)
            .map_err(|e| RuntimeError::Io(format!("failed to bind {}: {}", addr, e)))?;
        let listener = Arc::new(socket.listen(config.backlog)?);
        let local_addr = listener.local_addr()?;

        let (conn_tx, conn_rx) = mpsc::channel::<TcpStream>(config.backlog as usize);
        let conn_rx = Arc::new(Mutex::new(conn_rx));
        let settings = ConnectionSettings {
            idle_timeout: config.connection_idle_timeout(),
            max_frame_bytes: config.max_frame_bytes,
        };

        let mut tasks = Vec::with_capacity(config.num_listening_threads + config.num_working_threads);
        for id in 0..config.num_listening_threads {
            tasks.push(tokio::spawn(accept_loop(id, listener.clone(), conn_tx.clone())));
        }
        drop(conn_tx);
        for id in 0..config.num_working_threads {
            tasks.push(tokio::spawn(worker_loop(
                id,
                conn_rx.clone(),
                store.clone(),
                settings,
            )));
        }

        tracing::info!(
            "Partition transport listening on {} ({} acceptors, {} workers)",
            local_addr,
            config.num_listening_threads,
            config.num_working_threads
        );

        Ok(Self { local_addr, tasks })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and closes every connection currently being served.
    pub fn shutdown(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        tracing::info!("Partition transport on {} stopped", self.local_addr);
    }
}

impl Drop for PartitionTransportServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(id: usize, listener: Arc<TcpListener>, conn_tx: mpsc::Sender<TcpStream>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::trace!("Acceptor {} accepted {}", id, peer);
                let _ = stream.set_nodelay(true);
                if conn_tx.send(stream).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("Acceptor {} failed to accept: {}", id, e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn worker_loop(
    id: usize,
    conn_rx: Arc<Mutex<mpsc::Receiver<TcpStream>>>,
    store: Arc<dyn BlockStore>,
    settings: ConnectionSettings,
) {
    loop {
        let next = {
            let mut rx = conn_rx.lock().await;
            rx.recv().await
        };
        let Some(stream) = next else {
            break;
        };

        if let Err(e) = serve_connection(stream, store.as_ref(), settings).await {
            tracing::debug!("Worker {} dropped connection: {}", id, e);
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    store: &dyn BlockStore,
    settings: ConnectionSettings,
) -> RuntimeResult<()> {
    loop {
        let read = tokio::time::timeout(
            settings.idle_timeout,
            protocol::read_request(&mut stream, settings.max_frame_bytes),
        )
        .await;

        let request = match read {
            Err(_) => return Ok(()),
            Ok(Ok(None)) => return Ok(()),
            Ok(Ok(Some(request))) => request,
            Ok(Err(e)) => {
                let empty: [&[u8]; 0] = [];
                protocol::write_response(&mut stream, ResponseStatus::BadRequest, &empty).await?;
                return Err(e);
            }
        };

        if let Err(e) = request.validate(settings.max_frame_bytes) {
            tracing::debug!("Rejected request: {}", e);
            let empty: [&[u8]; 0] = [];
            protocol::write_response(&mut stream, ResponseStatus::BadRequest, &empty).await?;
            continue;
        }

        match lookup(store, &request).await {
            Some(blocks) => {
                protocol::write_response(&mut stream, ResponseStatus::Ok, &blocks).await?;
            }
            None => {
                let empty: [&[u8]; 0] = [];
                protocol::write_response(&mut stream, ResponseStatus::NotFound, &empty).await?;
            }
        }
    }
}

/// Every block of the requested span, or `None` if any of them is missing.
async fn lookup(store: &dyn BlockStore, request: &PartitionRequest) -> Option<Vec<Arc<[u8]>>> {
    let mut blocks = Vec::new();
    for sub_range in request.span.range() {
        let id = BlockId::new(request.producer, sub_range);
        match store.get(&id).await {
            Ok(Some(block)) => blocks.push(block),
            Ok(None) => {
                tracing::debug!("Requested block {} is not available", id);
                return None;
            }
            Err(e) => {
                tracing::error!("Failed to read block {}: {}", id, e);
                return None;
            }
        }
    }
    Some(blocks)
}
