//! TCP endpoint hosting the procedure dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::constants::{actions, defaults, ACK_TOKEN};
use crate::error::{Result, WorkerError};
use crate::rpc::dispatcher::ProcedureDispatcher;
use crate::rpc::frame::{CallRequest, CallResponse};

/// RPC endpoint configuration.
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub bind_address: String,
    pub graceful_shutdown_timeout_ms: u64,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("{}:{}", defaults::BIND_HOST, defaults::RPC_PORT),
            graceful_shutdown_timeout_ms: defaults::GRACEFUL_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

/// Mutable endpoint state shared with the accept loop.
#[derive(Debug)]
struct ServerState {
    running: bool,
    started_at: Option<DateTime<Utc>>,
    total_connections: u64,
}

/// Endpoint counters for observability.
#[derive(Debug, Clone)]
pub struct RpcServerStats {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub total_connections: u64,
}

/// Line-delimited JSON call endpoint.
///
/// Accepts connections, reads one [`CallRequest`] per line, and answers
/// each with exactly one [`CallResponse`] line. The reserved actions
/// `healthcheck` and `shutdown` are answered here without consulting the
/// dispatcher registry; everything else — including the reserved
/// `control` channel — routes through the [`ProcedureDispatcher`].
///
/// Call handling is sequential per connection and concurrent across
/// connections, each connection in its own spawned task.
pub struct RpcServer {
    config: RpcServerConfig,
    dispatcher: Arc<ProcedureDispatcher>,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
    local_addr: RwLock<Option<SocketAddr>>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, dispatcher: Arc<ProcedureDispatcher>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            dispatcher,
            state: Arc::new(RwLock::new(ServerState {
                running: false,
                started_at: None,
                total_connections: 0,
            })),
            shutdown_tx,
            local_addr: RwLock::new(None),
        }
    }

    /// Bind the endpoint and spawn the accept loop. Returns the bound
    /// address, which is the configured one unless port 0 requested an
    /// ephemeral port.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut state = self.state.write().await;
        if state.running {
            return Err(WorkerError::ShutdownInProgress(
                "RPC endpoint is already running".to_string(),
            ));
        }

        let listener = TcpListener::bind(&self.config.bind_address)
            .await
            .map_err(|e| {
                WorkerError::TransportError(format!(
                    "failed to bind RPC endpoint {}: {e}",
                    self.config.bind_address
                ))
            })?;
        let addr = listener
            .local_addr()
            .map_err(|e| WorkerError::TransportError(format!("failed to read local addr: {e}")))?;
        *self.local_addr.write().await = Some(addr);

        state.running = true;
        state.started_at = Some(Utc::now());
        drop(state);

        info!(address = %addr, "RPC endpoint listening");

        let dispatcher = Arc::clone(&self.dispatcher);
        let state = Arc::clone(&self.state);
        let shutdown_tx = self.shutdown_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                debug!(%peer, "Accepted RPC connection");
                                {
                                    let mut state = state.write().await;
                                    state.total_connections += 1;
                                }
                                let dispatcher = Arc::clone(&dispatcher);
                                let conn_shutdown_tx = shutdown_tx.clone();
                                let conn_shutdown_rx = shutdown_tx.subscribe();
                                tokio::spawn(async move {
                                    handle_connection(
                                        stream,
                                        peer,
                                        dispatcher,
                                        conn_shutdown_tx,
                                        conn_shutdown_rx,
                                    )
                                    .await;
                                });
                            }
                            Err(e) => {
                                // Transient accept failures never take the
                                // endpoint down.
                                warn!(error = %e, "RPC accept failed");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("RPC accept loop shutting down");
                        break;
                    }
                }
            }
            state.write().await.running = false;
        });

        Ok(addr)
    }

    /// Signal shutdown and allow in-flight calls a bounded drain window.
    pub async fn stop(&self) {
        info!("Stopping RPC endpoint");
        let _ = self.shutdown_tx.send(());
        tokio::time::sleep(Duration::from_millis(self.config.graceful_shutdown_timeout_ms)).await;
        self.state.write().await.running = false;
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.running
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read().await
    }

    pub async fn stats(&self) -> RpcServerStats {
        let state = self.state.read().await;
        RpcServerStats {
            running: state.running,
            started_at: state.started_at,
            total_connections: state.total_connections,
        }
    }
}

/// Serve one connection: one request line in, one response line out, in
/// order, until the peer disconnects or shutdown is signaled.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<ProcedureDispatcher>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        tokio::select! {
            read = reader.read_line(&mut line) => {
                match read {
                    Ok(0) => {
                        debug!(%peer, "RPC peer disconnected");
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        let request: CallRequest = match serde_json::from_str(trimmed) {
                            Ok(request) => request,
                            Err(e) => {
                                warn!(%peer, error = %e, "Dropping malformed call frame");
                                continue;
                            }
                        };

                        let shutdown_requested = request.procedure == actions::SHUTDOWN;
                        let response = answer(&dispatcher, &request).await;
                        if let Err(e) = write_response(&mut write_half, &response).await {
                            warn!(%peer, error = %e, "Failed to write RPC response");
                            break;
                        }

                        if shutdown_requested {
                            info!(%peer, "Shutdown requested over RPC");
                            let _ = shutdown_tx.send(());
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(%peer, error = %e, "RPC read failed");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!(%peer, "RPC connection closing on shutdown");
                break;
            }
        }
    }
}

/// Produce the single response frame for one call. Reserved system
/// actions are acked directly; all other names route through the
/// dispatcher.
async fn answer(dispatcher: &ProcedureDispatcher, request: &CallRequest) -> CallResponse {
    match request.procedure.as_str() {
        actions::HEALTHCHECK | actions::SHUTDOWN => {
            CallResponse::success(request.call_id.clone(), ACK_TOKEN.as_bytes().to_vec())
        }
        _ => match dispatcher.dispatch(request).await {
            Ok(body) => CallResponse::success(request.call_id.clone(), body),
            Err(e) => CallResponse::failure(request.call_id.clone(), &e),
        },
    }
}

async fn write_response(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    response: &CallResponse,
) -> Result<()> {
    let mut frame = serde_json::to_vec(response)
        .map_err(|e| WorkerError::TransportError(format!("failed to encode response: {e}")))?;
    frame.push(b'\n');
    write_half
        .write_all(&frame)
        .await
        .map_err(|e| WorkerError::TransportError(format!("failed to write response: {e}")))?;
    write_half
        .flush()
        .await
        .map_err(|e| WorkerError::TransportError(format!("failed to flush response: {e}")))?;
    Ok(())
}
