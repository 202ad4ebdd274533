//! Data-plane network receiver.
//!
//! One receiver per upstream link: a [`CancellableTask`] bound to a local
//! TCP endpoint that accepts connections, decodes newline-delimited JSON
//! frames into queue elements, and pushes them into the shared
//! [`InternalQueue`]. A malformed or unrecognized frame is logged and
//! dropped at message granularity; it never terminates the receiver.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::constants::defaults;
use crate::error::{Result, WorkerError};
use crate::execution::cancellable_task::{CancellableTask, TaskContext};
use crate::queue::InternalQueue;

/// Network receiver configuration.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// TCP bind address (e.g. "127.0.0.1:5555"). Port 0 binds an
    /// OS-assigned port, reported by [`NetworkReceiver::local_addr`].
    pub bind_address: String,

    /// Accept timeout in milliseconds. The accept loop re-checks its run
    /// flag at least once per timeout even with no inbound traffic, which
    /// bounds how long `join()` can take after `stop()`.
    pub receive_timeout_ms: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("{}:{}", defaults::BIND_HOST, defaults::INPUT_PORT),
            receive_timeout_ms: defaults::RECEIVE_TIMEOUT_MS,
        }
    }
}

/// A cancellable receiver task feeding the internal queue from one local
/// network endpoint.
///
/// # Examples
///
/// ```rust,no_run
/// use dataflow_worker::execution::{NetworkReceiver, ReceiverConfig};
/// use dataflow_worker::queue::InternalQueue;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let queue = Arc::new(InternalQueue::new());
///     let config = ReceiverConfig {
///         bind_address: "127.0.0.1:0".to_string(),
///         ..ReceiverConfig::default()
///     };
///
///     let receiver = NetworkReceiver::bind(config, Arc::clone(&queue)).await?;
///     // ... peers connect and send frames ...
///     receiver.stop();
///     receiver.join().await?;
///     Ok(())
/// }
/// ```
pub struct NetworkReceiver {
    task: CancellableTask,
    local_addr: SocketAddr,
    connections_accepted: Arc<AtomicU64>,
}

impl NetworkReceiver {
    /// Bind the listener and start the accept loop.
    pub async fn bind(config: ReceiverConfig, queue: Arc<InternalQueue>) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_address).await.map_err(|e| {
            WorkerError::TransportError(format!(
                "failed to bind receiver to {}: {e}",
                config.bind_address
            ))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| WorkerError::TransportError(format!("failed to read local addr: {e}")))?;

        info!(addr = %local_addr, "NetworkReceiver listening");

        let accept_timeout = Duration::from_millis(config.receive_timeout_ms);
        let connections_accepted = Arc::new(AtomicU64::new(0));
        let accepted = Arc::clone(&connections_accepted);

        let task = CancellableTask::spawn(format!("network-receiver-{local_addr}"), {
            move |ctx| accept_loop(listener, queue, accept_timeout, accepted, ctx)
        });

        Ok(Self {
            task,
            local_addr,
            connections_accepted,
        })
    }

    /// The bound endpoint, useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run flag value; cleared by `stop()` or natural loop exit.
    pub fn running(&self) -> bool {
        self.task.running()
    }

    /// Whether the accept loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Total connections accepted since bind.
    pub fn connections_accepted(&self) -> u64 {
        self.connections_accepted.load(Ordering::Relaxed)
    }

    /// Request a cooperative stop. The accept loop exits after at most one
    /// further accept cycle; open connection handlers are signalled too.
    pub fn stop(&self) {
        self.task.stop();
    }

    /// Wait for the accept loop to exit.
    pub async fn join(&self) -> Result<()> {
        self.task.join().await
    }
}

async fn accept_loop(
    listener: TcpListener,
    queue: Arc<InternalQueue>,
    accept_timeout: Duration,
    connections_accepted: Arc<AtomicU64>,
    mut ctx: TaskContext,
) {
    let (conn_shutdown_tx, _) = broadcast::channel(16);

    while ctx.running() {
        tokio::select! {
            _ = ctx.cancelled() => {
                break;
            }

            accepted = tokio::time::timeout(accept_timeout, listener.accept()) => {
                match accepted {
                    // Timeout: no traffic this cycle, re-check the run flag.
                    Err(_) => continue,

                    Ok(Ok((stream, addr))) => {
                        let connection_id = uuid::Uuid::new_v4().to_string();
                        connections_accepted.fetch_add(1, Ordering::Relaxed);
                        debug!(connection = %connection_id, peer = %addr, "Accepted data-plane connection");

                        let queue = Arc::clone(&queue);
                        let shutdown_rx = conn_shutdown_tx.subscribe();
                        tokio::spawn(async move {
                            handle_connection(connection_id, stream, queue, shutdown_rx).await;
                        });
                    }

                    // A failed accept never terminates the receiver.
                    Ok(Err(e)) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                }
            }
        }
    }

    // Signal open connection handlers; they exit on their next read cycle.
    let _ = conn_shutdown_tx.send(());
    info!("NetworkReceiver accept loop shutting down");
}

/// Read newline-delimited JSON frames from one connection and push each
/// decoded element into the internal queue. Decode failures are contained
/// at message granularity.
async fn handle_connection(
    connection_id: String,
    stream: TcpStream,
    queue: Arc<InternalQueue>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (reader, _writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        tokio::select! {
            read_result = buf_reader.read_line(&mut line) => {
                match read_result {
                    Ok(0) => {
                        debug!(connection = %connection_id, "Connection closed by peer");
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if !trimmed.is_empty() {
                            match serde_json::from_str::<serde_json::Value>(trimmed) {
                                Ok(value) => {
                                    if let Err(e) = queue.put_value(value) {
                                        warn!(
                                            connection = %connection_id,
                                            error = %e,
                                            "Dropping unrecognized frame"
                                        );
                                    }
                                }
                                Err(e) => {
                                    warn!(
                                        connection = %connection_id,
                                        error = %e,
                                        "Dropping malformed frame"
                                    );
                                }
                            }
                        }
                        line.clear();
                    }
                    Err(e) => {
                        error!(connection = %connection_id, error = %e, "Read failed, dropping connection");
                        break;
                    }
                }
            }

            _ = shutdown_rx.recv() => {
                debug!(connection = %connection_id, "Connection handler shutting down");
                break;
            }
        }
    }
}
