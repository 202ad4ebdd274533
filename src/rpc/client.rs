//! Synchronous request/response client over the line-delimited call
//! protocol.

use std::collections::HashSet;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::constants::{actions, defaults};
use crate::error::{Result, WorkerError};
use crate::rpc::frame::{CallRequest, CallResponse, ProcedureArgs};

/// Client side of the call protocol.
///
/// One call at a time per client: each [`call`](Self::call) writes one
/// request frame and blocks until its matching response frame arrives or
/// the per-call timeout elapses. On timeout the call fails but the
/// connection stays open for subsequent calls; the timed-out call's id is
/// remembered so its late response frame, if it ever arrives, is discarded
/// instead of being misread as the answer to a later call.
pub struct RpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
    closed: bool,
    timed_out_calls: HashSet<String>,
}

impl RpcClient {
    /// Connect to an RPC endpoint with the default call timeout.
    pub async fn connect(addr: impl AsRef<str>) -> Result<Self> {
        Self::connect_with_timeout(addr, defaults::CALL_TIMEOUT_MS).await
    }

    pub async fn connect_with_timeout(addr: impl AsRef<str>, timeout_ms: u64) -> Result<Self> {
        let addr = addr.as_ref();
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| WorkerError::TransportError(format!("failed to connect {addr}: {e}")))?;
        let (read_half, write_half) = stream.into_split();
        debug!(%addr, timeout_ms, "Connected RPC client");

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout: Duration::from_millis(timeout_ms),
            closed: false,
            timed_out_calls: HashSet::new(),
        })
    }

    /// Invoke a named procedure with structured arguments.
    pub async fn call(&mut self, procedure: &str, args: ProcedureArgs) -> Result<Vec<u8>> {
        let payload = args.to_payload()?;
        self.roundtrip(CallRequest::new(procedure, payload)).await
    }

    /// Send a pre-serialized payload down the reserved control channel.
    /// The payload passes through unmodified; the endpoint unwraps it
    /// into a control element.
    pub async fn call_control(&mut self, payload: Vec<u8>) -> Result<Vec<u8>> {
        self.roundtrip(CallRequest::new(actions::CONTROL, payload))
            .await
    }

    /// Probe endpoint liveness.
    pub async fn healthcheck(&mut self) -> Result<Vec<u8>> {
        self.roundtrip(CallRequest::new(actions::HEALTHCHECK, Vec::new()))
            .await
    }

    /// Request endpoint teardown.
    pub async fn shutdown(&mut self) -> Result<Vec<u8>> {
        self.roundtrip(CallRequest::new(actions::SHUTDOWN, Vec::new()))
            .await
    }

    async fn roundtrip(&mut self, request: CallRequest) -> Result<Vec<u8>> {
        if self.closed {
            return Err(WorkerError::ShutdownInProgress(
                "RPC client is closed".to_string(),
            ));
        }

        let mut frame = serde_json::to_vec(&request)
            .map_err(|e| WorkerError::TransportError(format!("failed to encode call: {e}")))?;
        frame.push(b'\n');
        self.writer
            .write_all(&frame)
            .await
            .map_err(|e| WorkerError::TransportError(format!("failed to write call: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| WorkerError::TransportError(format!("failed to flush call: {e}")))?;

        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut line = String::new();
        loop {
            line.clear();
            let read = tokio::time::timeout_at(deadline, self.reader.read_line(&mut line))
                .await
                .map_err(|_| {
                    // Remember the id so the late response frame, when it
                    // finally arrives, is skipped rather than correlated
                    // against a later call.
                    self.timed_out_calls.insert(request.call_id.clone());
                    WorkerError::Timeout {
                        procedure: request.procedure.clone(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                })?
                .map_err(|e| {
                    WorkerError::TransportError(format!("failed to read response: {e}"))
                })?;

            if read == 0 {
                return Err(WorkerError::TransportError(
                    "connection closed before response".to_string(),
                ));
            }

            let response: CallResponse = serde_json::from_str(line.trim()).map_err(|e| {
                WorkerError::TransportError(format!("malformed response frame: {e}"))
            })?;

            if self.timed_out_calls.remove(&response.call_id) {
                debug!(
                    call_id = %response.call_id,
                    "Discarding late response for a timed-out call"
                );
                continue;
            }

            if response.call_id != request.call_id {
                warn!(
                    expected = %request.call_id,
                    received = %response.call_id,
                    "Response correlation mismatch"
                );
                return Err(WorkerError::TransportError(format!(
                    "response call_id {} does not match call {}",
                    response.call_id, request.call_id
                )));
            }

            return response.into_result(&request.procedure);
        }
    }

    /// Close the client. Further calls fail with `ShutdownInProgress`.
    pub async fn close(&mut self) {
        self.closed = true;
        let _ = self.writer.shutdown().await;
    }
}
