//! Procedure registry and dispatch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::constants::{actions, ACK_TOKEN};
use crate::error::{Result, WorkerError};
use crate::queue::{ControlCommand, InternalQueue, QueueElement};
use crate::rpc::frame::{CallRequest, ControlFrame, ProcedureArgs};
use crate::rpc::procedure::ProcedureHandler;

/// Registry of named procedure handlers plus the origin of control-plane
/// queue elements.
///
/// The registry is owned by this one dispatcher instance and shared by
/// reference with the endpoint hosting it; there is no process-wide
/// registry. Inbound calls on the reserved `"control"` name do not invoke a
/// handler at all: their pre-serialized payload is unwrapped into a
/// `ControlElement` and enqueued into the internal queue, ahead of all
/// queued data by class ordering.
///
/// # Examples
///
/// ```rust
/// use dataflow_worker::queue::InternalQueue;
/// use dataflow_worker::rpc::{procedure, ProcedureArgs, ProcedureDispatcher};
/// use serde_json::{json, Value};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() {
///     let queue = Arc::new(InternalQueue::new());
///     let dispatcher = ProcedureDispatcher::new(Arc::clone(&queue));
///
///     dispatcher
///         .register("add", Arc::new(procedure(|args: ProcedureArgs| {
///             let a = args.arg(0).and_then(Value::as_i64).unwrap_or(0);
///             let b = args.arg(1).and_then(Value::as_i64).unwrap_or(0);
///             Ok(json!(a + b))
///         })))
///         .await
///         .unwrap();
/// }
/// ```
pub struct ProcedureDispatcher {
    procedures: RwLock<HashMap<String, Arc<dyn ProcedureHandler>>>,
    queue: Arc<InternalQueue>,
    calls_dispatched: AtomicU64,
    calls_failed: AtomicU64,
}

impl ProcedureDispatcher {
    pub fn new(queue: Arc<InternalQueue>) -> Self {
        Self {
            procedures: RwLock::new(HashMap::new()),
            queue,
            calls_dispatched: AtomicU64::new(0),
            calls_failed: AtomicU64::new(0),
        }
    }

    /// Register a handler under a name. Re-registering an existing name
    /// fails with `AlreadyRegistered` rather than silently masking a
    /// duplicate-registration bug; the reserved system action names are
    /// pre-claimed and rejected the same way.
    pub async fn register(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn ProcedureHandler>,
    ) -> Result<()> {
        let name = name.into();

        if matches!(
            name.as_str(),
            actions::CONTROL | actions::HEALTHCHECK | actions::SHUTDOWN
        ) {
            return Err(WorkerError::AlreadyRegistered(name));
        }

        let mut procedures = self.procedures.write().await;
        if procedures.contains_key(&name) {
            warn!(procedure = %name, "Rejecting duplicate procedure registration");
            return Err(WorkerError::AlreadyRegistered(name));
        }

        info!(procedure = %name, "Registered procedure");
        procedures.insert(name, handler);
        Ok(())
    }

    pub async fn has_procedure(&self, name: &str) -> bool {
        self.procedures.read().await.contains_key(name)
    }

    pub async fn registered_procedures(&self) -> Vec<String> {
        self.procedures.read().await.keys().cloned().collect()
    }

    /// Route one inbound call and produce the serialized response body.
    ///
    /// Reserved `"control"` calls enqueue a `ControlElement` and answer
    /// with the ack token; everything else resolves through the registry.
    /// Handler failures are mapped to `RemoteExecutionError` and propagate
    /// to the caller unmodified, never swallowed or retried here.
    pub async fn dispatch(&self, request: &CallRequest) -> Result<Vec<u8>> {
        let start = std::time::Instant::now();
        debug!(
            procedure = %request.procedure,
            call_id = %request.call_id,
            "Dispatching call"
        );

        let result = if request.procedure == actions::CONTROL {
            self.dispatch_control(&request.payload)
        } else {
            self.dispatch_procedure(&request.procedure, &request.payload)
                .await
        };

        let execution_time = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => {
                self.calls_dispatched.fetch_add(1, Ordering::Relaxed);
                debug!(
                    procedure = %request.procedure,
                    call_id = %request.call_id,
                    time_ms = execution_time,
                    "Call dispatched"
                );
            }
            Err(e) => {
                self.calls_failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    procedure = %request.procedure,
                    call_id = %request.call_id,
                    error = %e,
                    time_ms = execution_time,
                    "Call failed"
                );
            }
        }

        result
    }

    /// The control channel: unwrap the pre-serialized control frame and
    /// enqueue it. At-most-once per call by construction — one frame, one
    /// `put`.
    fn dispatch_control(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let frame: ControlFrame = serde_json::from_slice(payload).map_err(|e| {
            WorkerError::TypeMismatch(format!(
                "control payload is not a wrapped control frame: {e}"
            ))
        })?;

        self.queue.put(QueueElement::ControlElement {
            command: ControlCommand::new(frame.command),
            sender_id: frame.sender_id,
        });

        Ok(ACK_TOKEN.as_bytes().to_vec())
    }

    async fn dispatch_procedure(&self, name: &str, payload: &[u8]) -> Result<Vec<u8>> {
        let handler = {
            let procedures = self.procedures.read().await;
            procedures
                .get(name)
                .cloned()
                .ok_or_else(|| WorkerError::NotFound(name.to_string()))?
        };

        let args = ProcedureArgs::from_payload(payload)?;

        let value = handler
            .invoke(args)
            .await
            .map_err(|e| WorkerError::RemoteExecutionError {
                procedure: name.to_string(),
                message: format!("{e:#}"),
            })?;

        serialize_result(&value)
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            calls_dispatched: self.calls_dispatched.load(Ordering::Relaxed),
            calls_failed: self.calls_failed.load(Ordering::Relaxed),
        }
    }
}

/// Serialize exactly one resulting value as response bytes. Strings travel
/// as their raw text (the ack token is `b"ack"`, not `b"\"ack\""`); every
/// other value is its JSON rendering.
fn serialize_result(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::String(s) => Ok(s.clone().into_bytes()),
        other => serde_json::to_vec(other)
            .map_err(|e| WorkerError::TransportError(format!("failed to encode result: {e}"))),
    }
}

/// Dispatch counters for observability.
#[derive(Debug, Clone)]
pub struct DispatcherStats {
    pub calls_dispatched: u64,
    pub calls_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::procedure::{ack, procedure};
    use serde_json::json;

    fn dispatcher() -> (Arc<InternalQueue>, ProcedureDispatcher) {
        let queue = Arc::new(InternalQueue::new());
        let dispatcher = ProcedureDispatcher::new(Arc::clone(&queue));
        (queue, dispatcher)
    }

    fn call(procedure_name: &str, args: ProcedureArgs) -> CallRequest {
        CallRequest::new(procedure_name, args.to_payload().unwrap())
    }

    #[tokio::test]
    async fn test_register_and_invoke_add() {
        let (_queue, dispatcher) = dispatcher();

        dispatcher
            .register(
                "add",
                Arc::new(procedure(|args: ProcedureArgs| {
                    let a = args.arg(0).and_then(Value::as_i64).unwrap_or(0);
                    let b = args.arg(1).and_then(Value::as_i64).unwrap_or(0);
                    Ok(json!(a + b))
                })),
            )
            .await
            .unwrap();
        assert!(dispatcher.has_procedure("add").await);

        let request = call("add", ProcedureArgs::positional(vec![json!(1), json!(2)]));
        let body = dispatcher.dispatch(&request).await.unwrap();
        assert_eq!(body, b"3");
    }

    #[tokio::test]
    async fn test_string_results_travel_as_raw_text() {
        let (_queue, dispatcher) = dispatcher();

        dispatcher
            .register(
                "echo",
                Arc::new(procedure(|args: ProcedureArgs| {
                    Ok(args.arg(0).cloned().unwrap_or(Value::Null))
                })),
            )
            .await
            .unwrap();

        let request = call("echo", ProcedureArgs::positional(vec![json!("hello")]));
        let body = dispatcher.dispatch(&request).await.unwrap();
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn test_missing_procedure_is_not_found() {
        let (_queue, dispatcher) = dispatcher();

        let request = call("missing", ProcedureArgs::default());
        let result = dispatcher.dispatch(&request).await;
        assert!(matches!(result, Err(WorkerError::NotFound(name)) if name == "missing"));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let (_queue, dispatcher) = dispatcher();

        let handler = || Arc::new(procedure(|_args| Ok(Value::Null)));
        dispatcher.register("hello", handler()).await.unwrap();

        let result = dispatcher.register("hello", handler()).await;
        assert!(matches!(result, Err(WorkerError::AlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn test_reserved_names_rejected_at_registration() {
        let (_queue, dispatcher) = dispatcher();

        for name in [actions::CONTROL, actions::HEALTHCHECK, actions::SHUTDOWN] {
            let result = dispatcher
                .register(name, Arc::new(procedure(|_args| Ok(Value::Null))))
                .await;
            assert!(matches!(result, Err(WorkerError::AlreadyRegistered(_))));
        }
    }

    #[tokio::test]
    async fn test_handler_failure_propagates() {
        let (_queue, dispatcher) = dispatcher();

        dispatcher
            .register(
                "div",
                Arc::new(procedure(|args: ProcedureArgs| {
                    let a = args.arg(0).and_then(Value::as_i64).unwrap_or(0);
                    let b = args.arg(1).and_then(Value::as_i64).unwrap_or(0);
                    if b == 0 {
                        anyhow::bail!("division by zero");
                    }
                    Ok(json!(a / b))
                })),
            )
            .await
            .unwrap();

        let request = call("div", ProcedureArgs::positional(vec![json!(1), json!(0)]));
        match dispatcher.dispatch(&request).await {
            Err(WorkerError::RemoteExecutionError { procedure, message }) => {
                assert_eq!(procedure, "div");
                assert!(message.contains("division by zero"));
            }
            other => panic!("expected RemoteExecutionError, got {other:?}"),
        }
        assert_eq!(dispatcher.stats().calls_failed, 1);
    }

    #[tokio::test]
    async fn test_ack_wrapped_handler_always_acks() {
        let (_queue, dispatcher) = dispatcher();

        dispatcher
            .register(
                "i_need_an_ack",
                Arc::new(ack(procedure(|_args| Ok(json!("random output"))))),
            )
            .await
            .unwrap();

        let request = call(
            "i_need_an_ack",
            ProcedureArgs::positional(vec![json!("some input")]),
        );
        let body = dispatcher.dispatch(&request).await.unwrap();
        assert_eq!(body, b"ack");
    }

    #[tokio::test]
    async fn test_control_call_enqueues_ahead_of_data() {
        let (queue, dispatcher) = dispatcher();

        queue.put(QueueElement::InputTuple {
            payload: json!({ "id": 1 }),
        });
        queue.put(QueueElement::EndMarker);

        let frame = ControlFrame {
            command: json!({ "name": "pause" }),
            sender_id: "controller".to_string(),
        };
        let request = CallRequest::new(actions::CONTROL, serde_json::to_vec(&frame).unwrap());

        let body = dispatcher.dispatch(&request).await.unwrap();
        assert_eq!(body, b"ack");

        // The control element bypasses the two earlier data elements.
        match queue.get().await {
            QueueElement::ControlElement { command, sender_id } => {
                assert_eq!(command.body, json!({ "name": "pause" }));
                assert_eq!(sender_id, "controller");
            }
            other => panic!("expected ControlElement first, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bare_control_payload_is_type_mismatch() {
        let (queue, dispatcher) = dispatcher();

        // Not a wrapped control frame.
        let request = CallRequest::new(actions::CONTROL, b"\"pause\"".to_vec());
        let result = dispatcher.dispatch(&request).await;
        assert!(matches!(result, Err(WorkerError::TypeMismatch(_))));
        assert!(queue.is_empty());
    }
}
