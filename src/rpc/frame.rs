//! RPC wire frames.
//!
//! Calls and responses travel as newline-delimited JSON, one frame per
//! line. A call names a procedure and carries an opaque payload; exactly
//! one response frame answers each call.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, WorkerError};

/// One remote procedure call.
///
/// For ordinary procedures the payload is the JSON serialization of
/// [`ProcedureArgs`]. For the reserved control channel the payload is
/// pre-serialized by the orchestrator protocol and passes through the
/// client untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    /// Unique identifier correlating the response frame to this call.
    pub call_id: String,

    /// Registered procedure name, or a reserved system action.
    pub procedure: String,

    /// Opaque payload bytes.
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl CallRequest {
    pub fn new(procedure: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            call_id: Uuid::new_v4().to_string(),
            procedure: procedure.into(),
            payload,
        }
    }
}

/// Positional and keyword arguments for an ordinary procedure call.
/// Arity is handler-defined; the dispatcher never inspects the contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcedureArgs {
    #[serde(default)]
    pub args: Vec<Value>,

    #[serde(default)]
    pub kwargs: HashMap<String, Value>,
}

impl ProcedureArgs {
    pub fn positional(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: HashMap::new(),
        }
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    /// Positional argument by index.
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn to_payload(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| WorkerError::TransportError(format!("failed to encode arguments: {e}")))
    }

    /// Decode a call payload. An empty payload means a zero-argument call.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(payload)
            .map_err(|e| WorkerError::TransportError(format!("malformed argument payload: {e}")))
    }
}

/// Decoded body of a reserved control-channel call: the opaque command
/// plus the identity it is attributed to. The orchestrator serializes
/// this itself; the dispatcher only unwraps it into a `ControlElement`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlFrame {
    pub command: Value,
    pub sender_id: String,
}

/// Exactly one response frame per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResponse {
    /// `call_id` of the call this answers.
    pub call_id: String,

    pub success: bool,

    /// Serialized result value on success, empty on failure.
    #[serde(default)]
    pub body: Vec<u8>,

    pub error: Option<CallErrorInfo>,
}

/// Error detail carried across the wire so the client can reconstruct the
/// failure variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallErrorInfo {
    pub kind: String,
    pub message: String,
}

impl CallResponse {
    pub fn success(call_id: String, body: Vec<u8>) -> Self {
        Self {
            call_id,
            success: true,
            body,
            error: None,
        }
    }

    pub fn failure(call_id: String, error: &WorkerError) -> Self {
        Self {
            call_id,
            success: false,
            body: Vec::new(),
            error: Some(CallErrorInfo {
                kind: error.kind().to_string(),
                message: error.to_string(),
            }),
        }
    }

    /// Convert to the caller-facing result, mapping the wire error kind
    /// back onto the error taxonomy.
    pub fn into_result(self, procedure: &str) -> Result<Vec<u8>> {
        if self.success {
            return Ok(self.body);
        }

        let info = self.error.unwrap_or(CallErrorInfo {
            kind: "transport_error".to_string(),
            message: "response carried no error detail".to_string(),
        });

        Err(match info.kind.as_str() {
            "not_found" => WorkerError::NotFound(procedure.to_string()),
            "already_registered" => WorkerError::AlreadyRegistered(procedure.to_string()),
            "remote_execution_error" => WorkerError::RemoteExecutionError {
                procedure: procedure.to_string(),
                message: info.message,
            },
            "type_mismatch" => WorkerError::TypeMismatch(info.message),
            "shutdown_in_progress" => WorkerError::ShutdownInProgress(info.message),
            _ => WorkerError::TransportError(info.message),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_round_trip() {
        let args = ProcedureArgs::positional(vec![json!(1), json!(2)]);
        let request = CallRequest::new("add", args.to_payload().unwrap());

        let line = serde_json::to_string(&request).unwrap();
        let back: CallRequest = serde_json::from_str(&line).unwrap();

        assert_eq!(back.procedure, "add");
        assert_eq!(ProcedureArgs::from_payload(&back.payload).unwrap(), args);
    }

    #[test]
    fn test_empty_payload_is_zero_arguments() {
        let args = ProcedureArgs::from_payload(b"").unwrap();
        assert!(args.args.is_empty());
        assert!(args.kwargs.is_empty());
    }

    #[test]
    fn test_error_response_maps_back_to_variant() {
        let err = WorkerError::NotFound("missing".to_string());
        let response = CallResponse::failure("c1".to_string(), &err);
        assert!(!response.success);

        let result = response.into_result("missing");
        assert!(matches!(result, Err(WorkerError::NotFound(name)) if name == "missing"));
    }

    #[test]
    fn test_remote_execution_error_keeps_message() {
        let err = WorkerError::RemoteExecutionError {
            procedure: "div".to_string(),
            message: "division by zero".to_string(),
        };
        let response = CallResponse::failure("c2".to_string(), &err);

        match response.into_result("div") {
            Err(WorkerError::RemoteExecutionError { message, .. }) => {
                assert!(message.contains("division by zero"));
            }
            other => panic!("expected RemoteExecutionError, got {other:?}"),
        }
    }
}
