//! Structured error handling for the worker core.
//!
//! One taxonomy covers the whole crate: queue element classification,
//! procedure dispatch, network transport, and task lifecycle. Transport
//! failures are contained at the connection/message granularity; dispatch
//! failures cross the RPC boundary to the caller; classification failures
//! are caller bugs and fail fast.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// A value outside the legal queue element variants was offered to the
    /// internal queue. Programming-error class, never retried.
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// An RPC call named a procedure that is not registered.
    #[error("Procedure not found: {0}")]
    NotFound(String),

    /// A procedure name was registered twice on the same dispatcher.
    #[error("Procedure already registered: {0}")]
    AlreadyRegistered(String),

    /// A registered handler failed during invocation. Propagated to the
    /// caller verbatim, never swallowed server-side.
    #[error("Remote execution error in '{procedure}': {message}")]
    RemoteExecutionError { procedure: String, message: String },

    /// Connection or frame failure. Recovered locally inside receiver loops.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// An RPC call exceeded its configured wait.
    #[error("Call timed out after {timeout_ms}ms: {procedure}")]
    Timeout { procedure: String, timeout_ms: u64 },

    /// Operation attempted after stop/close on a task, endpoint, or client.
    #[error("Shutdown in progress: {0}")]
    ShutdownInProgress(String),

    /// Invalid startup configuration.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl WorkerError {
    /// Stable machine-readable tag used in response frames so the client
    /// side can reconstruct the variant across the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::TypeMismatch(_) => "type_mismatch",
            WorkerError::NotFound(_) => "not_found",
            WorkerError::AlreadyRegistered(_) => "already_registered",
            WorkerError::RemoteExecutionError { .. } => "remote_execution_error",
            WorkerError::TransportError(_) => "transport_error",
            WorkerError::Timeout { .. } => "timeout",
            WorkerError::ShutdownInProgress(_) => "shutdown_in_progress",
            WorkerError::ConfigurationError(_) => "configuration_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;
