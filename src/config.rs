//! Worker configuration.
//!
//! Defaults are suitable for local development; every field can be
//! overridden from the environment at startup (`WORKER_*` variables).

use crate::constants::defaults;
use crate::error::{Result, WorkerError};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Host the worker binds its endpoints to.
    pub bind_host: String,
    /// Inbound data-plane port (the network receiver listens here).
    pub input_port: u16,
    /// RPC port (the procedure dispatcher endpoint listens here).
    pub rpc_port: u16,
    /// Accept/receive timeout for receiver loops, in milliseconds. Bounds
    /// how long a stop request can go unobserved.
    pub receive_timeout_ms: u64,
    /// Client-side RPC call timeout in milliseconds.
    pub call_timeout_ms: u64,
    /// Graceful shutdown window for open connections, in milliseconds.
    pub graceful_shutdown_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bind_host: defaults::BIND_HOST.to_string(),
            input_port: defaults::INPUT_PORT,
            rpc_port: defaults::RPC_PORT,
            receive_timeout_ms: defaults::RECEIVE_TIMEOUT_MS,
            call_timeout_ms: defaults::CALL_TIMEOUT_MS,
            graceful_shutdown_timeout_ms: defaults::GRACEFUL_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("WORKER_BIND_HOST") {
            config.bind_host = host;
        }

        if let Ok(port) = std::env::var("WORKER_INPUT_PORT") {
            config.input_port = port.parse().map_err(|e| {
                WorkerError::ConfigurationError(format!("Invalid input_port: {e}"))
            })?;
        }

        if let Ok(port) = std::env::var("WORKER_RPC_PORT") {
            config.rpc_port = port
                .parse()
                .map_err(|e| WorkerError::ConfigurationError(format!("Invalid rpc_port: {e}")))?;
        }

        if let Ok(timeout) = std::env::var("WORKER_RECEIVE_TIMEOUT_MS") {
            config.receive_timeout_ms = timeout.parse().map_err(|e| {
                WorkerError::ConfigurationError(format!("Invalid receive_timeout_ms: {e}"))
            })?;
        }

        if let Ok(timeout) = std::env::var("WORKER_CALL_TIMEOUT_MS") {
            config.call_timeout_ms = timeout.parse().map_err(|e| {
                WorkerError::ConfigurationError(format!("Invalid call_timeout_ms: {e}"))
            })?;
        }

        if let Ok(timeout) = std::env::var("WORKER_GRACEFUL_SHUTDOWN_TIMEOUT_MS") {
            config.graceful_shutdown_timeout_ms = timeout.parse().map_err(|e| {
                WorkerError::ConfigurationError(format!(
                    "Invalid graceful_shutdown_timeout_ms: {e}"
                ))
            })?;
        }

        Ok(config)
    }

    /// Bind address for the data-plane receiver.
    pub fn input_bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.input_port)
    }

    /// Bind address for the RPC endpoint.
    pub fn rpc_bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.rpc_port)
    }
}
