//! # System Constants
//!
//! Core constants that define the operational boundaries of the worker:
//! reserved RPC action names, the acknowledgement token, and default
//! timing/sizing values shared between configuration and components.

/// Reserved RPC action names handled uniformly by any endpoint hosting the
/// procedure dispatcher. User procedures may not register under these names.
pub mod actions {
    /// Distinguished control channel. The payload is opaque bytes produced
    /// by the orchestrator protocol, not argument-serialized by the caller.
    pub const CONTROL: &str = "control";

    /// Liveness probe. Returns the fixed acknowledgement, no state change.
    pub const HEALTHCHECK: &str = "healthcheck";

    /// Graceful teardown. Acknowledges first, then tears down the endpoint
    /// after the response has been sent.
    pub const SHUTDOWN: &str = "shutdown";
}

/// Fixed acknowledgement token returned by ack-wrapped handlers and the
/// reserved system actions.
pub const ACK_TOKEN: &str = "ack";

/// Default timing and sizing values.
pub mod defaults {
    /// Accept/receive timeout for receiver loops, in milliseconds. This
    /// bounds how long a stopped receiver can remain blocked before it
    /// re-checks its run flag.
    pub const RECEIVE_TIMEOUT_MS: u64 = 100;

    /// Client-side RPC call timeout in milliseconds.
    pub const CALL_TIMEOUT_MS: u64 = 1000;

    /// Graceful shutdown window for open connections, in milliseconds.
    pub const GRACEFUL_SHUTDOWN_TIMEOUT_MS: u64 = 500;

    /// Default bind host for worker endpoints.
    pub const BIND_HOST: &str = "127.0.0.1";

    /// Default inbound data-plane port.
    pub const INPUT_PORT: u16 = 5555;

    /// Default RPC (control-plane) port.
    pub const RPC_PORT: u16 = 5005;
}
