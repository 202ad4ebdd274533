//! Name-dispatched remote procedures over the control plane.
//!
//! The orchestrator drives the worker through named procedures. A
//! [`ProcedureDispatcher`] owns the registry and originates control
//! elements for the reserved `"control"` channel; [`RpcServer`] hosts the
//! dispatcher on a TCP endpoint; [`RpcClient`] is the caller side.

pub mod client;
pub mod dispatcher;
pub mod frame;
pub mod procedure;
pub mod server;

pub use client::RpcClient;
pub use dispatcher::{DispatcherStats, ProcedureDispatcher};
pub use frame::{CallErrorInfo, CallRequest, CallResponse, ControlFrame, ProcedureArgs};
pub use procedure::{ack, procedure, AckProcedure, FnProcedure, ProcedureHandler};
pub use server::{RpcServer, RpcServerConfig, RpcServerStats};
