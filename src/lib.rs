#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

//! # Dataflow Worker
//!
//! Worker-side execution runtime for a distributed dataflow engine.
//!
//! ## Overview
//!
//! A worker node multiplexes two planes of traffic through one typed,
//! stable, priority-ordered internal queue: the data plane (input tuples
//! and the markers that delimit them) and the control plane (orchestrator
//! commands). Control elements always dequeue ahead of queued data while
//! each plane preserves its own arrival order, so a command like "pause"
//! takes effect before any backlog drains, yet data never reorders.
//!
//! ## Architecture
//!
//! - [`queue`] - Stable priority queue and the typed internal queue
//! - [`execution`] - Cancellable tasks and the data-plane network receiver
//! - [`rpc`] - Call frames, procedure dispatcher, endpoint, and client
//! - [`worker`] - The single-consumer processing loop and operator seam
//! - [`config`] - Worker configuration from defaults and environment
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured tracing initialization
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dataflow_worker::config::WorkerConfig;
//! use dataflow_worker::execution::{NetworkReceiver, ReceiverConfig};
//! use dataflow_worker::queue::InternalQueue;
//! use dataflow_worker::rpc::{ProcedureDispatcher, RpcServer, RpcServerConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WorkerConfig::from_env()?;
//! let queue = Arc::new(InternalQueue::new());
//!
//! // Data plane: frames arriving on the input port land in the queue.
//! let receiver = NetworkReceiver::bind(
//!     ReceiverConfig {
//!         bind_address: config.input_bind_address(),
//!         receive_timeout_ms: config.receive_timeout_ms,
//!     },
//!     Arc::clone(&queue),
//! )
//! .await?;
//!
//! // Control plane: procedure calls and control commands over RPC.
//! let dispatcher = Arc::new(ProcedureDispatcher::new(Arc::clone(&queue)));
//! let server = RpcServer::new(RpcServerConfig::default(), dispatcher);
//! server.start().await?;
//! # let _ = receiver;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod execution;
pub mod logging;
pub mod queue;
pub mod rpc;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{Result, WorkerError};
pub use execution::{CancellableTask, NetworkReceiver, ReceiverConfig};
pub use queue::{ControlCommand, InternalQueue, PriorityClass, QueueElement, StablePriorityQueue};
pub use rpc::{ProcedureDispatcher, RpcClient, RpcServer, RpcServerConfig};
pub use worker::{ControlHandler, Operator, Worker, WorkerSummary};
