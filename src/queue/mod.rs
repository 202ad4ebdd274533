//! Message ordering and control/data multiplexing.
//!
//! The queue layer merges the worker's data plane and control plane into a
//! single consumption order: control elements always dequeue ahead of data,
//! and elements of the same class dequeue in the order their producers
//! enqueued them.

pub mod internal_queue;
pub mod stable_priority_queue;

pub use internal_queue::{ControlCommand, InternalQueue, PriorityClass, QueueElement};
pub use stable_priority_queue::StablePriorityQueue;
