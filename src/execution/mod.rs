pub mod cancellable_task;
pub mod network_receiver;

pub use cancellable_task::{CancellableTask, TaskContext};
pub use network_receiver::{NetworkReceiver, ReceiverConfig};
