//! Single-consumer processing loop over the internal queue.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::queue::{ControlCommand, InternalQueue, QueueElement};

/// Data-plane processing logic plugged into the worker loop.
///
/// Implementations receive one tuple at a time, in dequeue order, and may
/// emit any number of output tuples per input.
#[async_trait::async_trait]
pub trait Operator: Send + Sync {
    /// Process one input tuple, producing zero or more outputs.
    async fn process_tuple(&self, tuple: Value) -> Result<Vec<Value>>;

    /// Called when one upstream link is exhausted. Operators that buffer
    /// per-link state flush it here.
    async fn on_input_exhausted(&self) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
}

/// Control-plane callback seam. Invoked for every control element the
/// loop dequeues, before any further data is processed.
#[async_trait::async_trait]
pub trait ControlHandler: Send + Sync {
    async fn handle_control(&self, command: ControlCommand, sender_id: &str) -> Result<()>;
}

/// Control handler that only logs. Sufficient for workers whose control
/// plane lives entirely behind the RPC dispatcher.
pub struct LoggingControlHandler;

#[async_trait::async_trait]
impl ControlHandler for LoggingControlHandler {
    async fn handle_control(&self, command: ControlCommand, sender_id: &str) -> Result<()> {
        info!(%sender_id, body = %command.body, "Control command received");
        Ok(())
    }
}

/// Aggregate counts from one completed worker run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub tuples_processed: u64,
    pub tuples_emitted: u64,
    pub tuples_failed: u64,
    pub controls_handled: u64,
    pub links_exhausted: u64,
}

/// The worker: the single consumer of the internal queue.
///
/// Dequeues until an `EndOfAllMarker` arrives, which is the only way the
/// loop terminates normally. Because the queue is stable and
/// control-first, the loop observes every control command queued before
/// the final marker, then stops deterministically.
pub struct Worker<O: Operator, C: ControlHandler> {
    queue: Arc<InternalQueue>,
    operator: O,
    control_handler: C,
    current_link: Option<String>,
    outputs: Vec<Value>,
}

impl<O: Operator> Worker<O, LoggingControlHandler> {
    pub fn new(queue: Arc<InternalQueue>, operator: O) -> Self {
        Self::with_control_handler(queue, operator, LoggingControlHandler)
    }
}

impl<O: Operator, C: ControlHandler> Worker<O, C> {
    pub fn with_control_handler(queue: Arc<InternalQueue>, operator: O, control_handler: C) -> Self {
        Self {
            queue,
            operator,
            control_handler,
            current_link: None,
            outputs: Vec::new(),
        }
    }

    /// Run to completion.
    ///
    /// A failing tuple is counted and skipped; operator failures never
    /// tear the loop down, because producers upstream keep feeding the
    /// queue regardless.
    pub async fn run(&mut self) -> WorkerSummary {
        let mut summary = WorkerSummary::default();
        info!("Worker loop started");

        loop {
            match self.queue.get().await {
                QueueElement::InputTuple { payload } => {
                    summary.tuples_processed += 1;
                    match self.operator.process_tuple(payload).await {
                        Ok(outputs) => {
                            summary.tuples_emitted += outputs.len() as u64;
                            self.outputs.extend(outputs);
                        }
                        Err(e) => {
                            summary.tuples_failed += 1;
                            warn!(link = ?self.current_link, error = %e, "Tuple failed");
                        }
                    }
                }
                QueueElement::ControlElement { command, sender_id } => {
                    summary.controls_handled += 1;
                    if let Err(e) = self
                        .control_handler
                        .handle_control(command, &sender_id)
                        .await
                    {
                        warn!(%sender_id, error = %e, "Control handler failed");
                    }
                }
                QueueElement::SenderChangeMarker { link_id } => {
                    debug!(%link_id, "Switching upstream link");
                    self.current_link = Some(link_id);
                }
                QueueElement::EndMarker => {
                    summary.links_exhausted += 1;
                    debug!(link = ?self.current_link, "Upstream link exhausted");
                    match self.operator.on_input_exhausted().await {
                        Ok(outputs) => {
                            summary.tuples_emitted += outputs.len() as u64;
                            self.outputs.extend(outputs);
                        }
                        Err(e) => {
                            warn!(link = ?self.current_link, error = %e, "Flush failed");
                        }
                    }
                }
                QueueElement::EndOfAllMarker => {
                    info!(
                        tuples = summary.tuples_processed,
                        controls = summary.controls_handled,
                        "All upstream links exhausted, worker loop done"
                    );
                    break;
                }
            }
        }

        summary
    }

    /// Outputs accumulated so far, drained.
    pub fn take_outputs(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Doubler;

    #[async_trait::async_trait]
    impl Operator for Doubler {
        async fn process_tuple(&self, tuple: Value) -> Result<Vec<Value>> {
            let n = tuple
                .as_i64()
                .ok_or_else(|| WorkerError::TypeMismatch(format!("not a number: {tuple}")))?;
            Ok(vec![json!(n * 2)])
        }

        async fn on_input_exhausted(&self) -> Result<Vec<Value>> {
            Ok(vec![json!("flushed")])
        }
    }

    struct RecordingControlHandler {
        seen: Mutex<Vec<(Value, String)>>,
    }

    #[async_trait::async_trait]
    impl ControlHandler for RecordingControlHandler {
        async fn handle_control(&self, command: ControlCommand, sender_id: &str) -> Result<()> {
            self.seen.lock().push((command.body, sender_id.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_worker_processes_until_end_of_all() {
        let queue = Arc::new(InternalQueue::new());
        queue.put(QueueElement::SenderChangeMarker {
            link_id: "link-0".to_string(),
        });
        queue.put(QueueElement::InputTuple { payload: json!(1) });
        queue.put(QueueElement::InputTuple { payload: json!(2) });
        queue.put(QueueElement::EndMarker);
        queue.put(QueueElement::EndOfAllMarker);

        let mut worker = Worker::new(Arc::clone(&queue), Doubler);
        let summary = worker.run().await;

        assert_eq!(summary.tuples_processed, 2);
        assert_eq!(summary.tuples_failed, 0);
        assert_eq!(summary.links_exhausted, 1);
        assert_eq!(
            worker.take_outputs(),
            vec![json!(2), json!(4), json!("flushed")]
        );
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_failing_tuple_skipped_not_fatal() {
        let queue = Arc::new(InternalQueue::new());
        queue.put(QueueElement::InputTuple { payload: json!(1) });
        queue.put(QueueElement::InputTuple {
            payload: json!("oops"),
        });
        queue.put(QueueElement::InputTuple { payload: json!(3) });
        queue.put(QueueElement::EndOfAllMarker);

        let mut worker = Worker::new(Arc::clone(&queue), Doubler);
        let summary = worker.run().await;

        assert_eq!(summary.tuples_processed, 3);
        assert_eq!(summary.tuples_failed, 1);
        assert_eq!(worker.take_outputs(), vec![json!(2), json!(6)]);
    }

    #[tokio::test]
    async fn test_control_handled_before_queued_data() {
        let queue = Arc::new(InternalQueue::new());
        queue.put(QueueElement::InputTuple { payload: json!(1) });
        queue.put(QueueElement::ControlElement {
            command: ControlCommand::new(json!({ "name": "pause" })),
            sender_id: "controller".to_string(),
        });
        queue.put(QueueElement::EndOfAllMarker);

        let handler = RecordingControlHandler {
            seen: Mutex::new(Vec::new()),
        };
        let mut worker = Worker::with_control_handler(Arc::clone(&queue), Doubler, handler);
        let summary = worker.run().await;

        assert_eq!(summary.controls_handled, 1);
        let seen = worker.control_handler.seen.lock();
        assert_eq!(
            seen[0],
            (json!({ "name": "pause" }), "controller".to_string())
        );
    }
}
