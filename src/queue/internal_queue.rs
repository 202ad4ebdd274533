//! Typed internal queue merging the worker's control and data planes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, WorkerError};
use crate::queue::stable_priority_queue::StablePriorityQueue;

/// Priority class of a queue element. `Control` sorts before `Data`, so a
/// control element always dequeues ahead of any data element present in the
/// queue, regardless of arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PriorityClass {
    Control,
    Data,
}

/// Opaque orchestrator command body. Carried through the queue without
/// interpretation; the consumer decides what it means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub body: Value,
}

impl ControlCommand {
    pub fn new(body: Value) -> Self {
        Self { body }
    }
}

/// Closed set of legal queue contents. Exactly these five variants may
/// enter the internal queue; anything else is a type violation at the
/// untyped boundary (see [`InternalQueue::put_value`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum QueueElement {
    /// One data record.
    InputTuple { payload: Value },

    /// One control command attributed to a sender.
    ControlElement {
        command: ControlCommand,
        sender_id: String,
    },

    /// Subsequent input tuples originate from a different upstream link.
    SenderChangeMarker { link_id: String },

    /// The current upstream link is exhausted.
    EndMarker,

    /// All upstream links are exhausted.
    EndOfAllMarker,
}

impl QueueElement {
    /// Classify this element. `ControlElement` is the only control-plane
    /// variant; the markers travel with the data they delimit.
    pub fn priority_class(&self) -> PriorityClass {
        match self {
            QueueElement::ControlElement { .. } => PriorityClass::Control,
            _ => PriorityClass::Data,
        }
    }
}

/// The one structure shared between all producer threads (network
/// receivers, the RPC dispatcher) and the worker's single consumer loop.
///
/// Producers call [`put`](Self::put) (or [`put_value`](Self::put_value) at
/// the untyped network boundary) concurrently; exactly one consumer calls
/// [`get`](Self::get), which lets it treat dequeue order as globally
/// meaningful without further synchronization.
///
/// # Examples
///
/// ```rust
/// use dataflow_worker::queue::{InternalQueue, QueueElement};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() {
///     let queue = InternalQueue::new();
///     queue.put(QueueElement::InputTuple { payload: json!({"id": 1}) });
///     queue.put(QueueElement::EndOfAllMarker);
///
///     assert!(matches!(
///         queue.get().await,
///         QueueElement::InputTuple { .. }
///     ));
/// }
/// ```
pub struct InternalQueue {
    inner: StablePriorityQueue<PriorityClass, QueueElement>,
}

impl InternalQueue {
    pub fn new() -> Self {
        Self {
            inner: StablePriorityQueue::new(),
        }
    }

    /// Enqueue a typed element. Classification is derived from the variant,
    /// so this can never fail: the closed enum is the type check.
    pub fn put(&self, element: QueueElement) {
        let class = element.priority_class();
        debug!(?class, "Enqueuing internal queue element");
        self.inner.put(class, element);
    }

    /// Enqueue a raw decoded value from the untyped boundary (network
    /// frames, control payloads).
    ///
    /// Fails with [`WorkerError::TypeMismatch`] for anything that is not one
    /// of the five legal element variants: bare scalars, null, items already
    /// carrying classification fields, or raw control payloads not wrapped
    /// in a `ControlElement`. This is a programming-error class on the
    /// producer side and is never retried.
    pub fn put_value(&self, value: Value) -> Result<()> {
        let obj = value.as_object().ok_or_else(|| {
            WorkerError::TypeMismatch(format!(
                "internal queue accepts only tagged queue elements, got: {value}"
            ))
        })?;

        // An already-classified item leaking back into `put` means some
        // producer is replaying consumer-side state.
        if obj.contains_key("class") || obj.contains_key("seq") {
            return Err(WorkerError::TypeMismatch(
                "already-classified queue item cannot be re-enqueued".to_string(),
            ));
        }

        let element: QueueElement = serde_json::from_value(value).map_err(|e| {
            WorkerError::TypeMismatch(format!("not a legal queue element variant: {e}"))
        })?;

        self.put(element);
        Ok(())
    }

    /// Remove and return the next element, suspending while empty. Control
    /// elements are returned ahead of all data elements; within one class,
    /// enqueue order is preserved.
    pub async fn get(&self) -> QueueElement {
        self.inner.get().await
    }

    /// Non-blocking variant of [`get`](Self::get).
    pub fn try_get(&self) -> Option<QueueElement> {
        self.inner.try_get()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for InternalQueue {
    fn default() -> Self {
        Self::new()
    }
}
