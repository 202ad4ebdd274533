//! Stable priority queue keyed by `(priority class, sequence number)`.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// One entry in the queue. The total order is lexicographic on
/// `(class, seq)`; the carried value never participates in ordering.
#[derive(Debug, Clone)]
struct QueuedItem<C, T> {
    class: C,
    seq: u64,
    value: T,
}

impl<C: Ord, T> PartialEq for QueuedItem<C, T> {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class && self.seq == other.seq
    }
}

impl<C: Ord, T> Eq for QueuedItem<C, T> {}

impl<C: Ord, T> PartialOrd for QueuedItem<C, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C: Ord, T> Ord for QueuedItem<C, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.class
            .cmp(&other.class)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Internal queue state. Sequence assignment and heap insertion happen
/// under this one lock so concurrent producers cannot observe an
/// interleaving that violates within-class stability.
struct QueueState<C, T> {
    heap: BinaryHeap<Reverse<QueuedItem<C, T>>>,
    next_seq: u64,
}

/// Generic stable priority queue.
///
/// `put(class, value)` assigns the next sequence number and inserts in one
/// atomic step; `get()` suspends until non-empty and returns the value with
/// the smallest `(class, seq)` key.
///
/// Guarantees:
///
/// - **Class ordering** — no value of a higher class is returned while a
///   value of a lower class (lower sorts first) is present.
/// - **Stability** — for two values of the same class, the one whose `put`
///   completed first is returned first.
///
/// Many producers may call `put` concurrently; the queue is designed for a
/// single consumer calling `get`.
///
/// # Examples
///
/// ```rust
/// use dataflow_worker::queue::StablePriorityQueue;
///
/// #[tokio::main]
/// async fn main() {
///     let queue: StablePriorityQueue<u8, &str> = StablePriorityQueue::new();
///     queue.put(1, "data");
///     queue.put(0, "control");
///
///     assert_eq!(queue.get().await, "control");
///     assert_eq!(queue.get().await, "data");
/// }
/// ```
pub struct StablePriorityQueue<C, T> {
    state: Mutex<QueueState<C, T>>,
    notify: Notify,
}

impl<C: Ord, T> StablePriorityQueue<C, T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Insert a value under the given class. Never suspends; the lock is
    /// held only for the sequence assignment and heap push.
    pub fn put(&self, class: C, value: T) {
        {
            let mut state = self.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(Reverse(QueuedItem { class, seq, value }));
        }
        // Notify stores a permit when no consumer is waiting, so a put that
        // races with the consumer's pre-wait check is never lost.
        self.notify.notify_one();
    }

    /// Remove and return the smallest `(class, seq)` value, suspending the
    /// caller while the queue is empty.
    pub async fn get(&self) -> T {
        loop {
            if let Some(value) = self.try_get() {
                return value;
            }
            self.notify.notified().await;
        }
    }

    /// Non-blocking variant of [`get`](Self::get).
    pub fn try_get(&self) -> Option<T> {
        let mut state = self.state.lock();
        state.heap.pop().map(|Reverse(item)| item.value)
    }

    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().heap.is_empty()
    }
}

impl<C: Ord, T> Default for StablePriorityQueue<C, T> {
    fn default() -> Self {
        Self::new()
    }
}
