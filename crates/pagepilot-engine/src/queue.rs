//! FIFO work queue.
//!
//! Holds task IDs only; the store owns the records. `recv` parks on a
//! `Notify` and the notified future is created before the queue is
//! checked, so an enqueue between check and park is never missed.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

/// Strict-FIFO queue of task IDs.
#[derive(Default)]
pub struct TaskQueue {
    inner: Mutex<VecDeque<Uuid>>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task ID and wake one waiting worker.
    pub fn enqueue(&self, id: Uuid) {
        self.inner.lock().push_back(id);
        self.notify.notify_one();
    }

    /// Wait for the next task ID.
    pub async fn recv(&self) -> Uuid {
        loop {
            let notified = self.notify.notified();
            if let Some(id) = self.inner.lock().pop_front() {
                // Pass a stored wakeup on to the next waiter; `notify_one`
                // may have raced with another enqueue.
                self.notify.notify_one();
                return id;
            }
            notified.await;
        }
    }

    /// Number of queued IDs.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
