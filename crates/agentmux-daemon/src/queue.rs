//! In-memory queue of undelivered messages.
//!
//! Shared between the channel readers (producers) and the injection path
//! (single consumer) behind one mutex. Draining takes the whole backlog at
//! once; a failed injection pushes the batch back to the front so arrival
//! order is preserved and nothing is silently dropped.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use agentmux_types::Message;

/// Ordered buffer of messages awaiting injection.
#[derive(Debug, Default)]
pub struct MessageQueue {
    inner: Mutex<VecDeque<Message>>,
    nonempty: Notify,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, waking anyone waiting on [`wait_nonempty`](Self::wait_nonempty).
    pub fn push(&self, msg: Message) {
        self.inner.lock().expect("queue lock poisoned").push_back(msg);
        self.nonempty.notify_one();
    }

    /// Take the entire backlog in arrival order.
    pub fn drain(&self) -> Vec<Message> {
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .drain(..)
            .collect()
    }

    /// Put a drained batch back at the front, ahead of anything that
    /// arrived while the injection was in flight.
    pub fn requeue_front(&self, batch: Vec<Message>) {
        let mut queue = self.inner.lock().expect("queue lock poisoned");
        for msg in batch.into_iter().rev() {
            queue.push_front(msg);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least one message has been pushed.
    pub async fn wait_nonempty(&self) {
        loop {
            if !self.is_empty() {
                return;
            }
            self.nonempty.notified().await;
        }
    }
}
