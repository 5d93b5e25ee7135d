use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use zlmb_frame::Message;

/// Default number of messages a broker holds before pushers block.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Bounded FIFO of messages shared by broker connection threads.
#[derive(Debug)]
pub struct MessageQueue {
    items: Mutex<VecDeque<Message>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl MessageQueue {
    /// Create a queue holding at most `capacity` messages (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Append a message, waiting up to `timeout` for room.
    ///
    /// Hands the message back if the queue stayed full.
    pub fn push_timeout(
        &self,
        message: Message,
        timeout: Duration,
    ) -> std::result::Result<(), Message> {
        let deadline = Instant::now() + timeout;
        let mut items = self.lock();
        while items.len() >= self.capacity {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(message);
            }
            items = self
                .not_full
                .wait_timeout(items, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        items.push_back(message);
        drop(items);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Take the oldest message, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Message> {
        let deadline = Instant::now() + timeout;
        let mut items = self.lock();
        loop {
            if let Some(message) = items.pop_front() {
                drop(items);
                self.not_full.notify_one();
                return Some(message);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            items = self
                .not_empty
                .wait_timeout(items, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Put a message back at the head of the queue, ignoring capacity.
    ///
    /// Used when delivery to a worker failed after the message was taken.
    pub fn requeue_front(&self, message: Message) {
        self.lock().push_front(message);
        self.not_empty.notify_one();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
