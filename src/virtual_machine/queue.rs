//! Thread-safe FIFO with blocking dequeue.
//!
//! Each machine owns one [`BlockingQueue`] as its inbox: peers enqueue into it,
//! only the owner dequeues. Enqueue never blocks; dequeue parks the calling
//! thread on a condition variable until a value arrives or the queue is closed.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
    /// Consumers parked inside `dequeue`.
    waiting: usize,
}

/// Unbounded multi-producer FIFO queue with a blocking consumer side.
pub struct BlockingQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
}

impl<T> BlockingQueue<T> {
    /// Creates an empty, open queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
                waiting: 0,
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // The deque stays consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends `value` to the tail and wakes one waiting consumer.
    pub fn enqueue(&self, value: T) {
        let mut inner = self.lock();
        inner.items.push_back(value);
        drop(inner);
        self.available.notify_one();
    }

    /// Removes and returns the head, blocking while the queue is empty.
    ///
    /// Returns `None` only once the queue has been [closed](Self::close) and
    /// every value enqueued before that has been taken.
    pub fn dequeue(&self) -> Option<T> {
        let mut inner = self.lock();
        inner.waiting += 1;
        let mut inner = self
            .available
            .wait_while(inner, |inner| inner.items.is_empty() && !inner.closed)
            .unwrap_or_else(|e| e.into_inner());
        inner.waiting -= 1;
        inner.items.pop_front()
    }

    /// True iff a consumer is parked in [`dequeue`](Self::dequeue) and nothing
    /// is queued for it. Both are read under one lock, so a consumer that has
    /// already taken its value never counts as parked.
    pub fn is_starved(&self) -> bool {
        let inner = self.lock();
        inner.waiting > 0 && inner.items.is_empty() && !inner.closed
    }

    /// Momentary emptiness snapshot; may be stale as soon as it returns.
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Number of queued values at the moment of the call.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Wakes every blocked consumer; later dequeues on an empty queue return `None`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
