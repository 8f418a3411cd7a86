//! Bounded, drop-oldest outbound queue for per-connection tick delivery: once
//! a client's queue is full, the oldest queued tick is dropped before
//! enqueueing a new one. `tokio::sync::mpsc` only supports drop-newest
//! backpressure (a full channel blocks or rejects the sender), so this is a
//! small, self-contained ring buffer instead — the ingestor must never be
//! made to wait on a slow client, so backpressure never reaches the
//! upstream socket.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

/// A bounded FIFO queue that drops its oldest entry rather than blocking
/// the producer once `capacity` is reached.
pub struct OutboundQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl<T> OutboundQueue<T> {
    /// Construct an empty queue with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push an item, dropping the oldest queued item first if the queue is
    /// already at capacity.
    pub fn push(&self, item: T) {
        {
            let mut queue = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(item);
        }
        self.notify.notify_one();
    }

    /// Await and remove the oldest queued item.
    pub async fn pop(&self) -> T {
        loop {
            {
                let mut queue = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                if let Some(item) = queue.pop_front() {
                    return item;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Number of items dropped for exceeding capacity, for metrics/tests.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pushes_and_pops_in_fifo_order() {
        let queue = OutboundQueue::new(4);
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.pop().await, 1);
        assert_eq!(queue.pop().await, 2);
    }

    #[test]
    fn exceeding_capacity_drops_the_oldest_entry() {
        let queue = OutboundQueue::new(2);
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.dropped_count(), 1);
        let remaining: Vec<_> = queue.inner.lock().unwrap().iter().copied().collect();
        assert_eq!(remaining, vec![2, 3]);
    }
}
