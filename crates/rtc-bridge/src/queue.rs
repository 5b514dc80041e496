//! Bounded drop-oldest queue between the engine callback and application code.
//!
//! The engine delivers frames on its own thread and that thread must never stall, so
//! `enqueue` never blocks: when the queue is full the oldest frame is evicted to make room.
//! Consumers poll with [`FrameQueue::dequeue`] or wait a bounded time with
//! [`FrameQueue::dequeue_timeout`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::ConfigError;

/// Fixed-capacity FIFO that always holds the `capacity` most recent items.
///
/// ## Design
/// - **Single mutex** guards the deque; every operation is a short critical section.
/// - **Drop-oldest** admission: a full queue evicts its front before appending.
/// - A [`Condvar`] is only used by consumers that opt into a bounded wait; producers
///   never wait on it.
/// - Evictions are counted so callers can report frame loss.
pub struct FrameQueue<T> {
    inner: Mutex<VecDeque<T>>,
    cv: Condvar,
    capacity: usize,
    dropped: AtomicU64,
}

/// Point-in-time view of a queue for logging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub len: usize,
    pub capacity: usize,
    pub dropped: u64,
}

impl<T> FrameQueue<T> {
    /// Create a queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidQueueSize);
        }
        Ok(Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            cv: Condvar::new(),
            capacity,
            dropped: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item`, evicting the oldest entry first when full.
    ///
    /// Returns `true` when an entry was evicted.
    pub fn enqueue(&self, item: T) -> bool {
        let mut q = self.lock();
        let evicted = if q.len() >= self.capacity {
            q.pop_front();
            true
        } else {
            false
        };
        q.push_back(item);
        drop(q);

        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.cv.notify_one();
        evicted
    }

    /// Remove and return the oldest item, or `None` when the queue is empty.
    pub fn dequeue(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Like [`dequeue`](Self::dequeue) but waits up to `timeout` for an item to arrive.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut q = self.lock();
        loop {
            if let Some(item) = q.pop_front() {
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _timeout) = self
                .cv
                .wait_timeout(q, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            q = guard;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Current number of queued items.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total items evicted by drop-oldest admission since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Discard everything still queued. Returns the number of discarded items.
    pub fn clear(&self) -> usize {
        let mut q = self.lock();
        let n = q.len();
        q.clear();
        n
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            len: self.len(),
            capacity: self.capacity,
            dropped: self.dropped(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn drain_all(q: &FrameQueue<u32>) -> Vec<u32> {
        let mut out = Vec::new();
        while let Some(v) = q.dequeue() {
            out.push(v);
        }
        out
    }

    #[test]
    fn new_rejects_zero_capacity() {
        assert!(matches!(
            FrameQueue::<u32>::new(0),
            Err(ConfigError::InvalidQueueSize)
        ));
    }

    #[test]
    fn dequeue_on_fresh_queue_is_empty() {
        let q = FrameQueue::<u32>::new(4).unwrap();
        assert!(q.is_empty());
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn overflow_keeps_most_recent_in_order() {
        let q = FrameQueue::new(10).unwrap();
        for i in 1..=12u32 {
            q.enqueue(i);
        }
        assert_eq!(q.len(), 10);
        assert_eq!(q.dropped(), 2);

        assert_eq!(q.dequeue(), Some(3));
        assert_eq!(q.len(), 9);
        assert_eq!(drain_all(&q), (4..=12).collect::<Vec<_>>());
    }

    #[test]
    fn every_prefix_holds_last_n_items() {
        let cap = 5;
        let q = FrameQueue::new(cap).unwrap();
        let mut history = Vec::new();
        for i in 0..23u32 {
            q.enqueue(i);
            history.push(i);

            let expected: Vec<u32> = history
                .iter()
                .copied()
                .skip(history.len().saturating_sub(cap))
                .collect();
            let snapshot: Vec<u32> = q.lock().iter().copied().collect();
            assert_eq!(snapshot, expected);
        }
    }

    #[test]
    fn enqueue_reports_eviction() {
        let q = FrameQueue::new(1).unwrap();
        assert!(!q.enqueue(1u32));
        assert!(q.enqueue(2u32));
        assert_eq!(q.dequeue(), Some(2));
    }

    #[test]
    fn fully_drained_queue_signals_empty_again() {
        let q = FrameQueue::new(3).unwrap();
        q.enqueue(7u32);
        assert_eq!(q.dequeue(), Some(7));
        assert_eq!(q.dequeue(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn clear_discards_residual_items() {
        let q = FrameQueue::new(3).unwrap();
        q.enqueue(1u32);
        q.enqueue(2u32);
        assert_eq!(q.clear(), 2);
        assert!(q.is_empty());
        assert_eq!(
            q.stats(),
            QueueStats {
                len: 0,
                capacity: 3,
                dropped: 0
            }
        );
    }

    #[test]
    fn dequeue_timeout_returns_none_on_timeout() {
        let q = FrameQueue::<u32>::new(2).unwrap();
        assert_eq!(q.dequeue_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn dequeue_timeout_wakes_when_item_arrives() {
        let q = Arc::new(FrameQueue::new(2).unwrap());
        let q_push = q.clone();
        let barrier = Arc::new(std::sync::Barrier::new(2));
        let start = barrier.clone();

        let handle = thread::spawn(move || {
            start.wait();
            q_push.enqueue(42u32);
        });

        barrier.wait();
        assert_eq!(q.dequeue_timeout(Duration::from_secs(5)), Some(42));
        handle.join().unwrap();
    }

    #[test]
    fn concurrent_producer_and_consumer_preserve_order() {
        let q = Arc::new(FrameQueue::new(8).unwrap());
        let q_push = q.clone();

        let producer = thread::spawn(move || {
            for i in 0..5_000u32 {
                q_push.enqueue(i);
            }
        });

        let mut seen = Vec::new();
        while !producer.is_finished() || !q.is_empty() {
            if let Some(v) = q.dequeue_timeout(Duration::from_millis(1)) {
                seen.push(v);
            }
        }
        producer.join().unwrap();

        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.last().copied(), Some(4_999));
        assert_eq!(seen.len() as u64 + q.dropped(), 5_000);
    }
}
