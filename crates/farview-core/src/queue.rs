//! Bounded blocking FIFO with stop semantics.
//!
//! The hand-off primitive between pipeline stages. One mutex guards all
//! state; two condition variables (`not_full`, `not_empty`) wake one waiter
//! on progress and all waiters on `stop` / `clear` / `set_max_size`.
//!
//! # Counter semantics
//!
//! `total_enqueued` counts *offered* items — accepted and rejected alike —
//! while `total_dropped` counts offers that never landed in the queue plus
//! items discarded by `clear`. This keeps the accounting identity
//!
//! ```text
//! size == total_enqueued - total_dequeued - total_dropped
//! ```
//!
//! true at every instant, and all three counters monotonic.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::sync::{lock, wait_timeout};

/// Rolling window length for dequeue-latency accounting.
const LATENCY_WINDOW: usize = 100;

/// Point-in-time statistics for a [`BoundedQueue`].
#[derive(Debug, Clone)]
pub struct QueueStatsSnapshot {
    /// Items currently queued.
    pub current_size: usize,
    /// Capacity; `0` means unbounded.
    pub max_size: usize,
    /// Items offered (accepted + rejected), monotonic.
    pub total_enqueued: u64,
    /// Items dequeued, monotonic.
    pub total_dequeued: u64,
    /// Items rejected or cleared, monotonic.
    pub total_dropped: u64,
    /// Average time an item spent queued, over a rolling window.
    pub average_latency: Duration,
    /// When this snapshot was taken.
    pub last_updated: Instant,
}

impl QueueStatsSnapshot {
    /// Queue usage as a percentage of capacity; `0` for unbounded queues.
    #[must_use]
    pub fn usage_pct(&self) -> f64 {
        if self.max_size == 0 {
            return 0.0;
        }
        self.current_size as f64 / self.max_size as f64 * 100.0
    }
}

struct Inner<T> {
    items: VecDeque<(T, Instant)>,
    max_size: usize,
    stopped: bool,
    total_enqueued: u64,
    total_dequeued: u64,
    total_dropped: u64,
    latency_window: VecDeque<Duration>,
    latency_sum: Duration,
}

impl<T> Inner<T> {
    fn is_full(&self) -> bool {
        self.max_size > 0 && self.items.len() >= self.max_size
    }

    fn record_latency(&mut self, waited: Duration) {
        if self.latency_window.len() == LATENCY_WINDOW {
            if let Some(old) = self.latency_window.pop_front() {
                self.latency_sum = self.latency_sum.saturating_sub(old);
            }
        }
        self.latency_window.push_back(waited);
        self.latency_sum += waited;
    }

    fn average_latency(&self) -> Duration {
        if self.latency_window.is_empty() {
            return Duration::ZERO;
        }
        self.latency_sum / self.latency_window.len() as u32
    }

    fn pop(&mut self) -> Option<T> {
        let (item, enqueued_at) = self.items.pop_front()?;
        self.total_dequeued += 1;
        self.record_latency(enqueued_at.elapsed());
        Some(item)
    }
}

/// Thread-safe bounded FIFO used as the inter-stage hand-off.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Create a queue. `max_size == 0` means unbounded.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                max_size,
                stopped: false,
                total_enqueued: 0,
                total_dequeued: 0,
                total_dropped: 0,
                latency_window: VecDeque::with_capacity(LATENCY_WINDOW),
                latency_sum: Duration::ZERO,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Enqueue, waiting while the queue is full. Returns `false` once the
    /// queue is stopped (the rejected offer is counted as dropped).
    pub fn enqueue_blocking(&self, item: T) -> bool {
        let mut inner = lock(&self.inner);
        while !inner.stopped && inner.is_full() {
            let (guard, _) = wait_timeout(&self.not_full, inner, Duration::from_millis(100));
            inner = guard;
        }
        inner.total_enqueued += 1;
        if inner.stopped {
            inner.total_dropped += 1;
            return false;
        }
        inner.items.push_back((item, Instant::now()));
        drop(inner);
        self.not_empty.notify_one();
        true
    }

    /// Enqueue without blocking. `false` when full or stopped; the offer is
    /// counted as dropped.
    pub fn try_enqueue(&self, item: T) -> bool {
        let mut inner = lock(&self.inner);
        inner.total_enqueued += 1;
        if inner.stopped || inner.is_full() {
            inner.total_dropped += 1;
            return false;
        }
        inner.items.push_back((item, Instant::now()));
        drop(inner);
        self.not_empty.notify_one();
        true
    }

    /// Enqueue, waiting up to `timeout` for space. `false` on timeout or
    /// stop; the rejected offer is counted as dropped.
    pub fn enqueue_timeout(&self, item: T, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = lock(&self.inner);
        while !inner.stopped && inner.is_full() {
            let now = Instant::now();
            if now >= deadline {
                inner.total_enqueued += 1;
                inner.total_dropped += 1;
                return false;
            }
            let (guard, _) = wait_timeout(&self.not_full, inner, deadline - now);
            inner = guard;
        }
        inner.total_enqueued += 1;
        if inner.stopped {
            inner.total_dropped += 1;
            return false;
        }
        inner.items.push_back((item, Instant::now()));
        drop(inner);
        self.not_empty.notify_one();
        true
    }

    /// Dequeue, waiting while the queue is empty. Returns `None` only when
    /// the queue is stopped *and* empty — draining after stop is allowed.
    pub fn dequeue_blocking(&self) -> Option<T> {
        let mut inner = lock(&self.inner);
        while !inner.stopped && inner.items.is_empty() {
            let (guard, _) = wait_timeout(&self.not_empty, inner, Duration::from_millis(100));
            inner = guard;
        }
        let item = inner.pop();
        drop(inner);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Dequeue without blocking.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut inner = lock(&self.inner);
        let item = inner.pop();
        drop(inner);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Dequeue, waiting up to `timeout` for an item.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = lock(&self.inner);
        while !inner.stopped && inner.items.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = wait_timeout(&self.not_empty, inner, deadline - now);
            inner = guard;
        }
        let item = inner.pop();
        drop(inner);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Discard all queued items (counted as dropped) and wake writers.
    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        inner.total_dropped += inner.items.len() as u64;
        inner.items.clear();
        drop(inner);
        self.not_full.notify_all();
    }

    /// Stop the queue: blocked enqueues fail immediately, dequeues drain
    /// the remaining items and then fail.
    pub fn stop(&self) {
        let mut inner = lock(&self.inner);
        inner.stopped = true;
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Re-arm a stopped queue.
    pub fn restart(&self) {
        lock(&self.inner).stopped = false;
    }

    /// Items currently queued.
    pub fn size(&self) -> usize {
        lock(&self.inner).items.len()
    }

    /// `true` when no items are queued.
    pub fn is_empty(&self) -> bool {
        lock(&self.inner).items.is_empty()
    }

    /// `true` when a bounded queue is at capacity.
    pub fn is_full(&self) -> bool {
        lock(&self.inner).is_full()
    }

    /// `true` after [`BoundedQueue::stop`].
    pub fn is_stopped(&self) -> bool {
        lock(&self.inner).stopped
    }

    /// Capacity; `0` means unbounded.
    pub fn max_size(&self) -> usize {
        lock(&self.inner).max_size
    }

    /// Change the capacity. Never truncates existing content — only the
    /// admission check changes. Wakes all waiters to re-evaluate.
    pub fn set_max_size(&self, max_size: usize) {
        let mut inner = lock(&self.inner);
        inner.max_size = max_size;
        drop(inner);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Total items offered (monotonic).
    pub fn total_enqueued(&self) -> u64 {
        lock(&self.inner).total_enqueued
    }

    /// Total items dequeued (monotonic).
    pub fn total_dequeued(&self) -> u64 {
        lock(&self.inner).total_dequeued
    }

    /// Total items rejected or cleared (monotonic).
    pub fn total_dropped(&self) -> u64 {
        lock(&self.inner).total_dropped
    }

    /// Rolling average of time items spent queued.
    pub fn average_latency(&self) -> Duration {
        lock(&self.inner).average_latency()
    }

    /// Consistent point-in-time statistics snapshot.
    pub fn stats(&self) -> QueueStatsSnapshot {
        let inner = lock(&self.inner);
        QueueStatsSnapshot {
            current_size: inner.items.len(),
            max_size: inner.max_size,
            total_enqueued: inner.total_enqueued,
            total_dequeued: inner.total_dequeued,
            total_dropped: inner.total_dropped,
            average_latency: inner.average_latency(),
            last_updated: Instant::now(),
        }
    }
}
