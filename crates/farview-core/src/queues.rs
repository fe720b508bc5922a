//! The two inter-stage queues and their health monitor.
//!
//! [`PipelineQueues`] replaces a global queue singleton with a context
//! struct constructed once at startup and shared via `Arc`: the capture
//! worker produces into the capture queue, the processing worker moves
//! frames from capture to processed, and the session layer drains the
//! processed queue. Workers hold non-owning references only.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::frame::{EncodedFrame, RawFrame};
use crate::queue::{BoundedQueue, QueueStatsSnapshot};

/// Usage percentage above which a warning event is emitted.
const WARN_USAGE_PCT: f64 = 80.0;
/// Usage percentage above which an error event is emitted.
const ERROR_USAGE_PCT: f64 = 95.0;
/// Average latency above which a warning event is emitted.
const WARN_LATENCY: Duration = Duration::from_millis(1000);
/// Default monitor snapshot interval.
const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);

/// Which of the two pipeline queues an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Capture → Process hand-off.
    Capture,
    /// Process → Deliver hand-off.
    Processed,
}

impl QueueKind {
    fn name(self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Processed => "processed",
        }
    }
}

/// Health/statistics events emitted by the [`QueueMonitor`].
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// Fresh statistics snapshot for a queue.
    StatsUpdated(QueueKind, QueueStatsSnapshot),
    /// Usage above 80 % or average latency above 1 s.
    Warning(QueueKind, String),
    /// Usage above 95 %.
    Error(QueueKind, String),
}

/// The two queues connecting the pipeline stages.
pub struct PipelineQueues {
    capture: BoundedQueue<RawFrame>,
    processed: BoundedQueue<EncodedFrame>,
}

impl PipelineQueues {
    /// Allocate both queues with the given capacities (`0` = unbounded).
    #[must_use]
    pub fn new(capture_cap: usize, processed_cap: usize) -> Self {
        Self {
            capture: BoundedQueue::new(capture_cap),
            processed: BoundedQueue::new(processed_cap),
        }
    }

    /// Capture → Process queue.
    #[must_use]
    pub fn capture_queue(&self) -> &BoundedQueue<RawFrame> {
        &self.capture
    }

    /// Process → Deliver queue.
    #[must_use]
    pub fn processed_queue(&self) -> &BoundedQueue<EncodedFrame> {
        &self.processed
    }

    /// Statistics snapshot for one queue.
    #[must_use]
    pub fn queue_stats(&self, kind: QueueKind) -> QueueStatsSnapshot {
        match kind {
            QueueKind::Capture => self.capture.stats(),
            QueueKind::Processed => self.processed.stats(),
        }
    }

    /// Change a queue's capacity (never truncates content).
    pub fn set_max_size(&self, kind: QueueKind, max_size: usize) {
        match kind {
            QueueKind::Capture => self.capture.set_max_size(max_size),
            QueueKind::Processed => self.processed.set_max_size(max_size),
        }
    }

    /// Discard all content of one queue.
    pub fn clear(&self, kind: QueueKind) {
        match kind {
            QueueKind::Capture => self.capture.clear(),
            QueueKind::Processed => self.processed.clear(),
        }
    }

    /// Stop both queues; blocked producers/consumers unblock.
    pub fn stop_all(&self) {
        self.capture.stop();
        self.processed.stop();
    }

    /// Re-arm both queues after a stop.
    pub fn restart_all(&self) {
        self.capture.restart();
        self.processed.restart();
    }

    /// Health check: usage at or below 95 % and average latency at or
    /// below 1 s.
    #[must_use]
    pub fn is_healthy(&self, kind: QueueKind) -> bool {
        let stats = self.queue_stats(kind);
        stats.usage_pct() <= ERROR_USAGE_PCT && stats.average_latency <= WARN_LATENCY
    }
}

/// Periodic statistics snapshotter for a [`PipelineQueues`].
///
/// Runs a small dedicated thread; emits [`QueueEvent`]s on its channel
/// until stopped or dropped.
pub struct QueueMonitor {
    events: Receiver<QueueEvent>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl QueueMonitor {
    /// Start monitoring with the default 1 s interval.
    #[must_use]
    pub fn start(queues: Arc<PipelineQueues>) -> Self {
        Self::start_with_interval(queues, DEFAULT_SNAPSHOT_INTERVAL)
    }

    /// Start monitoring with a custom snapshot interval.
    #[must_use]
    pub fn start_with_interval(queues: Arc<PipelineQueues>, interval: Duration) -> Self {
        let (tx, rx) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("queue-monitor".to_string())
                .spawn(move || monitor_loop(&queues, &tx, &stop, interval))
                .ok()
        };
        Self { events: rx, stop, thread }
    }

    /// Receiver for monitor events.
    #[must_use]
    pub fn events(&self) -> &Receiver<QueueEvent> {
        &self.events
    }

    /// Stop the monitor thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for QueueMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn monitor_loop(
    queues: &PipelineQueues,
    events: &Sender<QueueEvent>,
    stop: &AtomicBool,
    interval: Duration,
) {
    let mut next_snapshot = std::time::Instant::now() + interval;
    while !stop.load(Ordering::SeqCst) {
        // Sleep in short slices so stop latency stays bounded even for
        // long snapshot intervals.
        std::thread::sleep(interval.min(Duration::from_millis(100)));
        if std::time::Instant::now() < next_snapshot {
            continue;
        }
        next_snapshot = std::time::Instant::now() + interval;
        for kind in [QueueKind::Capture, QueueKind::Processed] {
            let stats = queues.queue_stats(kind);
            check_health(kind, &stats, events);
            let _ = events.send(QueueEvent::StatsUpdated(kind, stats));
        }
    }
}

fn check_health(kind: QueueKind, stats: &QueueStatsSnapshot, events: &Sender<QueueEvent>) {
    let usage = stats.usage_pct();
    if usage > ERROR_USAGE_PCT {
        tracing::warn!(queue = kind.name(), usage, "queue above error threshold");
        let _ = events.send(QueueEvent::Error(
            kind,
            format!("{} queue at {usage:.1}% capacity", kind.name()),
        ));
    } else if usage > WARN_USAGE_PCT {
        let _ = events.send(QueueEvent::Warning(
            kind,
            format!("{} queue at {usage:.1}% capacity", kind.name()),
        ));
    }
    if stats.average_latency > WARN_LATENCY {
        let _ = events.send(QueueEvent::Warning(
            kind,
            format!("{} queue latency {} ms", kind.name(), stats.average_latency.as_millis()),
        ));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::frame::{PixelBuffer, PixelFormat};

    fn raw_frame(id: u64) -> RawFrame {
        let image = PixelBuffer::new(2, 2, PixelFormat::Rgb8, vec![0; 12]).unwrap();
        RawFrame::new(id, image)
    }

    #[test]
    fn queues_are_independent() {
        let queues = PipelineQueues::new(4, 4);
        assert!(queues.capture_queue().try_enqueue(raw_frame(1)));
        assert_eq!(queues.queue_stats(QueueKind::Capture).current_size, 1);
        assert_eq!(queues.queue_stats(QueueKind::Processed).current_size, 0);
    }

    #[test]
    fn stop_and_restart_cover_both_queues() {
        let queues = PipelineQueues::new(0, 0);
        queues.stop_all();
        assert!(queues.capture_queue().is_stopped());
        assert!(queues.processed_queue().is_stopped());
        queues.restart_all();
        assert!(!queues.capture_queue().is_stopped());
        assert!(!queues.processed_queue().is_stopped());
    }

    #[test]
    fn health_degrades_when_nearly_full() {
        let queues = PipelineQueues::new(10, 10);
        assert!(queues.is_healthy(QueueKind::Capture));
        for i in 0..10 {
            queues.capture_queue().try_enqueue(raw_frame(i + 1));
        }
        // 100 % usage breaches the 95 % health bound.
        assert!(!queues.is_healthy(QueueKind::Capture));
        queues.clear(QueueKind::Capture);
        assert!(queues.is_healthy(QueueKind::Capture));
    }

    #[test]
    fn monitor_emits_stats_and_errors() {
        let queues = Arc::new(PipelineQueues::new(4, 4));
        for i in 0..4 {
            queues.capture_queue().try_enqueue(raw_frame(i + 1));
        }
        let mut monitor =
            QueueMonitor::start_with_interval(Arc::clone(&queues), Duration::from_millis(50));

        let deadline = Instant::now() + Duration::from_secs(3);
        let mut saw_stats = false;
        let mut saw_error = false;
        while Instant::now() < deadline && !(saw_stats && saw_error) {
            match monitor.events().recv_timeout(Duration::from_millis(100)) {
                Ok(QueueEvent::StatsUpdated(QueueKind::Capture, stats)) => {
                    assert_eq!(stats.current_size, 4);
                    saw_stats = true;
                },
                Ok(QueueEvent::Error(QueueKind::Capture, _)) => saw_error = true,
                Ok(_) => {},
                Err(_) => {},
            }
        }
        assert!(saw_stats, "expected a stats snapshot");
        assert!(saw_error, "expected an over-capacity error event");
        monitor.stop();
    }
}
