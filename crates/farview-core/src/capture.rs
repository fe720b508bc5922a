//! Screen capture stage.
//!
//! The [`CaptureWorker`] produces a time-paced stream of [`RawFrame`]s into
//! the capture queue. The actual pixel grabbing is behind the
//! [`FrameGrabber`] port; headless and test environments construct a
//! [`SyntheticGrabber`] explicitly so the downstream pipeline stays
//! exercisable without a display.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::{CaptureConfig, CaptureRect};
use crate::frame::{FrameIdGen, PixelBuffer, PixelFormat, RawFrame};
use crate::queues::PipelineQueues;
use crate::sync::lock;
use crate::worker::{Worker, WorkerContext};

/// Grab-time history window.
const GRAB_TIME_WINDOW: usize = 100;
/// Frame-timestamp window used for the moving frame rate.
const FRAME_RATE_WINDOW: usize = 60;
/// Consecutive grab errors before recovery mode is flagged.
const MAX_ERROR_STREAK: u32 = 10;

/// Errors surfaced by a [`FrameGrabber`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GrabError {
    /// No platform grabber is available in this environment.
    #[error("platform grabber unavailable")]
    Unavailable,

    /// The grab itself failed.
    #[error("grab failed: {0}")]
    Failed(String),
}

/// Platform pixel-grabbing port.
pub trait FrameGrabber: Send + 'static {
    /// Full geometry of the captured display.
    fn screen_rect(&self) -> CaptureRect;

    /// Capture the given region (already clipped to [`FrameGrabber::screen_rect`]).
    fn grab(&mut self, rect: CaptureRect) -> Result<PixelBuffer, GrabError>;
}

/// Deterministic checkerboard grabber for headless environments.
///
/// Produces an animated checkerboard so downstream stages see changing
/// content; the pattern depends only on the frame counter.
pub struct SyntheticGrabber {
    width: u32,
    height: u32,
    counter: u32,
}

impl SyntheticGrabber {
    /// Checkerboard cell edge in pixels.
    const CELL: u32 = 20;

    /// Create a synthetic screen of the given size.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width: width.max(1), height: height.max(1), counter: 0 }
    }
}

impl Default for SyntheticGrabber {
    fn default() -> Self {
        Self::new(320, 240)
    }
}

impl FrameGrabber for SyntheticGrabber {
    fn screen_rect(&self) -> CaptureRect {
        CaptureRect::new(0, 0, self.width, self.height)
    }

    fn grab(&mut self, rect: CaptureRect) -> Result<PixelBuffer, GrabError> {
        let rect = if rect.is_empty() { self.screen_rect() } else { rect };
        let phase = self.counter;
        self.counter = self.counter.wrapping_add(1);

        let width = rect.width.max(1);
        let height = rect.height.max(1);
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                let cell_x = (x + rect.x as u32) / Self::CELL;
                let cell_y = (y + rect.y as u32) / Self::CELL;
                let dark = (cell_x + cell_y + phase / 8) % 2 == 0;
                let base: u8 = if dark { 30 } else { 60 };
                data.extend_from_slice(&[base, base, base + (phase % 32) as u8, 255]);
            }
        }
        PixelBuffer::new(width, height, PixelFormat::Rgba8, data)
            .ok_or_else(|| GrabError::Failed("synthetic buffer allocation".to_string()))
    }
}

/// Capture statistics, updated on every grab attempt.
#[derive(Debug, Clone, Default)]
pub struct CaptureStats {
    /// Frames successfully captured.
    pub total_frames_captured: u64,
    /// Frames rejected by a full (or stopped) capture queue.
    pub dropped_frames: u64,
    /// Moving-window frame rate.
    pub current_frame_rate: f64,
    /// Mean grab time over the window.
    pub avg_capture_time: Duration,
    /// Fastest grab in the window.
    pub min_capture_time: Option<Duration>,
    /// Slowest grab in the window.
    pub max_capture_time: Duration,
    /// Grab errors observed since start.
    pub error_count: u64,
    /// `true` after too many consecutive grab failures.
    pub recovery_mode: bool,
}

struct StatsInner {
    total_captured: u64,
    dropped: u64,
    errors: u64,
    grab_times: VecDeque<Duration>,
    frame_timestamps: VecDeque<Instant>,
}

/// Commands posted to a running [`CaptureWorker`].
#[derive(Debug, Clone)]
pub enum CaptureCommand {
    /// Begin producing frames.
    Start,
    /// Stop producing frames (worker keeps running).
    Stop,
    /// Replace the capture configuration (normalized on receipt).
    UpdateConfig(CaptureConfig),
}

struct CaptureShared {
    capturing: AtomicBool,
    config: Mutex<CaptureConfig>,
    config_changed: AtomicBool,
    error_streak: AtomicU32,
    recovery_mode: AtomicBool,
    stats: Mutex<StatsInner>,
}

/// Thread-safe control surface over a capture worker.
///
/// `start_capturing` / `stop_capturing` are idempotent and callable from
/// any thread; they only flip atomics observed by the capture loop.
#[derive(Clone)]
pub struct CaptureController {
    shared: Arc<CaptureShared>,
}

impl CaptureController {
    /// Begin producing frames.
    pub fn start_capturing(&self) {
        self.shared.capturing.store(true, Ordering::SeqCst);
    }

    /// Stop producing frames.
    pub fn stop_capturing(&self) {
        self.shared.capturing.store(false, Ordering::SeqCst);
    }

    /// `true` while the capture loop is producing.
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.shared.capturing.load(Ordering::SeqCst)
    }

    /// Replace the configuration; values are normalized into range.
    pub fn set_config(&self, config: &CaptureConfig) {
        *lock(&self.shared.config) = config.normalized();
        self.shared.config_changed.store(true, Ordering::SeqCst);
    }

    /// Current (always normalized) configuration.
    #[must_use]
    pub fn config(&self) -> CaptureConfig {
        lock(&self.shared.config).clone()
    }

    /// Statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> CaptureStats {
        let inner = lock(&self.shared.stats);
        let mut stats = CaptureStats {
            total_frames_captured: inner.total_captured,
            dropped_frames: inner.dropped,
            error_count: inner.errors,
            recovery_mode: self.shared.recovery_mode.load(Ordering::SeqCst),
            ..CaptureStats::default()
        };
        if !inner.grab_times.is_empty() {
            let total: Duration = inner.grab_times.iter().sum();
            stats.avg_capture_time = total / inner.grab_times.len() as u32;
            stats.min_capture_time = inner.grab_times.iter().min().copied();
            stats.max_capture_time =
                inner.grab_times.iter().max().copied().unwrap_or(Duration::ZERO);
        }
        if inner.frame_timestamps.len() >= 2 {
            let span = inner
                .frame_timestamps
                .back()
                .zip(inner.frame_timestamps.front())
                .map(|(last, first)| last.duration_since(*first))
                .unwrap_or(Duration::ZERO);
            if span > Duration::ZERO {
                stats.current_frame_rate =
                    (inner.frame_timestamps.len() - 1) as f64 / span.as_secs_f64();
            }
        }
        stats
    }
}

/// Time-paced frame producer.
pub struct CaptureWorker {
    grabber: Box<dyn FrameGrabber>,
    queues: Arc<PipelineQueues>,
    shared: Arc<CaptureShared>,
    ids: FrameIdGen,
    last_capture: Option<Instant>,
    frame_delay: Duration,
}

impl CaptureWorker {
    /// Build a capture worker over a grabber and the pipeline queues.
    ///
    /// Returns the worker (to hand to the thread registry) and its
    /// controller.
    #[must_use]
    pub fn new(
        grabber: Box<dyn FrameGrabber>,
        queues: Arc<PipelineQueues>,
        config: &CaptureConfig,
    ) -> (Self, CaptureController) {
        let config = config.normalized();
        let frame_delay = Duration::from_millis(config.frame_delay_ms());
        let shared = Arc::new(CaptureShared {
            capturing: AtomicBool::new(false),
            config: Mutex::new(config),
            config_changed: AtomicBool::new(false),
            error_streak: AtomicU32::new(0),
            recovery_mode: AtomicBool::new(false),
            stats: Mutex::new(StatsInner {
                total_captured: 0,
                dropped: 0,
                errors: 0,
                grab_times: VecDeque::with_capacity(GRAB_TIME_WINDOW),
                frame_timestamps: VecDeque::with_capacity(FRAME_RATE_WINDOW),
            }),
        });
        let controller = CaptureController { shared: Arc::clone(&shared) };
        let worker = Self {
            grabber,
            queues,
            shared,
            ids: FrameIdGen::new(),
            last_capture: None,
            frame_delay,
        };
        (worker, controller)
    }

    fn refresh_config(&mut self) {
        if self.shared.config_changed.swap(false, Ordering::SeqCst) {
            let config = lock(&self.shared.config);
            self.frame_delay = Duration::from_millis(config.frame_delay_ms());
            tracing::debug!(
                frame_rate = config.frame_rate,
                delay_ms = self.frame_delay.as_millis() as u64,
                "capture config updated"
            );
        }
    }

    fn due_for_frame(&self) -> bool {
        self.last_capture.is_none_or(|last| last.elapsed() >= self.frame_delay)
    }

    fn perform_capture(&mut self) {
        let rect = {
            let config = lock(&self.shared.config);
            let screen = self.grabber.screen_rect();
            if config.capture_rect.is_empty() {
                screen
            } else {
                config.capture_rect.intersect(&screen)
            }
        };
        if rect.is_empty() {
            self.record_error("capture region outside the screen");
            return;
        }

        let grab_started = Instant::now();
        match self.grabber.grab(rect) {
            Ok(image) => {
                let grab_time = grab_started.elapsed();
                let frame = RawFrame::new(self.ids.next(), image);
                let accepted = self.queues.capture_queue().try_enqueue(frame);

                let mut stats = lock(&self.shared.stats);
                if accepted {
                    stats.total_captured += 1;
                    if stats.frame_timestamps.len() == FRAME_RATE_WINDOW {
                        stats.frame_timestamps.pop_front();
                    }
                    stats.frame_timestamps.push_back(Instant::now());
                } else {
                    // Drop-newest policy: a full queue rejects the fresh
                    // frame rather than stalling capture.
                    stats.dropped += 1;
                }
                if stats.grab_times.len() == GRAB_TIME_WINDOW {
                    stats.grab_times.pop_front();
                }
                stats.grab_times.push_back(grab_time);
                drop(stats);

                self.shared.error_streak.store(0, Ordering::SeqCst);
                self.shared.recovery_mode.store(false, Ordering::SeqCst);
            },
            Err(error) => self.record_error(&error.to_string()),
        }
        self.last_capture = Some(Instant::now());
    }

    fn record_error(&self, message: &str) {
        tracing::warn!(error = message, "screen grab failed");
        lock(&self.shared.stats).errors += 1;
        let streak = self.shared.error_streak.fetch_add(1, Ordering::SeqCst) + 1;
        if streak > MAX_ERROR_STREAK && !self.shared.recovery_mode.swap(true, Ordering::SeqCst) {
            tracing::warn!(streak, "capture entering recovery mode");
        }
    }
}

impl Worker for CaptureWorker {
    type Command = CaptureCommand;

    fn process_task(&mut self, _ctx: &WorkerContext) {
        if !self.shared.capturing.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(2));
            return;
        }
        self.refresh_config();
        if self.due_for_frame() {
            self.perform_capture();
        } else {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn handle_command(&mut self, command: CaptureCommand) {
        match command {
            CaptureCommand::Start => self.shared.capturing.store(true, Ordering::SeqCst),
            CaptureCommand::Stop => self.shared.capturing.store(false, Ordering::SeqCst),
            CaptureCommand::UpdateConfig(config) => {
                *lock(&self.shared.config) = config.normalized();
                self.shared.config_changed.store(true, Ordering::SeqCst);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::unbounded;

    use super::*;
    use crate::worker::WorkerCell;

    struct FailingGrabber;

    impl FrameGrabber for FailingGrabber {
        fn screen_rect(&self) -> CaptureRect {
            CaptureRect::new(0, 0, 100, 100)
        }

        fn grab(&mut self, _rect: CaptureRect) -> Result<PixelBuffer, GrabError> {
            Err(GrabError::Failed("no display".to_string()))
        }
    }

    fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let end = Instant::now() + deadline;
        while Instant::now() < end {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn synthetic_grabber_is_deterministic_in_shape() {
        let mut grabber = SyntheticGrabber::new(64, 48);
        let frame = grabber.grab(CaptureRect::default()).unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(frame.data.len(), 64 * 48 * 4);

        let clipped = grabber.grab(CaptureRect::new(0, 0, 16, 16)).unwrap();
        assert_eq!((clipped.width, clipped.height), (16, 16));
    }

    #[test]
    fn produces_frames_with_monotonic_ids() {
        let queues = Arc::new(PipelineQueues::new(0, 0));
        let config = CaptureConfig { frame_rate: 120, ..CaptureConfig::default() };
        let (worker, controller) =
            CaptureWorker::new(Box::new(SyntheticGrabber::new(64, 48)), Arc::clone(&queues), &config);

        let (tx, rx) = unbounded();
        let cell = WorkerCell::new("capture", worker, tx);
        let handle = cell.handle();
        let join = cell.spawn().unwrap().unwrap();

        controller.start_capturing();
        assert!(wait_until(Duration::from_secs(3), || queues.capture_queue().size() >= 3));
        controller.stop_capturing();

        let first = queues.capture_queue().try_dequeue().unwrap();
        let second = queues.capture_queue().try_dequeue().unwrap();
        assert!(first.frame_id > 0);
        assert!(second.frame_id > first.frame_id);
        assert!(first.is_valid());

        handle.stop(true);
        join.join().unwrap();
        drop(rx);
    }

    #[test]
    fn paces_frames_by_configured_rate() {
        let queues = Arc::new(PipelineQueues::new(0, 0));
        let config = CaptureConfig { frame_rate: 10, ..CaptureConfig::default() };
        let (worker, controller) =
            CaptureWorker::new(Box::new(SyntheticGrabber::new(32, 32)), Arc::clone(&queues), &config);

        let (tx, _rx) = unbounded();
        let cell = WorkerCell::new("capture", worker, tx);
        let handle = cell.handle();
        let join = cell.spawn().unwrap().unwrap();

        controller.start_capturing();
        std::thread::sleep(Duration::from_millis(550));
        controller.stop_capturing();

        // 10 fps over ~550 ms: at most ~7 frames even with jitter.
        let produced = queues.capture_queue().size();
        assert!(produced >= 3, "expected a few frames, got {produced}");
        assert!(produced <= 8, "pacing failed, got {produced}");

        handle.stop(true);
        join.join().unwrap();
    }

    #[test]
    fn drops_newest_when_queue_full() {
        let queues = Arc::new(PipelineQueues::new(2, 0));
        let config = CaptureConfig { frame_rate: 120, ..CaptureConfig::default() };
        let (worker, controller) =
            CaptureWorker::new(Box::new(SyntheticGrabber::new(32, 32)), Arc::clone(&queues), &config);

        let (tx, _rx) = unbounded();
        let cell = WorkerCell::new("capture", worker, tx);
        let handle = cell.handle();
        let join = cell.spawn().unwrap().unwrap();

        controller.start_capturing();
        assert!(wait_until(Duration::from_secs(3), || controller.stats().dropped_frames > 0));
        controller.stop_capturing();

        assert_eq!(queues.capture_queue().size(), 2);
        assert!(queues.capture_queue().total_dropped() > 0);

        handle.stop(true);
        join.join().unwrap();
    }

    #[test]
    fn grab_failures_enter_recovery_mode() {
        let queues = Arc::new(PipelineQueues::new(0, 0));
        let config = CaptureConfig { frame_rate: 120, ..CaptureConfig::default() };
        let (worker, controller) =
            CaptureWorker::new(Box::new(FailingGrabber), Arc::clone(&queues), &config);

        let (tx, _rx) = unbounded();
        let cell = WorkerCell::new("capture", worker, tx);
        let handle = cell.handle();
        let join = cell.spawn().unwrap().unwrap();

        controller.start_capturing();
        assert!(wait_until(Duration::from_secs(5), || controller.stats().recovery_mode));
        assert!(controller.stats().error_count > u64::from(MAX_ERROR_STREAK));
        assert_eq!(controller.stats().total_frames_captured, 0);

        handle.stop(true);
        join.join().unwrap();
    }

    #[test]
    fn config_updates_are_normalized() {
        let queues = Arc::new(PipelineQueues::new(0, 0));
        let (_, controller) = CaptureWorker::new(
            Box::new(SyntheticGrabber::default()),
            queues,
            &CaptureConfig::default(),
        );

        controller.set_config(&CaptureConfig { frame_rate: 999, ..CaptureConfig::default() });
        assert_eq!(controller.config().frame_rate, 120);
    }

    #[test]
    fn start_stop_capturing_is_idempotent() {
        let queues = Arc::new(PipelineQueues::new(0, 0));
        let (_, controller) = CaptureWorker::new(
            Box::new(SyntheticGrabber::default()),
            queues,
            &CaptureConfig::default(),
        );
        controller.start_capturing();
        controller.start_capturing();
        assert!(controller.is_capturing());
        controller.stop_capturing();
        controller.stop_capturing();
        assert!(!controller.is_capturing());
    }

    #[test]
    fn worker_start_command_begins_capture() {
        let queues = Arc::new(PipelineQueues::new(0, 0));
        let config = CaptureConfig { frame_rate: 120, ..CaptureConfig::default() };
        let (worker, controller) =
            CaptureWorker::new(Box::new(SyntheticGrabber::new(32, 32)), Arc::clone(&queues), &config);

        let (tx, rx) = unbounded();
        let cell = WorkerCell::new("capture", worker, tx);
        let commander = cell.commander();
        let handle = cell.handle();
        let join = cell.spawn().unwrap().unwrap();

        // Wait for the loop to be live before posting.
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline && !handle.is_running() {
            std::thread::sleep(Duration::from_millis(5));
        }
        commander.send(CaptureCommand::Start).unwrap();
        assert!(wait_until(Duration::from_secs(3), || !queues.capture_queue().is_empty()));
        assert!(controller.is_capturing());

        commander.send(CaptureCommand::Stop).unwrap();
        assert!(wait_until(Duration::from_secs(2), || !controller.is_capturing()));

        handle.stop(true);
        join.join().unwrap();
        drop(rx);
    }
}
