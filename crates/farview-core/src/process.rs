//! Frame processing stage.
//!
//! The [`ProcessWorker`] drains raw frames from the capture queue in small
//! batches, encodes them in parallel on the rayon pool, and pushes the
//! results into the processed queue. Frames that aged past the staleness
//! bound are discarded rather than encoded — a remote-desktop viewer wants
//! fresh pixels, not a complete history.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::encode::{DEFAULT_JPEG_QUALITY, encode_frame};
use crate::frame::{EncodedFrame, RawFrame};
use crate::queues::PipelineQueues;
use crate::sync::lock;
use crate::worker::{Worker, WorkerContext};

/// Bound on the blocking wait for the first frame of a batch.
const FIRST_FRAME_WAIT: Duration = Duration::from_millis(100);
/// Hard cap on batch size regardless of parallelism.
const MAX_BATCH: usize = 10;

/// Processing configuration.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// JPEG quality, `1..=100`.
    pub jpeg_quality: u8,
    /// Frames older than this at encode time are dropped.
    pub stale_after: Duration,
    /// Parallel encode width; defaults to the hardware concurrency.
    pub parallelism: usize,
    /// Statistics emission interval.
    pub stats_interval: Duration,
    /// Average-latency threshold for warnings, in milliseconds.
    pub max_latency_warn_ms: f64,
    /// Minimum healthy processing rate in frames per second.
    pub min_rate_warn: f64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        let parallelism =
            std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get);
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            stale_after: Duration::from_millis(5000),
            parallelism,
            stats_interval: Duration::from_secs(1),
            max_latency_warn_ms: 100.0,
            min_rate_warn: 10.0,
        }
    }
}

impl ProcessConfig {
    /// Batch size derived from the parallelism degree: `min(2·N, 10)`.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        (self.parallelism * 2).clamp(1, MAX_BATCH)
    }
}

/// Processing statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct ProcessingStats {
    /// Frames successfully encoded and enqueued.
    pub processed_frames: u64,
    /// Frames dropped (stale, encode failure, or stopped output queue).
    pub dropped_frames: u64,
    /// Accumulated batch processing time.
    pub total_processing_time: Duration,
    /// Mean per-frame processing latency in milliseconds.
    pub average_latency_ms: f64,
    /// Throughput over the last stats interval, frames per second.
    pub processing_rate: f64,
}

impl std::fmt::Display for ProcessingStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "processed: {}, dropped: {}, avg latency: {:.2} ms, rate: {:.2} fps",
            self.processed_frames, self.dropped_frames, self.average_latency_ms,
            self.processing_rate
        )
    }
}

/// Events emitted by the processing stage.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// Periodic statistics snapshot.
    StatsUpdated(ProcessingStats),
    /// Latency or throughput fell outside the healthy envelope.
    Warning(String),
}

/// Commands posted to a running [`ProcessWorker`].
#[derive(Debug, Clone)]
pub enum ProcessCommand {
    /// Halt processing, clear both queues and zero the statistics. Used
    /// when the client disconnects.
    StopAndClearQueues,
    /// Resume processing after a halt.
    ResumeProcessing,
}

struct ProcessShared {
    halted: AtomicBool,
    stats: Mutex<StatsInner>,
}

#[derive(Default)]
struct StatsInner {
    processed: u64,
    dropped: u64,
    total_time: Duration,
    rate: f64,
    rate_window_processed: u64,
}

/// Read-only statistics view over a processing worker.
#[derive(Clone)]
pub struct ProcessController {
    shared: Arc<ProcessShared>,
}

impl ProcessController {
    /// Statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> ProcessingStats {
        snapshot(&lock(&self.shared.stats))
    }

    /// `true` while processing is halted by a
    /// [`ProcessCommand::StopAndClearQueues`].
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.shared.halted.load(Ordering::SeqCst)
    }
}

fn snapshot(inner: &StatsInner) -> ProcessingStats {
    let attempts = inner.processed + inner.dropped;
    let average_latency_ms = if attempts > 0 {
        inner.total_time.as_secs_f64() * 1000.0 / attempts as f64
    } else {
        0.0
    };
    ProcessingStats {
        processed_frames: inner.processed,
        dropped_frames: inner.dropped,
        total_processing_time: inner.total_time,
        average_latency_ms,
        processing_rate: inner.rate,
    }
}

/// Batch-parallel frame encoder.
pub struct ProcessWorker {
    queues: Arc<PipelineQueues>,
    config: ProcessConfig,
    events: Sender<ProcessEvent>,
    shared: Arc<ProcessShared>,
    last_stats_emit: Instant,
}

impl ProcessWorker {
    /// Build a processing worker over the pipeline queues.
    ///
    /// `events` receives periodic [`ProcessEvent::StatsUpdated`] and
    /// health warnings.
    #[must_use]
    pub fn new(
        queues: Arc<PipelineQueues>,
        config: ProcessConfig,
        events: Sender<ProcessEvent>,
    ) -> (Self, ProcessController) {
        let shared =
            Arc::new(ProcessShared { halted: AtomicBool::new(false), stats: Mutex::new(StatsInner::default()) });
        let controller = ProcessController { shared: Arc::clone(&shared) };
        let worker =
            Self { queues, config, events, shared, last_stats_emit: Instant::now() };
        (worker, controller)
    }

    fn collect_batch(&self) -> Vec<RawFrame> {
        let capture = self.queues.capture_queue();
        let Some(first) = capture.dequeue_timeout(FIRST_FRAME_WAIT) else {
            return Vec::new();
        };
        let mut batch = Vec::with_capacity(self.config.batch_size());
        batch.push(first);
        while batch.len() < self.config.batch_size() {
            match capture.try_dequeue() {
                Some(frame) => batch.push(frame),
                None => break,
            }
        }
        batch
    }

    fn process_batch(&mut self, batch: Vec<RawFrame>) {
        let started = Instant::now();
        let stale_after = self.config.stale_after;
        let quality = self.config.jpeg_quality;

        let encoded: Vec<Option<EncodedFrame>> = batch
            .into_par_iter()
            .map(|frame| {
                if !frame.is_valid() {
                    tracing::warn!(frame_id = frame.frame_id, "invalid frame discarded");
                    return None;
                }
                if frame.latency() > stale_after {
                    tracing::debug!(
                        frame_id = frame.frame_id,
                        age_ms = frame.latency().as_millis() as u64,
                        "stale frame discarded"
                    );
                    return None;
                }
                match encode_frame(&frame, quality) {
                    Ok(encoded) => Some(encoded),
                    Err(error) => {
                        tracing::warn!(frame_id = frame.frame_id, %error, "encode failed");
                        None
                    },
                }
            })
            .collect();

        let elapsed = started.elapsed();
        let mut stats = lock(&self.shared.stats);
        stats.total_time += elapsed;
        for result in encoded {
            match result {
                Some(frame) => {
                    if self.queues.processed_queue().try_enqueue(frame) {
                        stats.processed += 1;
                        stats.rate_window_processed += 1;
                    } else {
                        stats.dropped += 1;
                    }
                },
                None => stats.dropped += 1,
            }
        }
    }

    fn maybe_emit_stats(&mut self) {
        if self.last_stats_emit.elapsed() < self.config.stats_interval {
            return;
        }
        let interval = self.last_stats_emit.elapsed();
        self.last_stats_emit = Instant::now();

        let stats = {
            let mut inner = lock(&self.shared.stats);
            inner.rate = inner.rate_window_processed as f64 / interval.as_secs_f64();
            inner.rate_window_processed = 0;
            snapshot(&inner)
        };

        if stats.average_latency_ms > self.config.max_latency_warn_ms {
            let _ = self.events.send(ProcessEvent::Warning(format!(
                "processing latency high: {:.2} ms",
                stats.average_latency_ms
            )));
        }
        if stats.processing_rate < self.config.min_rate_warn && stats.processed_frames > 10 {
            let _ = self.events.send(ProcessEvent::Warning(format!(
                "processing rate low: {:.2} fps",
                stats.processing_rate
            )));
        }
        let _ = self.events.send(ProcessEvent::StatsUpdated(stats));
    }

    fn stop_and_clear(&mut self) {
        self.shared.halted.store(true, Ordering::SeqCst);
        self.queues.clear(crate::queues::QueueKind::Capture);
        self.queues.clear(crate::queues::QueueKind::Processed);
        {
            let mut stats = lock(&self.shared.stats);
            *stats = StatsInner::default();
        }
        let _ = self.events.send(ProcessEvent::StatsUpdated(ProcessingStats::default()));
        tracing::debug!("processing halted, queues cleared");
    }

    fn resume(&mut self) {
        self.shared.halted.store(false, Ordering::SeqCst);
        self.last_stats_emit = Instant::now();
        tracing::debug!("processing resumed");
    }
}

impl Worker for ProcessWorker {
    type Command = ProcessCommand;

    fn process_task(&mut self, ctx: &WorkerContext) {
        if self.shared.halted.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(5));
            return;
        }

        let batch = self.collect_batch();
        if ctx.should_stop() {
            return;
        }
        if !batch.is_empty() {
            self.process_batch(batch);
        }
        self.maybe_emit_stats();
    }

    fn handle_command(&mut self, command: ProcessCommand) {
        match command {
            ProcessCommand::StopAndClearQueues => self.stop_and_clear(),
            ProcessCommand::ResumeProcessing => self.resume(),
        }
    }
}
