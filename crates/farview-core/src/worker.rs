//! Generic worker runtime.
//!
//! A [`Worker`] is a cooperative long-running task pinned to its own OS
//! thread. The runtime owns the lifecycle state machine, the pause gate,
//! stop handling and per-worker performance accounting; concrete workers
//! implement [`Worker::process_task`] plus a typed command enum for
//! cross-thread posting.
//!
//! State machine (the only transitions allowed):
//!
//! ```text
//! Stopped  → Starting   (spawn)
//! Starting → Running    (initialize succeeded, entering loop)
//! Starting → Stopped    (initialize failed; error reported)
//! Running  ↔ Paused     (pause gate)
//! Running  → Stopping   (stop requested)
//! Paused   → Stopping   (stop unblocks the gate)
//! Stopping → Stopped    (cleanup completed, `Stopped` event emitted)
//! ```
//!
//! `Stopped` is emitted exactly once per lifetime; both the normal loop
//! exit and the panic path funnel through the same shutdown sequence.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use thiserror::Error;

use crate::sync::{lock, wait_timeout};

/// Pause-gate re-check period, keeps stop latency low while parked.
const PAUSE_RECHECK: Duration = Duration::from_millis(50);
/// Inter-iteration yield, keeps the loop responsive to stop requests.
const LOOP_YIELD: Duration = Duration::from_millis(1);
/// Stop-poll period used by [`WorkerHandle::stop`].
const STOP_POLL: Duration = Duration::from_millis(10);
/// Stop budget when the caller waits for the current task to finish.
const STOP_BUDGET_WAIT: Duration = Duration::from_millis(2000);
/// Stop budget for a non-waiting stop.
const STOP_BUDGET_NOWAIT: Duration = Duration::from_millis(500);

/// Worker lifecycle errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// `initialize` failed; the worker went straight back to `Stopped`.
    #[error("worker initialization failed: {0}")]
    InitializationFailed(String),
}

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Not running. Initial and terminal state.
    Stopped,
    /// Spawn accepted, `initialize` not yet complete.
    Starting,
    /// Task loop active.
    Running,
    /// Parked at the pause gate.
    Paused,
    /// Stop requested, shutdown in progress.
    Stopping,
}

impl WorkerState {
    fn to_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Paused => 3,
            Self::Stopping => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Paused,
            4 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Lifecycle events emitted by the runtime on the worker's event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// `initialize` succeeded, the task loop is live.
    Started,
    /// The worker reached `Stopped`. Emitted exactly once per lifetime.
    Stopped,
    /// The task loop parked at the pause gate.
    Paused,
    /// The task loop left the pause gate.
    Resumed,
    /// A recoverable or fatal error was reported.
    Error(String),
}

/// Performance counters maintained around each `process_task` call.
#[derive(Debug, Clone, Default)]
pub struct PerformanceStats {
    /// Completed `process_task` invocations.
    pub total_processed_items: u64,
    /// Accumulated `process_task` time.
    pub total_processing_time: Duration,
    /// Mean `process_task` time.
    pub average_processing_time: Duration,
    /// Longest single `process_task`.
    pub max_processing_time: Duration,
    /// Shortest single `process_task`; `None` until something ran.
    pub min_processing_time: Option<Duration>,
    /// Items per second derived from uptime.
    pub items_per_second: f64,
    /// Time since the worker entered `Running`.
    pub uptime: Duration,
}

#[derive(Default, Debug)]
struct StatsInner {
    items: u64,
    total: Duration,
    max: Duration,
    min: Option<Duration>,
    started_at: Option<Instant>,
}

/// Shared control block between a worker thread and its handles.
#[derive(Debug)]
struct ControlBlock {
    name: String,
    state: AtomicU8,
    stop_requested: AtomicBool,
    pause_requested: AtomicBool,
    stopped_emitted: AtomicBool,
    pause_mutex: Mutex<()>,
    pause_cond: Condvar,
    stats: Mutex<StatsInner>,
    events: Sender<(String, WorkerEvent)>,
}

impl ControlBlock {
    fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    fn emit(&self, event: WorkerEvent) {
        // Receiver may be gone during shutdown; events are best-effort.
        let _ = self.events.send((self.name.clone(), event));
    }

    fn should_stop(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

/// Execution context handed to `process_task`.
///
/// Long task bodies use [`WorkerContext::should_stop`] to bail out early
/// when a stop was requested mid-task.
pub struct WorkerContext {
    control: Arc<ControlBlock>,
}

impl WorkerContext {
    /// `true` once a stop has been requested.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.control.should_stop()
    }

    /// Name this worker is registered under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.control.name
    }
}

/// A cooperative long-running task.
///
/// Implementations keep `process_task` bounded: every internal wait must
/// carry a timeout well under the stop budget, or the worker will be
/// reported as failing to stop.
pub trait Worker: Send + 'static {
    /// Commands other threads may post to this worker.
    type Command: Send + 'static;

    /// One-time setup on the worker thread. A failure aborts startup.
    fn initialize(&mut self) -> Result<(), WorkerError> {
        Ok(())
    }

    /// One unit of work. Called repeatedly by the task loop.
    fn process_task(&mut self, ctx: &WorkerContext);

    /// Handle a posted command. Runs between `process_task` calls and
    /// inside the pause gate.
    fn handle_command(&mut self, command: Self::Command);

    /// Teardown on the worker thread, runs on every shutdown path.
    fn cleanup(&mut self) {}
}

/// Cloneable, command-agnostic control surface for a worker.
#[derive(Clone, Debug)]
pub struct WorkerHandle {
    control: Arc<ControlBlock>,
}

impl WorkerHandle {
    /// Registered worker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.control.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.control.state()
    }

    /// `true` in `Starting` or `Running`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.state(), WorkerState::Starting | WorkerState::Running)
    }

    /// `true` in `Paused`.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state() == WorkerState::Paused
    }

    /// `true` only in `Stopped` (`Stopping` is not stopped yet).
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state() == WorkerState::Stopped
    }

    /// Request a pause. Cooperative: the state changes when the task loop
    /// reaches the pause gate. No-op while a stop is pending.
    pub fn pause(&self) {
        if self.control.should_stop() {
            return;
        }
        self.control.pause_requested.store(true, Ordering::SeqCst);
    }

    /// Clear a pause request and wake the gate.
    pub fn resume(&self) {
        self.control.pause_requested.store(false, Ordering::SeqCst);
        self.control.pause_cond.notify_all();
    }

    /// Request a stop and wait for it to take effect, bounded by the stop
    /// budget (2000 ms, or 500 ms when `wait_for_finish` is false).
    ///
    /// Returns whether the worker reached `Stopped` within the budget.
    /// Idempotent during `Stopping`; `true` immediately when already
    /// stopped.
    pub fn stop(&self, wait_for_finish: bool) -> bool {
        let state = self.control.state();
        if state == WorkerState::Stopped {
            return true;
        }

        self.control.stop_requested.store(true, Ordering::SeqCst);
        if matches!(state, WorkerState::Running | WorkerState::Paused) {
            self.control.set_state(WorkerState::Stopping);
        }
        // Unblock the pause gate so the loop can observe the request.
        self.control.pause_cond.notify_all();

        let budget = if wait_for_finish { STOP_BUDGET_WAIT } else { STOP_BUDGET_NOWAIT };
        let deadline = Instant::now() + budget;
        while Instant::now() < deadline {
            if self.is_stopped() {
                return true;
            }
            std::thread::sleep(STOP_POLL);
        }
        self.is_stopped()
    }

    /// Snapshot the performance counters.
    #[must_use]
    pub fn performance_stats(&self) -> PerformanceStats {
        let stats = lock(&self.control.stats);
        let uptime = stats.started_at.map_or(Duration::ZERO, |t| t.elapsed());
        let average = if stats.items > 0 { stats.total / stats.items as u32 } else { Duration::ZERO };
        let items_per_second = if uptime.as_secs_f64() > 0.0 {
            stats.items as f64 / uptime.as_secs_f64()
        } else {
            0.0
        };
        PerformanceStats {
            total_processed_items: stats.items,
            total_processing_time: stats.total,
            average_processing_time: average,
            max_processing_time: stats.max,
            min_processing_time: stats.min,
            items_per_second,
            uptime,
        }
    }

    /// Zero the performance counters (uptime start is preserved).
    pub fn reset_performance_stats(&self) {
        let mut stats = lock(&self.control.stats);
        let started_at = stats.started_at;
        *stats = StatsInner { started_at, ..StatsInner::default() };
    }
}

/// A worker plus everything needed to (re)run it on a thread.
///
/// The cell owns the worker instance across restarts: when the thread
/// function returns, the worker stays inside the cell and a later
/// [`WorkerCell::spawn`] runs the same instance again.
pub struct WorkerCell<W: Worker> {
    runtime: Arc<Mutex<RuntimeState<W>>>,
    control: Arc<ControlBlock>,
    commands: Sender<W::Command>,
}

struct RuntimeState<W: Worker> {
    worker: W,
    commands: Receiver<W::Command>,
}

impl<W: Worker> WorkerCell<W> {
    /// Build a cell for `worker`. Lifecycle events are delivered on
    /// `events` tagged with `name`.
    pub fn new(name: &str, worker: W, events: Sender<(String, WorkerEvent)>) -> Self {
        let (command_tx, command_rx) = unbounded();
        Self {
            runtime: Arc::new(Mutex::new(RuntimeState { worker, commands: command_rx })),
            control: Arc::new(ControlBlock {
                name: name.to_string(),
                state: AtomicU8::new(WorkerState::Stopped.to_u8()),
                stop_requested: AtomicBool::new(false),
                pause_requested: AtomicBool::new(false),
                stopped_emitted: AtomicBool::new(false),
                pause_mutex: Mutex::new(()),
                pause_cond: Condvar::new(),
                stats: Mutex::new(StatsInner::default()),
                events,
            }),
            commands: command_tx,
        }
    }

    /// Control surface for this worker.
    #[must_use]
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle { control: Arc::clone(&self.control) }
    }

    /// Command sender for cross-thread posting.
    #[must_use]
    pub fn commander(&self) -> Sender<W::Command> {
        self.commands.clone()
    }

    /// Spawn the worker thread and run one lifecycle.
    ///
    /// Only legal from `Stopped`; returns `None` without spawning when the
    /// worker is in any other state. Flags and stats are reset so events
    /// fire exactly once per lifetime.
    pub fn spawn(&self) -> Option<std::io::Result<JoinHandle<()>>> {
        if self.control.state() != WorkerState::Stopped {
            return None;
        }
        self.control.set_state(WorkerState::Starting);
        self.control.stop_requested.store(false, Ordering::SeqCst);
        self.control.pause_requested.store(false, Ordering::SeqCst);
        self.control.stopped_emitted.store(false, Ordering::SeqCst);
        {
            let mut stats = lock(&self.control.stats);
            *stats = StatsInner::default();
        }

        let runtime = Arc::clone(&self.runtime);
        let control = Arc::clone(&self.control);
        let result = std::thread::Builder::new()
            .name(self.control.name.clone())
            .spawn(move || {
                let mut state = lock(&runtime);
                run_lifecycle(&mut *state, &control);
            });
        Some(result)
    }
}

/// One full lifecycle on the worker thread: initialize, loop, shutdown.
fn run_lifecycle<W: Worker>(state: &mut RuntimeState<W>, control: &Arc<ControlBlock>) {
    let init = catch_unwind(AssertUnwindSafe(|| state.worker.initialize()));
    match init {
        Ok(Ok(())) => {},
        Ok(Err(error)) => {
            tracing::warn!(worker = %control.name, %error, "worker initialization failed");
            control.emit(WorkerEvent::Error(error.to_string()));
            control.set_state(WorkerState::Stopped);
            return;
        },
        Err(_) => {
            tracing::error!(worker = %control.name, "worker initialization panicked");
            control.emit(WorkerEvent::Error("initialization panicked".to_string()));
            control.set_state(WorkerState::Stopped);
            return;
        },
    }

    control.set_state(WorkerState::Running);
    lock(&control.stats).started_at = Some(Instant::now());
    control.emit(WorkerEvent::Started);
    tracing::debug!(worker = %control.name, "worker entering task loop");

    work_loop(state, control);
    shutdown(state, control);
}

fn work_loop<W: Worker>(state: &mut RuntimeState<W>, control: &Arc<ControlBlock>) {
    let ctx = WorkerContext { control: Arc::clone(control) };
    loop {
        // Drain cross-thread commands posted since the last iteration.
        drain_commands(state);

        wait_if_paused(state, control);

        if control.should_stop() {
            break;
        }

        let started = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| state.worker.process_task(&ctx)));
        if let Err(payload) = outcome {
            let message = panic_message(payload.as_ref());
            tracing::error!(worker = %control.name, message, "task panicked, stopping worker");
            control.emit(WorkerEvent::Error(format!("task panicked: {message}")));
            break;
        }
        record_timing(control, started.elapsed());

        if control.should_stop() {
            break;
        }
        std::thread::sleep(LOOP_YIELD);
    }
}

fn drain_commands<W: Worker>(state: &mut RuntimeState<W>) {
    while let Ok(command) = state.commands.try_recv() {
        state.worker.handle_command(command);
    }
}

/// The pause gate. Parks the loop while a pause is requested, re-checking
/// every 50 ms so stop requests are noticed promptly. Commands keep being
/// serviced while parked.
fn wait_if_paused<W: Worker>(state: &mut RuntimeState<W>, control: &Arc<ControlBlock>) {
    if !control.pause_requested.load(Ordering::SeqCst) || control.should_stop() {
        return;
    }

    control.set_state(WorkerState::Paused);
    control.emit(WorkerEvent::Paused);
    tracing::debug!(worker = %control.name, "worker paused");

    while control.pause_requested.load(Ordering::SeqCst) && !control.should_stop() {
        drain_commands(state);
        let guard = lock(&control.pause_mutex);
        let (_guard, _) = wait_timeout(&control.pause_cond, guard, PAUSE_RECHECK);
    }

    if !control.should_stop() {
        control.set_state(WorkerState::Running);
        control.emit(WorkerEvent::Resumed);
        tracing::debug!(worker = %control.name, "worker resumed");
    }
}

/// Shutdown sequence shared by the normal-exit and panic paths. Emits
/// `Stopped` exactly once, guarded by `stopped_emitted`.
fn shutdown<W: Worker>(state: &mut RuntimeState<W>, control: &Arc<ControlBlock>) {
    control.set_state(WorkerState::Stopping);
    let cleanup = catch_unwind(AssertUnwindSafe(|| state.worker.cleanup()));
    if cleanup.is_err() {
        tracing::error!(worker = %control.name, "worker cleanup panicked");
        control.emit(WorkerEvent::Error("cleanup panicked".to_string()));
    }
    control.set_state(WorkerState::Stopped);
    if !control.stopped_emitted.swap(true, Ordering::SeqCst) {
        control.emit(WorkerEvent::Stopped);
    }
    tracing::debug!(worker = %control.name, "worker stopped");
}

fn record_timing(control: &ControlBlock, elapsed: Duration) {
    let mut stats = lock(&control.stats);
    stats.items += 1;
    stats.total += elapsed;
    if elapsed > stats.max {
        stats.max = elapsed;
    }
    stats.min = Some(stats.min.map_or(elapsed, |m| m.min(elapsed)));
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
