//! Process-wide worker registry.
//!
//! The [`ThreadManager`] exclusively owns every registered worker and its
//! thread. All lifecycle transitions go through it; callers keep only
//! non-owning [`WorkerHandle`]s and command senders. The registry lock
//! guards map bookkeeping only — it is never held across calls into a
//! worker.
//!
//! A supervisor thread pumps the shared worker event channel: it forwards
//! typed [`ThreadEvent`]s to the subscriber, performs delayed auto-restart
//! of workers that stopped without a stop request, and emits a periodic
//! performance-stats tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use thiserror::Error;

use crate::sync::lock;
use crate::worker::{PerformanceStats, Worker, WorkerCell, WorkerEvent, WorkerHandle, WorkerState};

/// Poll period for stop/exit waits.
const POLL: Duration = Duration::from_millis(10);
/// Ceiling for waiting on a worker to reach `Stopped` (waiting stop).
const STOP_CEILING_WAIT: Duration = Duration::from_millis(3500);
/// Ceiling for a non-waiting stop.
const STOP_CEILING_NOWAIT: Duration = Duration::from_millis(1500);
/// Budget for the underlying thread to exit after the worker stopped.
const THREAD_EXIT_BUDGET: Duration = Duration::from_millis(2000);
/// Grace period added to the thread-exit budget.
const THREAD_EXIT_GRACE: Duration = Duration::from_millis(500);
/// Delay before an auto-restart is attempted.
const RESTART_DELAY: Duration = Duration::from_millis(1000);
/// Default periodic stats interval.
const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(5);

/// Registry operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThreadError {
    /// A thread with this name already exists.
    #[error("thread name already exists: {0}")]
    DuplicateName(String),

    /// No thread registered under this name.
    #[error("unknown thread: {0}")]
    UnknownThread(String),

    /// The worker did not reach `Stopped` within the escalation budget.
    #[error("worker did not stop in time: {0}")]
    StopTimeout(String),

    /// The underlying OS thread did not exit within its budget.
    #[error("thread did not exit in time: {0}")]
    ThreadExitTimeout(String),

    /// Destroy refused because the thread is still running.
    #[error("thread still running: {0}")]
    StillRunning(String),

    /// OS thread spawn failed.
    #[error("failed to spawn thread: {0}")]
    Spawn(String),
}

/// Events emitted by the registry's supervisor.
#[derive(Debug, Clone)]
pub enum ThreadEvent {
    /// A worker entered its task loop.
    Started(String),
    /// A worker reached `Stopped`.
    Stopped(String),
    /// A worker parked at its pause gate.
    Paused(String),
    /// A worker left its pause gate.
    Resumed(String),
    /// A worker reported an error.
    Error {
        /// Worker name.
        name: String,
        /// Error description.
        message: String,
    },
    /// A worker was auto-restarted.
    Restarted {
        /// Worker name.
        name: String,
        /// Restart count so far.
        count: u32,
    },
    /// Periodic performance snapshot of all registered workers.
    StatsTick(Vec<(String, PerformanceStats)>),
}

/// Options for [`ThreadManager::create_thread`].
#[derive(Debug, Clone, Copy)]
pub struct CreateOptions {
    /// Start the worker immediately after registration.
    pub auto_start: bool,
    /// Restart the worker when it stops without a stop request.
    pub auto_restart: bool,
    /// Maximum auto-restarts; `-1` means unlimited.
    pub max_restarts: i32,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self { auto_start: false, auto_restart: false, max_restarts: 3 }
    }
}

/// Bookkeeping snapshot for one registered thread.
#[derive(Debug, Clone)]
pub struct ThreadInfo {
    /// Registered name.
    pub name: String,
    /// Current worker state.
    pub state: WorkerState,
    /// When the entry was registered.
    pub created_at: Instant,
    /// When the worker last entered its task loop, if ever.
    pub started_at: Option<Instant>,
    /// Auto-restarts performed so far.
    pub restart_count: u32,
    /// Whether auto-restart is enabled.
    pub auto_restart: bool,
}

/// Aggregate statistics over all registered threads.
#[derive(Debug, Clone, Default)]
pub struct ThreadManagerStats {
    /// Registered threads.
    pub total: usize,
    /// Threads in `Running` or `Starting`.
    pub running: usize,
    /// Threads in `Paused`.
    pub paused: usize,
    /// Threads in `Stopped` or `Stopping`.
    pub stopped: usize,
    /// Sum of worker uptimes.
    pub total_uptime: Duration,
    /// Mean worker uptime.
    pub average_uptime: Duration,
}

/// Type-erased view over a [`WorkerCell`] for registry storage.
trait CellControl: Send {
    #[allow(dead_code)]
    fn handle(&self) -> WorkerHandle;
    fn spawn(&self) -> Option<std::io::Result<JoinHandle<()>>>;
}

impl<W: Worker> CellControl for WorkerCell<W> {
    #[allow(dead_code)]
    fn handle(&self) -> WorkerHandle {
        WorkerCell::handle(self)
    }

    fn spawn(&self) -> Option<std::io::Result<JoinHandle<()>>> {
        WorkerCell::spawn(self)
    }
}

struct Entry {
    cell: Box<dyn CellControl>,
    handle: WorkerHandle,
    join: Option<JoinHandle<()>>,
    created_at: Instant,
    started_at: Option<Instant>,
    auto_restart: bool,
    restart_count: u32,
    max_restarts: i32,
    stop_requested: bool,
}

struct Registry {
    threads: Mutex<HashMap<String, Entry>>,
    worker_events_tx: Sender<(String, WorkerEvent)>,
    thread_events_tx: Sender<ThreadEvent>,
    shutdown: AtomicBool,
    monitoring_enabled: AtomicBool,
}

/// Process-wide registry owning workers and their threads.
pub struct ThreadManager {
    registry: Arc<Registry>,
    thread_events_rx: Receiver<ThreadEvent>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    monitor_interval: Duration,
}

impl ThreadManager {
    /// Create a registry with the default 5 s monitoring interval.
    #[must_use]
    pub fn new() -> Self {
        Self::with_monitor_interval(DEFAULT_MONITOR_INTERVAL)
    }

    /// Create a registry with a custom performance-stats interval.
    #[must_use]
    pub fn with_monitor_interval(monitor_interval: Duration) -> Self {
        let (worker_tx, worker_rx) = unbounded();
        let (thread_tx, thread_rx) = unbounded();
        let registry = Arc::new(Registry {
            threads: Mutex::new(HashMap::new()),
            worker_events_tx: worker_tx,
            thread_events_tx: thread_tx,
            shutdown: AtomicBool::new(false),
            monitoring_enabled: AtomicBool::new(true),
        });

        let supervisor = {
            let registry = Arc::clone(&registry);
            std::thread::Builder::new()
                .name("thread-manager-supervisor".to_string())
                .spawn(move || supervise(&registry, &worker_rx, monitor_interval))
                .ok()
        };

        Self {
            registry,
            thread_events_rx: thread_rx,
            supervisor: Mutex::new(supervisor),
            monitor_interval,
        }
    }

    /// Receiver for [`ThreadEvent`]s.
    #[must_use]
    pub fn events(&self) -> &Receiver<ThreadEvent> {
        &self.thread_events_rx
    }

    /// Enable or disable the periodic stats tick.
    pub fn set_monitoring_enabled(&self, enabled: bool) {
        self.registry.monitoring_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Configured stats interval.
    #[must_use]
    pub fn monitor_interval(&self) -> Duration {
        self.monitor_interval
    }

    /// Register a worker under a unique `name` and take ownership of it.
    ///
    /// Returns the control handle and the typed command sender. With
    /// `opts.auto_start` the worker thread is spawned before returning.
    pub fn create_thread<W: Worker>(
        &self,
        name: &str,
        worker: W,
        opts: CreateOptions,
    ) -> Result<(WorkerHandle, Sender<W::Command>), ThreadError> {
        let cell = WorkerCell::new(name, worker, self.registry.worker_events_tx.clone());
        let handle = cell.handle();
        let commander = cell.commander();

        {
            let mut threads = lock(&self.registry.threads);
            if threads.contains_key(name) {
                return Err(ThreadError::DuplicateName(name.to_string()));
            }
            threads.insert(name.to_string(), Entry {
                cell: Box::new(cell),
                handle: handle.clone(),
                join: None,
                created_at: Instant::now(),
                started_at: None,
                auto_restart: opts.auto_restart,
                restart_count: 0,
                max_restarts: opts.max_restarts,
                stop_requested: false,
            });
        }
        tracing::debug!(thread = name, "thread registered");

        if opts.auto_start {
            if let Err(error) = self.start_thread(name) {
                let mut threads = lock(&self.registry.threads);
                threads.remove(name);
                return Err(error);
            }
        }

        Ok((handle, commander))
    }

    /// Spawn the named worker's thread. No-op when already running.
    pub fn start_thread(&self, name: &str) -> Result<(), ThreadError> {
        let mut threads = lock(&self.registry.threads);
        let entry = threads.get_mut(name).ok_or_else(|| ThreadError::UnknownThread(name.to_string()))?;
        if !entry.handle.is_stopped() {
            return Ok(());
        }
        entry.stop_requested = false;
        match entry.cell.spawn() {
            Some(Ok(join)) => {
                entry.join = Some(join);
                entry.started_at = Some(Instant::now());
                Ok(())
            },
            Some(Err(error)) => Err(ThreadError::Spawn(error.to_string())),
            // Raced into a non-stopped state; treat as already started.
            None => Ok(()),
        }
    }

    /// Stop the named worker and wait for its thread to exit, bounded.
    ///
    /// Marks the entry so auto-restart is suppressed, requests the stop
    /// (without holding the registry lock), then polls the worker state up
    /// to the ceiling and the thread exit up to its own budget.
    pub fn stop_thread(&self, name: &str, wait_for_finish: bool) -> Result<(), ThreadError> {
        let handle = {
            let mut threads = lock(&self.registry.threads);
            let entry =
                threads.get_mut(name).ok_or_else(|| ThreadError::UnknownThread(name.to_string()))?;
            entry.stop_requested = true;
            entry.handle.clone()
        };

        let ceiling = if wait_for_finish { STOP_CEILING_WAIT } else { STOP_CEILING_NOWAIT };
        let deadline = Instant::now() + ceiling;

        // Safe outside the lock: only sets flags and wakes the pause gate.
        handle.stop(wait_for_finish);
        while !handle.is_stopped() {
            if Instant::now() >= deadline {
                return Err(ThreadError::StopTimeout(name.to_string()));
            }
            std::thread::sleep(POLL);
        }

        // Worker is stopped; give the thread itself a bounded exit window.
        let exit_deadline = Instant::now() + THREAD_EXIT_BUDGET + THREAD_EXIT_GRACE;
        loop {
            let finished = {
                let threads = lock(&self.registry.threads);
                match threads.get(name) {
                    Some(entry) => entry.join.as_ref().is_none_or(JoinHandle::is_finished),
                    None => true,
                }
            };
            if finished {
                break;
            }
            if Instant::now() >= exit_deadline {
                return Err(ThreadError::ThreadExitTimeout(name.to_string()));
            }
            std::thread::sleep(POLL);
        }

        // Reap the join handle.
        let join = {
            let mut threads = lock(&self.registry.threads);
            threads.get_mut(name).and_then(|entry| entry.join.take())
        };
        if let Some(join) = join {
            let _ = join.join();
        }
        tracing::debug!(thread = name, "thread stopped");
        Ok(())
    }

    /// Request a pause of the named worker.
    pub fn pause_thread(&self, name: &str) -> Result<(), ThreadError> {
        self.with_handle(name, |handle| handle.pause())
    }

    /// Resume the named worker.
    pub fn resume_thread(&self, name: &str) -> Result<(), ThreadError> {
        self.with_handle(name, |handle| handle.resume())
    }

    /// Stop, then start the named worker again.
    pub fn restart_thread(&self, name: &str) -> Result<(), ThreadError> {
        self.stop_thread(name, true)?;
        self.start_thread(name)
    }

    /// Stop (if needed) and deregister the named worker.
    ///
    /// Never deletes a still-running thread: if the stop misses its budget
    /// the entry is left intact and an error is returned so the caller can
    /// retry.
    pub fn destroy_thread(&self, name: &str) -> Result<(), ThreadError> {
        let running = {
            let threads = lock(&self.registry.threads);
            let entry =
                threads.get(name).ok_or_else(|| ThreadError::UnknownThread(name.to_string()))?;
            !entry.handle.is_stopped()
                || entry.join.as_ref().is_some_and(|join| !join.is_finished())
        };

        if running {
            match self.stop_thread(name, true) {
                Ok(()) => {},
                Err(ThreadError::UnknownThread(_)) => {},
                Err(_) => return Err(ThreadError::StillRunning(name.to_string())),
            }
        }

        let mut threads = lock(&self.registry.threads);
        let entry = threads.remove(name).ok_or_else(|| ThreadError::UnknownThread(name.to_string()))?;
        // Re-check under the lock; a racing start must not be deleted.
        if !entry.handle.is_stopped() {
            threads.insert(name.to_string(), entry);
            return Err(ThreadError::StillRunning(name.to_string()));
        }
        drop(threads);
        tracing::debug!(thread = name, "thread destroyed");
        Ok(())
    }

    /// Start every registered worker.
    pub fn start_all(&self) {
        for name in self.thread_names() {
            if let Err(error) = self.start_thread(&name) {
                tracing::warn!(thread = %name, %error, "start_all: failed to start");
            }
        }
    }

    /// Stop every registered worker.
    pub fn stop_all(&self, wait_for_finish: bool) {
        for name in self.thread_names() {
            if let Err(error) = self.stop_thread(&name, wait_for_finish) {
                tracing::warn!(thread = %name, %error, "stop_all: failed to stop");
            }
        }
    }

    /// Pause every registered worker.
    pub fn pause_all(&self) {
        for name in self.thread_names() {
            let _ = self.pause_thread(&name);
        }
    }

    /// Resume every registered worker.
    pub fn resume_all(&self) {
        for name in self.thread_names() {
            let _ = self.resume_thread(&name);
        }
    }

    /// Stop and deregister every worker. Entries that refuse to stop are
    /// kept, mirroring [`ThreadManager::destroy_thread`].
    pub fn destroy_all(&self) {
        for name in self.thread_names() {
            if let Err(error) = self.destroy_thread(&name) {
                tracing::warn!(thread = %name, %error, "destroy_all: failed to destroy");
            }
        }
    }

    /// `true` when a worker is registered under `name`.
    #[must_use]
    pub fn has_thread(&self, name: &str) -> bool {
        lock(&self.registry.threads).contains_key(name)
    }

    /// `true` when the named worker is in `Starting` or `Running`.
    #[must_use]
    pub fn is_thread_running(&self, name: &str) -> bool {
        lock(&self.registry.threads).get(name).is_some_and(|entry| entry.handle.is_running())
    }

    /// Control handle of the named worker.
    #[must_use]
    pub fn worker_handle(&self, name: &str) -> Option<WorkerHandle> {
        lock(&self.registry.threads).get(name).map(|entry| entry.handle.clone())
    }

    /// Names of all registered workers.
    #[must_use]
    pub fn thread_names(&self) -> Vec<String> {
        lock(&self.registry.threads).keys().cloned().collect()
    }

    /// Restart count of the named worker.
    #[must_use]
    pub fn restart_count(&self, name: &str) -> Option<u32> {
        lock(&self.registry.threads).get(name).map(|entry| entry.restart_count)
    }

    /// Bookkeeping snapshot of the named worker.
    #[must_use]
    pub fn thread_info(&self, name: &str) -> Option<ThreadInfo> {
        lock(&self.registry.threads).get(name).map(|entry| ThreadInfo {
            name: name.to_string(),
            state: entry.handle.state(),
            created_at: entry.created_at,
            started_at: entry.started_at,
            restart_count: entry.restart_count,
            auto_restart: entry.auto_restart,
        })
    }

    /// Aggregate statistics over all registered workers.
    #[must_use]
    pub fn thread_stats(&self) -> ThreadManagerStats {
        let threads = lock(&self.registry.threads);
        let mut stats = ThreadManagerStats { total: threads.len(), ..ThreadManagerStats::default() };
        for entry in threads.values() {
            match entry.handle.state() {
                WorkerState::Running | WorkerState::Starting => stats.running += 1,
                WorkerState::Paused => stats.paused += 1,
                WorkerState::Stopped | WorkerState::Stopping => stats.stopped += 1,
            }
            stats.total_uptime += entry.handle.performance_stats().uptime;
        }
        if stats.total > 0 {
            stats.average_uptime = stats.total_uptime / stats.total as u32;
        }
        stats
    }

    /// Shut down the supervisor thread. Registered workers are untouched;
    /// call [`ThreadManager::destroy_all`] first for a full teardown.
    pub fn shutdown(&self) {
        self.registry.shutdown.store(true, Ordering::SeqCst);
        let join = lock(&self.supervisor).take();
        if let Some(join) = join {
            let _ = join.join();
        }
    }

    fn with_handle(
        &self,
        name: &str,
        f: impl FnOnce(&WorkerHandle),
    ) -> Result<(), ThreadError> {
        let handle = self
            .worker_handle(name)
            .ok_or_else(|| ThreadError::UnknownThread(name.to_string()))?;
        f(&handle);
        Ok(())
    }
}

impl Default for ThreadManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadManager {
    fn drop(&mut self) {
        self.destroy_all();
        self.shutdown();
    }
}

/// Supervisor loop: forwards worker events, schedules auto-restarts and
/// emits the periodic stats tick.
fn supervise(
    registry: &Arc<Registry>,
    worker_events: &Receiver<(String, WorkerEvent)>,
    monitor_interval: Duration,
) {
    let mut pending_restarts: Vec<(Instant, String)> = Vec::new();
    let mut next_tick = Instant::now() + monitor_interval;

    loop {
        if registry.shutdown.load(Ordering::SeqCst) {
            break;
        }

        match worker_events.recv_timeout(Duration::from_millis(50)) {
            Ok((name, event)) => {
                handle_worker_event(registry, &mut pending_restarts, &name, &event);
            },
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {},
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }

        // Fire due restarts.
        let now = Instant::now();
        let mut index = 0;
        while index < pending_restarts.len() {
            if pending_restarts[index].0 <= now {
                let (_, name) = pending_restarts.swap_remove(index);
                attempt_restart(registry, &name);
            } else {
                index += 1;
            }
        }

        // Periodic stats tick.
        if registry.monitoring_enabled.load(Ordering::SeqCst) && Instant::now() >= next_tick {
            next_tick = Instant::now() + monitor_interval;
            let snapshot: Vec<(String, PerformanceStats)> = {
                let threads = lock(&registry.threads);
                threads
                    .iter()
                    .map(|(name, entry)| (name.clone(), entry.handle.performance_stats()))
                    .collect()
            };
            let _ = registry.thread_events_tx.send(ThreadEvent::StatsTick(snapshot));
        }
    }
}

fn handle_worker_event(
    registry: &Arc<Registry>,
    pending_restarts: &mut Vec<(Instant, String)>,
    name: &str,
    event: &WorkerEvent,
) {
    let forwarded = match event {
        WorkerEvent::Started => {
            let mut threads = lock(&registry.threads);
            if let Some(entry) = threads.get_mut(name) {
                entry.started_at = Some(Instant::now());
            }
            ThreadEvent::Started(name.to_string())
        },
        WorkerEvent::Stopped => {
            maybe_schedule_restart(registry, pending_restarts, name);
            ThreadEvent::Stopped(name.to_string())
        },
        WorkerEvent::Paused => ThreadEvent::Paused(name.to_string()),
        WorkerEvent::Resumed => ThreadEvent::Resumed(name.to_string()),
        WorkerEvent::Error(message) => {
            ThreadEvent::Error { name: name.to_string(), message: message.clone() }
        },
    };
    let _ = registry.thread_events_tx.send(forwarded);
}

fn maybe_schedule_restart(
    registry: &Arc<Registry>,
    pending_restarts: &mut Vec<(Instant, String)>,
    name: &str,
) {
    let threads = lock(&registry.threads);
    let Some(entry) = threads.get(name) else { return };
    let unexpected = !entry.stop_requested;
    let budget_left = entry.max_restarts < 0 || entry.restart_count < entry.max_restarts as u32;
    if unexpected && entry.auto_restart && budget_left {
        tracing::info!(thread = name, "scheduling auto-restart");
        pending_restarts.push((Instant::now() + RESTART_DELAY, name.to_string()));
    }
}

fn attempt_restart(registry: &Arc<Registry>, name: &str) {
    let mut threads = lock(&registry.threads);
    let Some(entry) = threads.get_mut(name) else { return };
    // Conditions may have changed during the delay.
    if entry.stop_requested || !entry.handle.is_stopped() {
        return;
    }
    match entry.cell.spawn() {
        Some(Ok(join)) => {
            entry.join = Some(join);
            entry.restart_count += 1;
            let count = entry.restart_count;
            drop(threads);
            tracing::info!(thread = name, count, "worker auto-restarted");
            let _ = registry
                .thread_events_tx
                .send(ThreadEvent::Restarted { name: name.to_string(), count });
        },
        Some(Err(error)) => {
            drop(threads);
            tracing::warn!(thread = name, %error, "auto-restart spawn failed");
        },
        None => {},
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::worker::WorkerContext;

    struct CountWorker {
        ticks: Arc<AtomicU32>,
        panic_each_tick: bool,
    }

    impl Worker for CountWorker {
        type Command = ();

        fn process_task(&mut self, _ctx: &WorkerContext) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            if self.panic_each_tick {
                #[allow(clippy::panic)]
                {
                    panic!("boom");
                }
            }
            std::thread::sleep(Duration::from_millis(2));
        }

        fn handle_command(&mut self, (): ()) {}
    }

    fn manager() -> ThreadManager {
        ThreadManager::with_monitor_interval(Duration::from_millis(200))
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
    fn create_start_stop_destroy() {
        let manager = manager();
        let ticks = Arc::new(AtomicU32::new(0));
        let worker = CountWorker { ticks: Arc::clone(&ticks), panic_each_tick: false };

        let (handle, _cmd) =
            manager.create_thread("counter", worker, CreateOptions::default()).unwrap();
        assert!(manager.has_thread("counter"));
        assert!(!manager.is_thread_running("counter"));

        manager.start_thread("counter").unwrap();
        assert!(wait_until(Duration::from_secs(2), || ticks.load(Ordering::SeqCst) > 0));
        assert!(manager.is_thread_running("counter"));

        manager.stop_thread("counter", true).unwrap();
        assert!(handle.is_stopped());

        manager.destroy_thread("counter").unwrap();
        assert!(!manager.has_thread("counter"));
    }

    #[test]
    fn duplicate_names_rejected() {
        let manager = manager();
        let ticks = Arc::new(AtomicU32::new(0));
        manager
            .create_thread(
                "dup",
                CountWorker { ticks: Arc::clone(&ticks), panic_each_tick: false },
                CreateOptions::default(),
            )
            .unwrap();
        let err = manager
            .create_thread(
                "dup",
                CountWorker { ticks, panic_each_tick: false },
                CreateOptions::default(),
            )
            .unwrap_err();
        assert_eq!(err, ThreadError::DuplicateName("dup".to_string()));
    }

    #[test]
    fn auto_start_runs_immediately() {
        let manager = manager();
        let ticks = Arc::new(AtomicU32::new(0));
        manager
            .create_thread(
                "auto",
                CountWorker { ticks: Arc::clone(&ticks), panic_each_tick: false },
                CreateOptions { auto_start: true, ..CreateOptions::default() },
            )
            .unwrap();
        assert!(wait_until(Duration::from_secs(2), || ticks.load(Ordering::SeqCst) > 0));
        manager.destroy_thread("auto").unwrap();
    }

    #[test]
    fn destroy_never_deletes_running_thread() {
        let manager = manager();
        let ticks = Arc::new(AtomicU32::new(0));
        manager
            .create_thread(
                "live",
                CountWorker { ticks: Arc::clone(&ticks), panic_each_tick: false },
                CreateOptions { auto_start: true, ..CreateOptions::default() },
            )
            .unwrap();
        assert!(wait_until(Duration::from_secs(2), || ticks.load(Ordering::SeqCst) > 0));

        // Destroy goes through stop first; a healthy worker stops and is
        // removed. The entry must never be deleted while still running.
        manager.destroy_thread("live").unwrap();
        assert!(!manager.has_thread("live"));
    }

    #[test]
    fn auto_restart_bounded_by_max_restarts() {
        let manager = manager();
        let ticks = Arc::new(AtomicU32::new(0));
        manager
            .create_thread(
                "crashy",
                CountWorker { ticks: Arc::clone(&ticks), panic_each_tick: true },
                CreateOptions { auto_start: true, auto_restart: true, max_restarts: 3 },
            )
            .unwrap();

        // Each lifetime panics once; with 3 restarts we get 4 lifetimes.
        assert!(wait_until(Duration::from_secs(10), || {
            manager.restart_count("crashy") == Some(3)
        }));
        // Give a would-be 4th restart time to (not) happen.
        std::thread::sleep(Duration::from_millis(1500));
        assert_eq!(manager.restart_count("crashy"), Some(3));
        assert_eq!(ticks.load(Ordering::SeqCst), 4);

        let restarted: Vec<u32> = manager
            .events()
            .try_iter()
            .filter_map(|event| match event {
                ThreadEvent::Restarted { count, .. } => Some(count),
                _ => None,
            })
            .collect();
        assert_eq!(restarted, vec![1, 2, 3]);

        let handle = manager.worker_handle("crashy").unwrap();
        assert!(handle.is_stopped());
        manager.destroy_thread("crashy").unwrap();
    }

    #[test]
    fn requested_stop_suppresses_auto_restart() {
        let manager = manager();
        let ticks = Arc::new(AtomicU32::new(0));
        manager
            .create_thread(
                "wellbehaved",
                CountWorker { ticks: Arc::clone(&ticks), panic_each_tick: false },
                CreateOptions { auto_start: true, auto_restart: true, max_restarts: -1 },
            )
            .unwrap();
        assert!(wait_until(Duration::from_secs(2), || ticks.load(Ordering::SeqCst) > 0));

        manager.stop_thread("wellbehaved", true).unwrap();
        std::thread::sleep(Duration::from_millis(1500));
        assert_eq!(manager.restart_count("wellbehaved"), Some(0));
        assert!(!manager.is_thread_running("wellbehaved"));
        manager.destroy_thread("wellbehaved").unwrap();
    }

    #[test]
    fn restart_thread_stops_and_starts() {
        let manager = manager();
        let ticks = Arc::new(AtomicU32::new(0));
        manager
            .create_thread(
                "cycle",
                CountWorker { ticks: Arc::clone(&ticks), panic_each_tick: false },
                CreateOptions { auto_start: true, ..CreateOptions::default() },
            )
            .unwrap();
        assert!(wait_until(Duration::from_secs(2), || ticks.load(Ordering::SeqCst) > 0));

        manager.restart_thread("cycle").unwrap();
        let after = ticks.load(Ordering::SeqCst);
        assert!(wait_until(Duration::from_secs(2), || ticks.load(Ordering::SeqCst) > after));
        manager.destroy_thread("cycle").unwrap();
    }

    #[test]
    fn pause_and_resume_through_registry() {
        let manager = manager();
        let ticks = Arc::new(AtomicU32::new(0));
        manager
            .create_thread(
                "pausable",
                CountWorker { ticks: Arc::clone(&ticks), panic_each_tick: false },
                CreateOptions { auto_start: true, ..CreateOptions::default() },
            )
            .unwrap();
        assert!(wait_until(Duration::from_secs(2), || ticks.load(Ordering::SeqCst) > 0));

        manager.pause_thread("pausable").unwrap();
        let handle = manager.worker_handle("pausable").unwrap();
        assert!(wait_until(Duration::from_secs(2), || handle.is_paused()));

        manager.resume_thread("pausable").unwrap();
        assert!(wait_until(Duration::from_secs(2), || !handle.is_paused()));
        manager.destroy_thread("pausable").unwrap();
    }

    #[test]
    fn aggregate_stats_reflect_states() {
        let manager = manager();
        let ticks = Arc::new(AtomicU32::new(0));
        manager
            .create_thread(
                "a",
                CountWorker { ticks: Arc::clone(&ticks), panic_each_tick: false },
                CreateOptions { auto_start: true, ..CreateOptions::default() },
            )
            .unwrap();
        manager
            .create_thread(
                "b",
                CountWorker { ticks: Arc::clone(&ticks), panic_each_tick: false },
                CreateOptions::default(),
            )
            .unwrap();
        assert!(wait_until(Duration::from_secs(2), || ticks.load(Ordering::SeqCst) > 0));

        let stats = manager.thread_stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.stopped, 1);
        manager.destroy_all();
        assert!(manager.thread_names().is_empty());
    }

    #[test]
    fn stats_tick_emitted_periodically() {
        let manager = ThreadManager::with_monitor_interval(Duration::from_millis(100));
        let ticks = Arc::new(AtomicU32::new(0));
        manager
            .create_thread(
                "ticked",
                CountWorker { ticks, panic_each_tick: false },
                CreateOptions { auto_start: true, ..CreateOptions::default() },
            )
            .unwrap();

        let got_tick = wait_until(Duration::from_secs(3), || {
            manager
                .events()
                .try_iter()
                .any(|event| matches!(event, ThreadEvent::StatsTick(_)))
        });
        assert!(got_tick);
        manager.destroy_all();
    }

    #[test]
    fn thread_info_tracks_bookkeeping() {
        let manager = manager();
        let ticks = Arc::new(AtomicU32::new(0));
        manager
            .create_thread(
                "tracked",
                CountWorker { ticks: Arc::clone(&ticks), panic_each_tick: false },
                CreateOptions { auto_restart: true, ..CreateOptions::default() },
            )
            .unwrap();

        let info = manager.thread_info("tracked").unwrap();
        assert_eq!(info.name, "tracked");
        assert_eq!(info.state, WorkerState::Stopped);
        assert!(info.started_at.is_none());
        assert!(info.auto_restart);
        assert_eq!(info.restart_count, 0);

        manager.start_thread("tracked").unwrap();
        assert!(wait_until(Duration::from_secs(2), || ticks.load(Ordering::SeqCst) > 0));
        assert!(wait_until(Duration::from_secs(2), || {
            manager.thread_info("tracked").is_some_and(|info| info.started_at.is_some())
        }));
        let info = manager.thread_info("tracked").unwrap();
        assert!(info.started_at.is_some_and(|started| started >= info.created_at));

        manager.destroy_thread("tracked").unwrap();
        assert!(manager.thread_info("tracked").is_none());
    }

    #[test]
    fn unknown_thread_operations_error() {
        let manager = manager();
        assert_eq!(
            manager.start_thread("ghost").unwrap_err(),
            ThreadError::UnknownThread("ghost".to_string())
        );
        assert_eq!(
            manager.stop_thread("ghost", true).unwrap_err(),
            ThreadError::UnknownThread("ghost".to_string())
        );
        assert!(manager.worker_handle("ghost").is_none());
    }
}
