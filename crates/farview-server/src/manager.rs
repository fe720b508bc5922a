//! Top-level server orchestration.
//!
//! The [`ServerManager`] owns the thread registry, the pipeline queues and
//! every event channel; it wires workers together and enforces the
//! single-client policy. The capture/processing pipeline starts only after
//! the first successful authentication and is fully stopped when the
//! client disconnects.
//!
//! All reactions run inside [`ServerManager::poll`], which the binary (and
//! the tests) call in a loop — there is no hidden control thread, so event
//! ordering is deterministic from the caller's point of view.

use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use farview_core::{
    CaptureCommand, CaptureConfig, CaptureController, CaptureWorker, CreateOptions, FrameGrabber,
    PipelineQueues, ProcessCommand, ProcessConfig, ProcessEvent, ProcessWorker, QueueMonitor,
    SyntheticGrabber, ThreadEvent, ThreadManager,
};

use crate::client::{ClientCommand, ClientEvent, ClientHandlerConfig, ClientHandlerWorker};
use crate::error::ServerError;
use crate::input::{InputInjector, TracingInjector};
use crate::listener::{ListenerCommand, ListenerEvent, ServerWorker};

/// Registry name of the listener worker.
const LISTENER_THREAD: &str = "ServerWorker";
/// Registry name of the capture worker.
const CAPTURE_THREAD: &str = "CaptureWorker";
/// Registry name of the processing worker.
const PROCESS_THREAD: &str = "DataProcessingWorker";

/// Factory producing a platform grabber for each pipeline start.
pub type GrabberFactory = Box<dyn Fn() -> Box<dyn FrameGrabber> + Send>;
/// Factory producing an input injector for each client connection.
pub type InjectorFactory = Box<dyn Fn() -> Box<dyn InputInjector> + Send>;

/// Server configuration.
pub struct ServerConfig {
    /// Capture queue capacity.
    pub capture_queue_cap: usize,
    /// Processed queue capacity.
    pub processed_queue_cap: usize,
    /// Capture configuration for the pipeline.
    pub capture: CaptureConfig,
    /// Processing configuration for the pipeline.
    pub process: ProcessConfig,
    /// Client handler configuration template (password et al.).
    pub client: ClientHandlerConfig,
    /// Grabber factory; defaults to the synthetic checkerboard.
    pub grabber_factory: GrabberFactory,
    /// Injector factory; defaults to the tracing injector.
    pub injector_factory: InjectorFactory,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            capture_queue_cap: 120,
            processed_queue_cap: 120,
            capture: CaptureConfig::default(),
            process: ProcessConfig::default(),
            client: ClientHandlerConfig::default(),
            grabber_factory: Box::new(|| Box::new(SyntheticGrabber::default())),
            injector_factory: Box::new(|| Box::new(TracingInjector)),
        }
    }
}

/// Events surfaced to the embedding binary.
#[derive(Debug, Clone)]
pub enum ServerManagerEvent {
    /// The listener is bound and accepting.
    ServerStarted(u16),
    /// The listener stopped.
    ServerStopped,
    /// The listener reported an error (bind failure, accept failure).
    ServerError(String),
    /// A viewer authenticated; the pipeline is starting.
    ClientAuthenticated(SocketAddr),
    /// The viewer disconnected; the pipeline stopped.
    ClientDisconnected(SocketAddr),
}

#[derive(Default)]
struct State {
    is_server_running: bool,
    current_port: u16,
    capture_started: bool,
    shutting_down: bool,
    graceful_down: bool,
    current_client: Option<SocketAddr>,
    current_client_thread: Option<String>,
}

/// Top-level coordinator: lifecycle, single-client policy, pipeline wiring.
pub struct ServerManager {
    threads: ThreadManager,
    queues: Arc<PipelineQueues>,
    _queue_monitor: QueueMonitor,
    config: ServerConfig,
    state: Mutex<State>,

    listener_events: Receiver<ListenerEvent>,
    listener_events_tx: Sender<ListenerEvent>,
    listener_cmd: Mutex<Option<Sender<ListenerCommand>>>,

    client_events: Receiver<ClientEvent>,
    client_events_tx: Sender<ClientEvent>,
    client_cmd: Mutex<Option<Sender<ClientCommand>>>,

    process_events: Receiver<ProcessEvent>,
    process_events_tx: Sender<ProcessEvent>,
    process_cmd: Mutex<Option<Sender<ProcessCommand>>>,
    capture_controller: Mutex<Option<CaptureController>>,
    capture_cmd: Mutex<Option<Sender<CaptureCommand>>>,

    events_out: (Sender<ServerManagerEvent>, Receiver<ServerManagerEvent>),
}

impl ServerManager {
    /// Build a manager from configuration. Nothing is started yet.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let queues =
            Arc::new(PipelineQueues::new(config.capture_queue_cap, config.processed_queue_cap));
        let queue_monitor = QueueMonitor::start(Arc::clone(&queues));
        let (listener_tx, listener_rx) = unbounded();
        let (client_tx, client_rx) = unbounded();
        let (process_tx, process_rx) = unbounded();
        Self {
            threads: ThreadManager::new(),
            queues,
            _queue_monitor: queue_monitor,
            config,
            state: Mutex::new(State::default()),
            listener_events: listener_rx,
            listener_events_tx: listener_tx,
            listener_cmd: Mutex::new(None),
            client_events: client_rx,
            client_events_tx: client_tx,
            client_cmd: Mutex::new(None),
            process_events: process_rx,
            process_events_tx: process_tx,
            process_cmd: Mutex::new(None),
            capture_controller: Mutex::new(None),
            capture_cmd: Mutex::new(None),
            events_out: unbounded(),
        }
    }

    /// Receiver for manager events.
    #[must_use]
    pub fn events(&self) -> &Receiver<ServerManagerEvent> {
        &self.events_out.1
    }

    /// The pipeline queues (for diagnostics and tests).
    #[must_use]
    pub fn queues(&self) -> &Arc<PipelineQueues> {
        &self.queues
    }

    /// The thread registry (for diagnostics and tests).
    #[must_use]
    pub fn thread_manager(&self) -> &ThreadManager {
        &self.threads
    }

    /// `true` while the listener is up.
    #[must_use]
    pub fn is_server_running(&self) -> bool {
        self.state_guard().is_server_running
    }

    /// Bound port, `0` when not running.
    #[must_use]
    pub fn current_port(&self) -> u16 {
        self.state_guard().current_port
    }

    /// Address of the connected viewer, if any.
    #[must_use]
    pub fn current_client(&self) -> Option<SocketAddr> {
        self.state_guard().current_client
    }

    /// `true` once the capture pipeline has been started for this session.
    #[must_use]
    pub fn capture_started(&self) -> bool {
        self.state_guard().capture_started
    }

    /// Start the listener worker and ask it to bind `port`.
    ///
    /// `password` overrides the configured client password (empty string
    /// disables authentication). The bind result arrives asynchronously as
    /// [`ServerManagerEvent::ServerStarted`] or
    /// [`ServerManagerEvent::ServerError`].
    pub fn start_server(&mut self, port: u16, password: Option<String>) -> Result<(), ServerError> {
        {
            let state = self.state_guard();
            if state.is_server_running {
                return Err(ServerError::AlreadyRunning(state.current_port));
            }
        }
        if self.threads.has_thread(LISTENER_THREAD) {
            return Err(ServerError::AlreadyRunning(self.current_port()));
        }

        self.config.client.password = password.filter(|p| !p.is_empty());

        let worker = ServerWorker::new(self.listener_events_tx.clone());
        let (_handle, commander) = self.threads.create_thread(
            LISTENER_THREAD,
            worker,
            CreateOptions { auto_start: true, ..CreateOptions::default() },
        )?;
        // Bind is posted, not called: it runs on the worker's own thread
        // after its loop is live.
        let _ = commander.send(ListenerCommand::StartServer(port));
        *self.lock_opt(&self.listener_cmd) = Some(commander);
        tracing::info!(port, "server start initiated");
        Ok(())
    }

    /// Ask the listener to close without waiting for completion.
    /// Idempotent: once a shutdown is underway further calls are no-ops.
    pub fn stop_server(&self) {
        {
            let mut state = self.state_guard();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }
        if let Some(commander) = self.lock_opt(&self.listener_cmd).as_ref() {
            let _ = commander.send(ListenerCommand::StopServer);
        }
        if self.threads.has_thread(LISTENER_THREAD) {
            let _ = self.threads.stop_thread(LISTENER_THREAD, false);
        }
    }

    /// Drain and react to pending events for up to `budget`.
    ///
    /// Returns the number of events handled.
    pub fn poll(&mut self, budget: Duration) -> usize {
        let deadline = Instant::now() + budget;
        let mut handled = 0;
        loop {
            let mut progressed = false;

            while let Ok(event) = self.listener_events.try_recv() {
                self.on_listener_event(event);
                handled += 1;
                progressed = true;
            }
            while let Ok(event) = self.client_events.try_recv() {
                self.on_client_event(&event);
                handled += 1;
                progressed = true;
            }
            while let Ok(event) = self.process_events.try_recv() {
                Self::on_process_event(&event);
                handled += 1;
                progressed = true;
            }
            while let Ok(event) = self.threads.events().try_recv() {
                Self::on_thread_event(&event);
                handled += 1;
                progressed = true;
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if !progressed {
                std::thread::sleep(Duration::from_millis(5).min(deadline - now));
            }
        }
        handled
    }

    /// Idempotent full teardown: client, pipeline, listener, queues.
    pub fn graceful_shutdown(&mut self) {
        {
            let mut state = self.state_guard();
            if state.graceful_down {
                return;
            }
            state.graceful_down = true;
            state.shutting_down = true;
        }
        tracing::info!("graceful shutdown started");

        self.teardown_client();
        self.stop_worker_threads();

        if let Some(commander) = self.lock_opt(&self.listener_cmd).take() {
            let _ = commander.send(ListenerCommand::StopServer);
        }
        if self.threads.has_thread(LISTENER_THREAD) {
            if let Err(error) = self.threads.stop_thread(LISTENER_THREAD, true) {
                tracing::warn!(%error, "listener did not stop cleanly");
            }
            let _ = self.threads.destroy_thread(LISTENER_THREAD);
        }

        self.queues.stop_all();
        {
            let mut state = self.state_guard();
            state.is_server_running = false;
            state.current_port = 0;
        }
        let _ = self.events_out.0.send(ServerManagerEvent::ServerStopped);
        tracing::info!("graceful shutdown complete");
    }

    fn on_listener_event(&mut self, event: ListenerEvent) {
        match event {
            ListenerEvent::Started(port) => {
                {
                    let mut state = self.state_guard();
                    state.is_server_running = true;
                    state.current_port = port;
                }
                let _ = self.events_out.0.send(ServerManagerEvent::ServerStarted(port));
            },
            ListenerEvent::Stopped => {
                {
                    let mut state = self.state_guard();
                    state.is_server_running = false;
                    state.current_port = 0;
                }
                let _ = self.events_out.0.send(ServerManagerEvent::ServerStopped);
            },
            ListenerEvent::Error(message) => {
                let _ = self.events_out.0.send(ServerManagerEvent::ServerError(message));
            },
            ListenerEvent::NewConnection(stream, peer) => {
                self.on_new_connection(stream, peer);
            },
        }
    }

    fn on_new_connection(&mut self, stream: TcpStream, peer: SocketAddr) {
        {
            let state = self.state_guard();
            if state.current_client.is_some() {
                // Single-client policy: silently close the new socket.
                tracing::info!(%peer, "rejecting second viewer");
                drop(stream);
                return;
            }
        }

        let thread_name = format!("ClientHandler_{peer}");
        let (worker, _stats) = ClientHandlerWorker::new(
            stream,
            peer,
            Arc::clone(&self.queues),
            (self.config.injector_factory)(),
            self.config.client.clone(),
            self.client_events_tx.clone(),
        );
        match self.threads.create_thread(
            &thread_name,
            worker,
            CreateOptions { auto_start: true, ..CreateOptions::default() },
        ) {
            Ok((_handle, commander)) => {
                let mut state = self.state_guard();
                state.current_client = Some(peer);
                state.current_client_thread = Some(thread_name);
                drop(state);
                *self.lock_opt(&self.client_cmd) = Some(commander);
                tracing::info!(%peer, "client handler started");
            },
            Err(error) => {
                tracing::warn!(%peer, %error, "failed to start client handler");
            },
        }
    }

    fn on_client_event(&mut self, event: &ClientEvent) {
        match event {
            ClientEvent::Authenticated(peer) => {
                if !self.state_guard().capture_started {
                    self.start_worker_threads();
                }
                let _ = self.events_out.0.send(ServerManagerEvent::ClientAuthenticated(*peer));
            },
            ClientEvent::Disconnected(peer) => {
                self.teardown_client();
                self.stop_worker_threads();
                let _ = self.events_out.0.send(ServerManagerEvent::ClientDisconnected(*peer));
            },
            ClientEvent::Error(message) => {
                tracing::debug!(%message, "client error");
            },
            ClientEvent::MessageReceived(_) => {},
        }
    }

    fn on_process_event(event: &ProcessEvent) {
        match event {
            ProcessEvent::Warning(message) => tracing::warn!(%message, "processing warning"),
            ProcessEvent::StatsUpdated(stats) => {
                tracing::trace!(%stats, "processing stats");
            },
        }
    }

    fn on_thread_event(event: &ThreadEvent) {
        match event {
            ThreadEvent::Error { name, message } => {
                tracing::warn!(thread = %name, %message, "worker error");
            },
            ThreadEvent::Restarted { name, count } => {
                tracing::info!(thread = %name, count, "worker restarted");
            },
            _ => {},
        }
    }

    /// Start the capture + processing pipeline. Idempotent per session.
    fn start_worker_threads(&mut self) {
        {
            let state = self.state_guard();
            if state.capture_started {
                return;
            }
        }
        tracing::info!("starting capture pipeline");
        self.queues.restart_all();

        // Capture worker, producing into the capture queue.
        if !self.threads.has_thread(CAPTURE_THREAD) {
            let (worker, controller) = CaptureWorker::new(
                (self.config.grabber_factory)(),
                Arc::clone(&self.queues),
                &self.config.capture,
            );
            match self.threads.create_thread(
                CAPTURE_THREAD,
                worker,
                CreateOptions { auto_start: true, ..CreateOptions::default() },
            ) {
                Ok((_handle, commander)) => {
                    controller.start_capturing();
                    *self.lock_opt(&self.capture_controller) = Some(controller);
                    *self.lock_opt(&self.capture_cmd) = Some(commander);
                },
                Err(error) => {
                    tracing::error!(%error, "failed to start capture worker");
                    return;
                },
            }
        }

        // Processing worker, auto-restarted up to 3 times on failure.
        if !self.threads.has_thread(PROCESS_THREAD) {
            let (worker, _controller) = ProcessWorker::new(
                Arc::clone(&self.queues),
                self.config.process.clone(),
                self.process_events_tx.clone(),
            );
            match self.threads.create_thread(
                PROCESS_THREAD,
                worker,
                CreateOptions { auto_start: false, auto_restart: true, max_restarts: 3 },
            ) {
                Ok((_handle, commander)) => {
                    if let Err(error) = self.threads.start_thread(PROCESS_THREAD) {
                        tracing::error!(%error, "failed to start processing worker");
                        let _ = self.threads.destroy_thread(PROCESS_THREAD);
                        return;
                    }
                    let _ = commander.send(ProcessCommand::ResumeProcessing);
                    *self.lock_opt(&self.process_cmd) = Some(commander);
                },
                Err(error) => {
                    tracing::error!(%error, "failed to create processing worker");
                    return;
                },
            }
        }

        self.state_guard().capture_started = true;
    }

    /// Stop the capture + processing pipeline and clear the queues.
    fn stop_worker_threads(&mut self) {
        tracing::info!("stopping capture pipeline");

        if let Some(commander) = self.lock_opt(&self.process_cmd).take() {
            let _ = commander.send(ProcessCommand::StopAndClearQueues);
        }
        if self.threads.has_thread(PROCESS_THREAD) {
            if let Err(error) = self.threads.stop_thread(PROCESS_THREAD, true) {
                tracing::warn!(%error, "processing worker did not stop cleanly");
            }
            if let Err(error) = self.threads.destroy_thread(PROCESS_THREAD) {
                tracing::warn!(%error, "processing worker not destroyed");
            }
        }

        if let Some(controller) = self.lock_opt(&self.capture_controller).take() {
            controller.stop_capturing();
        }
        self.lock_opt(&self.capture_cmd).take();
        if self.threads.has_thread(CAPTURE_THREAD) {
            if let Err(error) = self.threads.stop_thread(CAPTURE_THREAD, true) {
                tracing::warn!(%error, "capture worker did not stop cleanly");
            }
            if let Err(error) = self.threads.destroy_thread(CAPTURE_THREAD) {
                tracing::warn!(%error, "capture worker not destroyed");
            }
        }

        self.queues.clear(farview_core::QueueKind::Capture);
        self.queues.clear(farview_core::QueueKind::Processed);
        self.state_guard().capture_started = false;
    }

    /// Tear down the current client worker, if any.
    fn teardown_client(&mut self) {
        let thread_name = {
            let mut state = self.state_guard();
            state.current_client = None;
            state.current_client_thread.take()
        };
        if let Some(commander) = self.lock_opt(&self.client_cmd).take() {
            let _ = commander.send(ClientCommand::Disconnect);
        }
        if let Some(name) = thread_name {
            if self.threads.has_thread(&name) {
                if let Err(error) = self.threads.stop_thread(&name, true) {
                    tracing::warn!(thread = %name, %error, "client handler did not stop cleanly");
                }
                if let Err(error) = self.threads.destroy_thread(&name) {
                    tracing::warn!(thread = %name, %error, "client handler not destroyed");
                }
            }
        }
    }

    fn state_guard(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_opt<'a, T>(&self, mutex: &'a Mutex<Option<T>>) -> MutexGuard<'a, Option<T>> {
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for ServerManager {
    fn drop(&mut self) {
        self.graceful_shutdown();
    }
}
