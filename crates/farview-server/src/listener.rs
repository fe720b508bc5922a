//! Listening-socket worker.
//!
//! Thin wrapper over a non-blocking [`TcpListener`]: binds on command,
//! forwards accepted sockets upstream, and never creates client handlers
//! itself — that wiring belongs to the manager.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use crossbeam_channel::Sender;
use farview_core::{Worker, WorkerContext};

/// Idle sleep between accept polls.
const ACCEPT_IDLE: Duration = Duration::from_millis(5);

/// Commands posted to the listener worker.
#[derive(Debug, Clone)]
pub enum ListenerCommand {
    /// Bind and start accepting on the given port.
    StartServer(u16),
    /// Close the listening socket.
    StopServer,
}

/// Events emitted by the listener worker.
#[derive(Debug)]
pub enum ListenerEvent {
    /// The listener is bound and accepting.
    Started(u16),
    /// The listener was closed.
    Stopped,
    /// Bind or accept failure.
    Error(String),
    /// A connection was accepted. The receiver owns the socket.
    NewConnection(TcpStream, SocketAddr),
}

/// Accept-loop worker owning the listening socket.
pub struct ServerWorker {
    listener: Option<TcpListener>,
    port: u16,
    events: Sender<ListenerEvent>,
}

impl ServerWorker {
    /// Build a listener worker emitting on `events`.
    #[must_use]
    pub fn new(events: Sender<ListenerEvent>) -> Self {
        Self { listener: None, port: 0, events }
    }

    /// `true` while the listening socket is open.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Port currently bound, `0` when not listening.
    #[must_use]
    pub fn current_port(&self) -> u16 {
        self.port
    }

    fn start_listening(&mut self, port: u16) {
        if self.listener.is_some() {
            tracing::debug!(port = self.port, "listener already running");
            return;
        }
        match TcpListener::bind(("0.0.0.0", port)).and_then(|listener| {
            listener.set_nonblocking(true)?;
            Ok(listener)
        }) {
            Ok(listener) => {
                let bound = listener.local_addr().map_or(port, |addr| addr.port());
                self.listener = Some(listener);
                self.port = bound;
                tracing::info!(port = bound, "server listening");
                let _ = self.events.send(ListenerEvent::Started(bound));
            },
            Err(error) => {
                tracing::warn!(port, %error, "bind failed");
                let _ = self.events.send(ListenerEvent::Error(error.to_string()));
            },
        }
    }

    fn stop_listening(&mut self) {
        if self.listener.take().is_some() {
            tracing::info!(port = self.port, "server stopped listening");
            self.port = 0;
            let _ = self.events.send(ListenerEvent::Stopped);
        }
    }

    fn accept_pending(&mut self) {
        loop {
            let Some(listener) = &self.listener else { return };
            match listener.accept() {
                Ok((stream, peer)) => {
                    // Accepted sockets go back to blocking mode; client
                    // handlers use per-operation timeouts instead.
                    if let Err(error) = stream.set_nonblocking(false) {
                        tracing::warn!(%peer, %error, "failed to configure accepted socket");
                        continue;
                    }
                    tracing::info!(%peer, "connection accepted");
                    let _ = self.events.send(ListenerEvent::NewConnection(stream, peer));
                },
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {},
                Err(error) => {
                    tracing::warn!(%error, "accept failed");
                    let _ = self.events.send(ListenerEvent::Error(error.to_string()));
                    return;
                },
            }
        }
    }
}

impl Worker for ServerWorker {
    type Command = ListenerCommand;

    fn process_task(&mut self, _ctx: &WorkerContext) {
        if self.listener.is_some() {
            self.accept_pending();
        }
        std::thread::sleep(ACCEPT_IDLE);
    }

    fn handle_command(&mut self, command: ListenerCommand) {
        match command {
            ListenerCommand::StartServer(port) => self.start_listening(port),
            ListenerCommand::StopServer => self.stop_listening(),
        }
    }

    fn cleanup(&mut self) {
        self.stop_listening();
    }
}
