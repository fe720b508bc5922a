//! Per-connection client handler.
//!
//! One [`ClientHandlerWorker`] owns one accepted socket (the single-client
//! policy is enforced upstream in the manager). Each task tick it:
//!
//! 1. drains readable bytes into the receive buffer and runs the streaming
//!    parser (dropping one byte to resynchronize on a parse failure),
//! 2. checks the heartbeat deadline,
//! 3. after authentication, pumps up to a bounded number of encoded frames
//!    from the processed queue onto the socket.
//!
//! Disconnection — peer close, fatal socket error, three failed
//! authentications, heartbeat timeout or ten consecutive parse failures —
//! emits exactly one [`ClientEvent::Disconnected`].

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use crossbeam_channel::Sender;
use farview_core::{PipelineQueues, Worker, WorkerContext, WorkerError};
use farview_proto::payloads::{
    AuthenticationRequest, AuthenticationResponse, HandshakeResponse, KeyboardEvent, MouseEvent,
    ScreenData,
};
use farview_proto::{
    AuthResult, MessageHeader, MessageType, PROTOCOL_VERSION, ParsedMessage, SequenceCounter,
    encode_message, try_parse,
};

use crate::auth::{PasswordGate, session_id};
use crate::input::{InputInjector, apply_keyboard_event, apply_mouse_event};

/// Read timeout per tick; keeps the task loop responsive.
const READ_TIMEOUT: Duration = Duration::from_millis(20);
/// Per-write budget, bounds a stalled peer.
const WRITE_TIMEOUT: Duration = Duration::from_millis(5000);
/// Messages above this size are sent in chunks.
const LARGE_MESSAGE_THRESHOLD: usize = 1024 * 1024;
/// Chunk size for large sends.
const SEND_CHUNK: usize = 64 * 1024;
/// Read scratch size per tick.
const READ_CHUNK: usize = 64 * 1024;
/// Consecutive parse failures tolerated before force-disconnect.
const MAX_PARSE_FAILURES: u32 = 10;
/// Failed authentications tolerated before force-disconnect.
const MAX_AUTH_FAILURES: u32 = 3;

/// Configuration for a client handler.
#[derive(Debug, Clone)]
pub struct ClientHandlerConfig {
    /// Server password; `None` or empty disables authentication.
    pub password: Option<String>,
    /// Server name advertised in the handshake response.
    pub server_name: String,
    /// Screen geometry advertised in the handshake response.
    pub screen_size: (u32, u32),
    /// Color depth advertised in the handshake response.
    pub color_depth: u32,
    /// Missing-heartbeat budget before force-disconnect.
    pub heartbeat_timeout: Duration,
    /// Encoded frames drained per task tick (keeps input responsive).
    pub max_frames_per_tick: usize,
}

impl Default for ClientHandlerConfig {
    fn default() -> Self {
        Self {
            password: None,
            server_name: "Farview Server".to_string(),
            screen_size: (1920, 1080),
            color_depth: 32,
            heartbeat_timeout: Duration::from_millis(30_000),
            max_frames_per_tick: 4,
        }
    }
}

/// Events emitted by a client handler.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The peer authenticated successfully.
    Authenticated(SocketAddr),
    /// The connection ended. Emitted exactly once per handler lifetime.
    Disconnected(SocketAddr),
    /// A non-fatal error was observed.
    Error(String),
    /// A message of the given raw type was dispatched.
    MessageReceived(u16),
}

/// Commands posted to a running client handler.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    /// Close the connection (emits the disconnect event).
    Disconnect,
}

/// Shared counters readable from other threads.
#[derive(Debug, Default)]
pub struct ClientStats {
    /// Bytes received from the peer.
    pub bytes_received: AtomicU64,
    /// Bytes sent to the peer.
    pub bytes_sent: AtomicU64,
    /// Authentication state.
    pub authenticated: AtomicBool,
}

/// Per-connection worker: framing, authentication, frame pump, input.
pub struct ClientHandlerWorker {
    stream: TcpStream,
    peer: SocketAddr,
    client_id: String,
    config: ClientHandlerConfig,
    queues: Arc<PipelineQueues>,
    injector: Box<dyn InputInjector>,
    events: Sender<ClientEvent>,
    stats: Arc<ClientStats>,

    gate: PasswordGate,
    recv_buffer: BytesMut,
    sequence: SequenceCounter,
    parse_fail_streak: u32,
    failed_auth_count: u32,
    last_heartbeat: Instant,
    connected_at: Instant,
    disconnect_sent: AtomicBool,
}

impl ClientHandlerWorker {
    /// Build a handler over an accepted socket.
    #[must_use]
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        queues: Arc<PipelineQueues>,
        injector: Box<dyn InputInjector>,
        config: ClientHandlerConfig,
        events: Sender<ClientEvent>,
    ) -> (Self, Arc<ClientStats>) {
        let stats = Arc::new(ClientStats::default());
        let gate = PasswordGate::new(config.password.clone());
        let worker = Self {
            stream,
            peer,
            client_id: peer.to_string(),
            config,
            queues,
            injector,
            events,
            stats: Arc::clone(&stats),
            gate,
            recv_buffer: BytesMut::with_capacity(READ_CHUNK),
            sequence: SequenceCounter::new(),
            parse_fail_streak: 0,
            failed_auth_count: 0,
            last_heartbeat: Instant::now(),
            connected_at: Instant::now(),
            disconnect_sent: AtomicBool::new(false),
        };
        (worker, stats)
    }

    fn is_authenticated(&self) -> bool {
        self.stats.authenticated.load(Ordering::SeqCst)
    }

    fn disconnected(&self) -> bool {
        self.disconnect_sent.load(Ordering::SeqCst)
    }

    /// Emit the disconnect event exactly once and close the socket.
    fn force_disconnect(&mut self, reason: &str) {
        if !self.disconnect_sent.swap(true, Ordering::SeqCst) {
            tracing::info!(
                client = %self.client_id,
                reason,
                connected_secs = self.connected_at.elapsed().as_secs(),
                "client disconnected"
            );
            let _ = self.stream.shutdown(Shutdown::Both);
            let _ = self.events.send(ClientEvent::Disconnected(self.peer));
        }
    }

    fn read_available(&mut self) {
        let mut scratch = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => {
                    self.force_disconnect("peer closed connection");
                    return;
                },
                Ok(n) => {
                    self.stats.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                    self.recv_buffer.extend_from_slice(&scratch[..n]);
                    if n < scratch.len() {
                        return;
                    }
                },
                Err(error) => {
                    match error.kind() {
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {},
                        std::io::ErrorKind::Interrupted => continue,
                        std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                        | std::io::ErrorKind::ConnectionRefused
                        | std::io::ErrorKind::BrokenPipe
                        | std::io::ErrorKind::NotConnected => {
                            let _ = self.events.send(ClientEvent::Error(error.to_string()));
                            self.force_disconnect("fatal socket error");
                        },
                        _ => {
                            tracing::warn!(client = %self.client_id, %error, "socket read error");
                            let _ = self.events.send(ClientEvent::Error(error.to_string()));
                        },
                    }
                    return;
                },
            }
        }
    }

    fn drain_messages(&mut self) {
        while !self.disconnected() && self.recv_buffer.len() >= MessageHeader::SIZE {
            match try_parse(&self.recv_buffer) {
                Ok(Some(message)) => {
                    let _ = self.recv_buffer.split_to(message.consumed);
                    self.parse_fail_streak = 0;
                    self.dispatch(&message);
                },
                Ok(None) => break,
                Err(error) => {
                    self.parse_fail_streak += 1;
                    tracing::warn!(
                        client = %self.client_id,
                        %error,
                        streak = self.parse_fail_streak,
                        "message parse failed"
                    );
                    if self.parse_fail_streak > MAX_PARSE_FAILURES {
                        self.force_disconnect("too many parse failures");
                        return;
                    }
                    // Resynchronize: drop a single byte and retry.
                    let _ = self.recv_buffer.split_to(1);
                },
            }
        }
    }

    fn dispatch(&mut self, message: &ParsedMessage) {
        let raw_type = message.header.message_type_raw();
        let _ = self.events.send(ClientEvent::MessageReceived(raw_type));

        match message.header.message_type() {
            Some(MessageType::HandshakeRequest) => self.handle_handshake(),
            Some(MessageType::AuthenticationRequest) => self.handle_auth(&message.payload),
            Some(MessageType::Heartbeat) => {
                self.last_heartbeat = Instant::now();
            },
            Some(MessageType::MouseEvent) => self.handle_mouse(&message.payload),
            Some(MessageType::KeyboardEvent) => self.handle_keyboard(&message.payload),
            Some(other) => {
                tracing::debug!(client = %self.client_id, ?other, "unexpected message type");
            },
            None => {
                tracing::warn!(client = %self.client_id, raw_type, "unknown message type");
            },
        }
    }

    fn handle_handshake(&mut self) {
        let response = HandshakeResponse {
            server_version: PROTOCOL_VERSION,
            screen_width: self.config.screen_size.0,
            screen_height: self.config.screen_size.1,
            color_depth: self.config.color_depth,
            features: 0,
            server_name: self.config.server_name.clone(),
            server_os: std::env::consts::OS.to_string(),
        };
        self.send_message(MessageType::HandshakeResponse, &response.encode());
        tracing::debug!(client = %self.client_id, "handshake response sent");
    }

    fn handle_auth(&mut self, payload: &[u8]) {
        let Ok(request) = AuthenticationRequest::decode(payload) else {
            tracing::warn!(client = %self.client_id, "malformed authentication request");
            self.send_auth_response(AuthResult::InvalidPassword, String::new());
            return;
        };

        if !self.gate.requires_password() {
            tracing::debug!(client = %self.client_id, user = %request.username,
                "no password configured, accepting");
            self.authenticate();
            return;
        }

        if request.auth_method != 1 {
            tracing::warn!(client = %self.client_id, method = request.auth_method,
                "unsupported auth method");
            self.send_auth_response(AuthResult::InvalidPassword, String::new());
            return;
        }

        if request.password_hash.is_empty() {
            // Client is asking for the challenge parameters.
            let challenge = self.gate.challenge();
            self.send_message(MessageType::AuthChallenge, &challenge.encode());
            tracing::debug!(client = %self.client_id, "auth challenge sent");
            return;
        }

        if self.gate.verify(&request.password_hash) {
            self.authenticate();
        } else {
            self.record_auth_failure();
        }
    }

    fn authenticate(&mut self) {
        self.stats.authenticated.store(true, Ordering::SeqCst);
        let session = session_id(&self.client_id);
        self.send_auth_response(AuthResult::Success, session);
        let _ = self.events.send(ClientEvent::Authenticated(self.peer));
        tracing::info!(client = %self.client_id, "client authenticated");
    }

    fn record_auth_failure(&mut self) {
        self.failed_auth_count += 1;
        tracing::warn!(
            client = %self.client_id,
            failures = self.failed_auth_count,
            "authentication failed"
        );
        self.send_auth_response(AuthResult::InvalidPassword, String::new());
        if self.failed_auth_count >= MAX_AUTH_FAILURES {
            self.force_disconnect("too many auth failures");
        }
    }

    fn send_auth_response(&mut self, result: AuthResult, session: String) {
        let response = AuthenticationResponse { result, session_id: session, permissions: 0 };
        self.send_message(MessageType::AuthenticationResponse, &response.encode());
    }

    fn handle_mouse(&mut self, payload: &[u8]) {
        if !self.is_authenticated() {
            tracing::warn!(client = %self.client_id, "mouse event before authentication");
            return;
        }
        match MouseEvent::decode(payload) {
            Ok(event) => apply_mouse_event(self.injector.as_mut(), &event),
            Err(error) => {
                tracing::warn!(client = %self.client_id, %error, "malformed mouse event");
            },
        }
    }

    fn handle_keyboard(&mut self, payload: &[u8]) {
        if !self.is_authenticated() {
            tracing::warn!(client = %self.client_id, "keyboard event before authentication");
            return;
        }
        match KeyboardEvent::decode(payload) {
            Ok(event) => apply_keyboard_event(self.injector.as_mut(), &event),
            Err(error) => {
                tracing::warn!(client = %self.client_id, %error, "malformed keyboard event");
            },
        }
    }

    fn check_heartbeat(&mut self) {
        if self.last_heartbeat.elapsed() > self.config.heartbeat_timeout {
            self.force_disconnect("heartbeat timeout");
        }
    }

    /// Drain up to `max_frames_per_tick` encoded frames onto the socket.
    ///
    /// Bounded per tick so heartbeat and input handling stay responsive
    /// under a frame backlog.
    fn pump_frames(&mut self) {
        if !self.is_authenticated() || self.disconnected() {
            return;
        }
        for _ in 0..self.config.max_frames_per_tick {
            let Some(frame) = self.queues.processed_queue().try_dequeue() else {
                break;
            };
            let screen = ScreenData {
                x: 0,
                y: 0,
                width: frame.image_size.0,
                height: frame.image_size.1,
                image_data: frame.payload.into(),
            };
            self.send_message(MessageType::ScreenData, &screen.encode());
            if self.disconnected() {
                break;
            }
        }
    }

    fn send_message(&mut self, msg_type: MessageType, payload: &[u8]) {
        if self.disconnected() {
            return;
        }
        match encode_message(msg_type, self.sequence.next(), payload) {
            Ok(wire) => self.send_bytes(&wire),
            Err(error) => {
                tracing::warn!(client = %self.client_id, %error, "message encode failed");
                let _ = self.events.send(ClientEvent::Error(error.to_string()));
            },
        }
    }

    fn send_bytes(&mut self, data: &[u8]) {
        let result = if data.len() <= LARGE_MESSAGE_THRESHOLD {
            self.stream.write_all(data)
        } else {
            // Large payloads go out in bounded chunks; each write carries
            // its own timeout so a stalled peer cannot pin the worker.
            let mut chunked = Ok(());
            for chunk in data.chunks(SEND_CHUNK) {
                if let Err(error) = self.stream.write_all(chunk) {
                    chunked = Err(error);
                    break;
                }
            }
            chunked
        };

        match result {
            Ok(()) => {
                self.stats.bytes_sent.fetch_add(data.len() as u64, Ordering::Relaxed);
            },
            Err(error) => {
                tracing::warn!(client = %self.client_id, %error, "send failed");
                let _ = self.events.send(ClientEvent::Error(error.to_string()));
                self.force_disconnect("send failure");
            },
        }
    }
}

impl Worker for ClientHandlerWorker {
    type Command = ClientCommand;

    fn initialize(&mut self) -> Result<(), WorkerError> {
        self.stream
            .set_nodelay(true)
            .and_then(|()| self.stream.set_read_timeout(Some(READ_TIMEOUT)))
            .and_then(|()| self.stream.set_write_timeout(Some(WRITE_TIMEOUT)))
            .map_err(|e| WorkerError::InitializationFailed(e.to_string()))?;
        self.last_heartbeat = Instant::now();
        self.connected_at = Instant::now();
        tracing::info!(client = %self.client_id, "client handler ready");
        Ok(())
    }

    fn process_task(&mut self, _ctx: &WorkerContext) {
        if self.disconnected() {
            // Waiting for the manager to tear this worker down.
            std::thread::sleep(Duration::from_millis(5));
            return;
        }
        self.read_available();
        self.drain_messages();
        self.check_heartbeat();
        self.pump_frames();
    }

    fn handle_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Disconnect => self.force_disconnect("disconnect requested"),
        }
    }

    fn cleanup(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        tracing::debug!(
            client = %self.client_id,
            bytes_in = self.stats.bytes_received.load(Ordering::Relaxed),
            bytes_out = self.stats.bytes_sent.load(Ordering::Relaxed),
            "client handler cleaned up"
        );
    }
}
