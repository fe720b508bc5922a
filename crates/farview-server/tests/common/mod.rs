//! Shared harness for live-TCP session tests.
//!
//! Runs a [`ServerManager`] on a driver thread (polling its event loop the
//! way the binary does) and gives tests a protocol-speaking client over a
//! real socket.

// Each integration test binary compiles this module separately and uses a
// different subset of it.
#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use farview_server::{ServerConfig, ServerManager, ServerManagerEvent};
use farview_proto::{
    MessageType, ParsedMessage, SequenceCounter, encode_message, try_parse,
};

/// Snapshot of manager internals taken after graceful shutdown.
#[derive(Debug)]
pub struct FinalState {
    pub thread_names: Vec<String>,
    pub capture_queue_size: usize,
    pub processed_queue_size: usize,
}

/// A server instance driven on a background thread.
pub struct TestServer {
    pub port: u16,
    pub events: Receiver<ServerManagerEvent>,
    stop: Arc<AtomicBool>,
    final_state: Receiver<FinalState>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl TestServer {
    /// Start a server with the given password on an ephemeral port.
    pub fn start(password: Option<String>) -> Self {
        Self::start_with(password, |config| config)
    }

    /// Start a server with a configuration hook.
    pub fn start_with(
        password: Option<String>,
        tweak: impl FnOnce(ServerConfig) -> ServerConfig,
    ) -> Self {
        let (event_tx, event_rx) = unbounded();
        let (state_tx, state_rx) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let config = tweak(ServerConfig::default());
        let join = std::thread::spawn(move || {
            drive_manager(config, password, &event_tx, &state_tx, &stop_flag);
        });

        // Wait for the bound port.
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut port = 0;
        while Instant::now() < deadline && port == 0 {
            if let Ok(ServerManagerEvent::ServerStarted(p)) =
                event_rx.recv_timeout(Duration::from_millis(100))
            {
                port = p;
            }
        }
        assert!(port > 0, "server did not start in time");

        Self { port, events: event_rx, stop, final_state: state_rx, join: Some(join) }
    }

    /// Wait for a manager event matching `check`.
    pub fn expect_event(
        &self,
        within: Duration,
        mut check: impl FnMut(&ServerManagerEvent) -> bool,
    ) -> ServerManagerEvent {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if let Ok(event) = self.events.recv_timeout(Duration::from_millis(50)) {
                if check(&event) {
                    return event;
                }
            }
        }
        panic!("expected manager event not observed within {within:?}");
    }

    /// Trigger graceful shutdown and return the post-shutdown snapshot.
    pub fn shutdown(mut self) -> FinalState {
        self.stop.store(true, Ordering::SeqCst);
        let state = self
            .final_state
            .recv_timeout(Duration::from_secs(15))
            .expect("driver did not report final state");
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        state
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn drive_manager(
    config: ServerConfig,
    password: Option<String>,
    events: &Sender<ServerManagerEvent>,
    final_state: &Sender<FinalState>,
    stop: &AtomicBool,
) {
    let mut manager = ServerManager::new(config);
    if manager.start_server(0, password).is_err() {
        return;
    }

    while !stop.load(Ordering::SeqCst) {
        manager.poll(Duration::from_millis(20));
        while let Ok(event) = manager.events().try_recv() {
            let _ = events.send(event);
        }
    }

    manager.graceful_shutdown();
    while let Ok(event) = manager.events().try_recv() {
        let _ = events.send(event);
    }
    let snapshot = FinalState {
        thread_names: manager.thread_manager().thread_names(),
        capture_queue_size: manager.queues().capture_queue().size(),
        processed_queue_size: manager.queues().processed_queue().size(),
    };
    let _ = final_state.send(snapshot);
}

/// A protocol-speaking viewer over a real TCP socket.
pub struct TestClient {
    pub stream: TcpStream,
    sequence: SequenceCounter,
    inbound: Vec<u8>,
}

impl TestClient {
    /// Connect to the server under test.
    pub fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).expect("connect failed");
        stream.set_read_timeout(Some(Duration::from_millis(100))).expect("set timeout");
        Self { stream, sequence: SequenceCounter::new(), inbound: Vec::new() }
    }

    /// Frame and send one message.
    pub fn send(&mut self, msg_type: MessageType, payload: &[u8]) {
        let wire = encode_message(msg_type, self.sequence.next(), payload).expect("encode");
        self.stream.write_all(&wire).expect("send");
    }

    /// Read until a message of `wanted` type arrives. Other messages are
    /// skipped.
    pub fn expect_message(&mut self, wanted: MessageType, within: Duration) -> ParsedMessage {
        let deadline = Instant::now() + within;
        loop {
            if let Ok(Some(message)) = try_parse(&self.inbound) {
                self.inbound.drain(..message.consumed);
                if message.header.message_type() == Some(wanted) {
                    return message;
                }
                continue;
            }
            assert!(Instant::now() < deadline, "timed out waiting for {wanted:?}");
            let mut scratch = [0u8; 65536];
            match self.stream.read(&mut scratch) {
                Ok(0) => std::thread::sleep(Duration::from_millis(10)),
                Ok(n) => self.inbound.extend_from_slice(&scratch[..n]),
                Err(_) => {},
            }
        }
    }

    /// `true` once the server has closed this connection.
    pub fn wait_for_close(&mut self, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        let mut scratch = [0u8; 4096];
        while Instant::now() < deadline {
            match self.stream.read(&mut scratch) {
                Ok(0) => return true,
                Ok(_) => {},
                Err(error) => match error.kind() {
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {},
                    _ => return true,
                },
            }
        }
        false
    }
}
