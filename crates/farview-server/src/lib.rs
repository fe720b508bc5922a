//! Farview remote desktop server.
//!
//! Session layer on top of [`farview_core`]: a listener worker accepting
//! TCP connections, a per-connection client handler (framing, PBKDF2
//! authentication, outbound frame pump, input dispatch) and the
//! [`ServerManager`] orchestrating the whole lifecycle with a strict
//! single-client policy.
//!
//! # Control flow
//!
//! ```text
//! ServerManager ──▶ ThreadManager ──▶ worker lifecycles
//!   ▲   │ newClientConnection            │
//!   │   └──▶ ClientHandler_<peer>        ▼
//!   │         authenticated ──▶ start capture + processing
//!   │         disconnected  ──▶ stop capture + processing
//!   └── listener / client / queue events
//! ```

#![forbid(unsafe_code)]

pub mod auth;
pub mod client;
pub mod error;
pub mod input;
pub mod listener;
pub mod manager;

pub use auth::{AuthParams, PasswordGate};
pub use client::{ClientCommand, ClientEvent, ClientHandlerConfig, ClientHandlerWorker};
pub use error::ServerError;
pub use input::{InputInjector, MouseButton, TracingInjector};
pub use listener::{ListenerCommand, ListenerEvent, ServerWorker};
pub use manager::{ServerConfig, ServerManager, ServerManagerEvent};
