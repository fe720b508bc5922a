//! Farview concurrency runtime and capture pipeline.
//!
//! This crate holds everything between the platform ports and the network
//! session: the generic worker runtime, the process-wide thread registry,
//! the bounded queues wiring the pipeline stages together, and the two
//! producer stages (screen capture and parallel JPEG encoding).
//!
//! # Architecture
//!
//! ```text
//! [grabber] → CaptureWorker ──try_enqueue──▶ capture queue
//!                                               │
//!                                               ▼
//!                                   ProcessWorker (rayon batch encode)
//!                                               │
//!                                               ▼
//!                                       processed queue ──▶ (session layer)
//! ```
//!
//! Each worker owns one OS thread, driven by [`worker::WorkerRuntime`].
//! Cross-thread control is message passing only: typed command channels in,
//! typed event channels out. The [`manager::ThreadManager`] owns every
//! worker and mediates lifecycle transitions; nothing else stops or starts
//! threads directly.

#![forbid(unsafe_code)]

pub mod capture;
pub mod config;
pub mod encode;
pub mod frame;
pub mod manager;
pub mod process;
pub mod queue;
pub mod queues;
pub mod worker;

pub(crate) mod sync;

pub use capture::{CaptureCommand, CaptureController, CaptureStats, CaptureWorker, FrameGrabber,
    GrabError, SyntheticGrabber};
pub use config::{CaptureConfig, CaptureRect};
pub use frame::{EncodedFrame, FrameIdGen, PixelBuffer, PixelFormat, RawFrame};
pub use manager::{CreateOptions, ThreadError, ThreadEvent, ThreadInfo, ThreadManager,
    ThreadManagerStats};
pub use process::{ProcessCommand, ProcessConfig, ProcessController, ProcessEvent, ProcessWorker,
    ProcessingStats};
pub use queue::{BoundedQueue, QueueStatsSnapshot};
pub use queues::{PipelineQueues, QueueEvent, QueueKind, QueueMonitor};
pub use worker::{PerformanceStats, Worker, WorkerContext, WorkerError, WorkerEvent, WorkerHandle,
    WorkerState};
