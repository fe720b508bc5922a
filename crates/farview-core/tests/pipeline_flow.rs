//! Capture → process pipeline integration tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use farview_core::{
    CaptureConfig, CaptureWorker, CreateOptions, PipelineQueues, ProcessConfig, ProcessWorker,
    QueueKind, SyntheticGrabber, ThreadManager,
};

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
fn frames_flow_from_grabber_to_processed_queue() {
    let manager = ThreadManager::new();
    let queues = Arc::new(PipelineQueues::new(120, 120));

    let capture_config = CaptureConfig { frame_rate: 60, ..CaptureConfig::default() };
    let (capture, controller) = CaptureWorker::new(
        Box::new(SyntheticGrabber::new(64, 48)),
        Arc::clone(&queues),
        &capture_config,
    );
    let (process_events, _process_events_rx) = unbounded();
    let (process, _process_controller) =
        ProcessWorker::new(Arc::clone(&queues), ProcessConfig::default(), process_events);

    manager
        .create_thread("CaptureWorker", capture, CreateOptions {
            auto_start: true,
            ..CreateOptions::default()
        })
        .unwrap();
    manager
        .create_thread("DataProcessingWorker", process, CreateOptions {
            auto_start: true,
            ..CreateOptions::default()
        })
        .unwrap();

    controller.start_capturing();
    assert!(wait_until(Duration::from_secs(5), || queues.processed_queue().size() >= 3));

    let frame = queues.processed_queue().try_dequeue().unwrap();
    assert!(frame.is_valid());
    assert_eq!(frame.image_size, (64, 48));
    assert_eq!(&frame.payload[..2], &[0xFF, 0xD8]);

    // Every encoded frame corresponds to a dequeued raw frame.
    let capture_stats = queues.capture_queue().stats();
    let processed_stats = queues.processed_queue().stats();
    assert!(processed_stats.total_enqueued <= capture_stats.total_dequeued);

    controller.stop_capturing();
    manager.destroy_all();
    assert!(manager.thread_names().is_empty());
}

#[test]
fn stalled_consumer_overflows_processed_queue() {
    // Scenario: processed queue cap 1, capture queue large, nobody
    // draining the processed queue (a stalled client).
    let manager = ThreadManager::new();
    let queues = Arc::new(PipelineQueues::new(1000, 1));

    let capture_config = CaptureConfig { frame_rate: 30, ..CaptureConfig::default() };
    let (capture, controller) = CaptureWorker::new(
        Box::new(SyntheticGrabber::new(32, 32)),
        Arc::clone(&queues),
        &capture_config,
    );
    let (process_events, _process_events_rx) = unbounded();
    let (process, process_controller) =
        ProcessWorker::new(Arc::clone(&queues), ProcessConfig::default(), process_events);

    manager
        .create_thread("CaptureWorker", capture, CreateOptions {
            auto_start: true,
            ..CreateOptions::default()
        })
        .unwrap();
    manager
        .create_thread("DataProcessingWorker", process, CreateOptions {
            auto_start: true,
            ..CreateOptions::default()
        })
        .unwrap();

    controller.start_capturing();
    std::thread::sleep(Duration::from_secs(1));

    assert!(wait_until(Duration::from_secs(5), || {
        queues.processed_queue().total_dropped() > 0
    }));
    // A full single-slot queue is unhealthy (usage 100 % > 95 %).
    assert!(!queues.is_healthy(QueueKind::Processed));
    assert!(process_controller.stats().dropped_frames > 0);

    controller.stop_capturing();
    manager.destroy_all();
}

#[test]
fn pipeline_survives_clear_and_resume() {
    let manager = ThreadManager::new();
    let queues = Arc::new(PipelineQueues::new(120, 120));

    let (capture, controller) = CaptureWorker::new(
        Box::new(SyntheticGrabber::new(32, 32)),
        Arc::clone(&queues),
        &CaptureConfig { frame_rate: 60, ..CaptureConfig::default() },
    );
    let (process_events, _process_events_rx) = unbounded();
    let (process, process_controller) =
        ProcessWorker::new(Arc::clone(&queues), ProcessConfig::default(), process_events);

    manager
        .create_thread("CaptureWorker", capture, CreateOptions {
            auto_start: true,
            ..CreateOptions::default()
        })
        .unwrap();
    let (_handle, commander) = manager
        .create_thread("DataProcessingWorker", process, CreateOptions {
            auto_start: true,
            ..CreateOptions::default()
        })
        .unwrap();

    controller.start_capturing();
    assert!(wait_until(Duration::from_secs(5), || {
        process_controller.stats().processed_frames > 0
    }));

    // Client disconnect path: halt and clear, stats zeroed.
    commander.send(farview_core::ProcessCommand::StopAndClearQueues).unwrap();
    assert!(wait_until(Duration::from_secs(2), || process_controller.is_halted()));
    assert_eq!(process_controller.stats().processed_frames, 0);

    // New client path: resume and keep encoding.
    commander.send(farview_core::ProcessCommand::ResumeProcessing).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        process_controller.stats().processed_frames > 0
    }));

    controller.stop_capturing();
    manager.destroy_all();
}
