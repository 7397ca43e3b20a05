mod common;

use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use common::{constant, MockBackend};
use pickbeat::audio::{AudioError, DeviceId, StreamController, SHUTDOWN_TIMEOUT};
use pickbeat::state::config::LOW_LATENCY_BUFFER_SIZE;
use pickbeat::state::{CaptureConfig, StreamState};

fn controller(backend: &MockBackend) -> StreamController<MockBackend> {
    StreamController::with_backend(Arc::new(backend.clone()), CaptureConfig::default())
}

#[test]
fn test_start_stop_lifecycle() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);
    assert_eq!(controller.state(), StreamState::Stopped);

    controller.start().unwrap();
    assert_eq!(controller.state(), StreamState::Capturing);
    assert!(backend.capture_open());
    assert!(!backend.output_open());

    let (device, params) = backend.last_input().unwrap();
    assert_eq!(device, DeviceId(0));
    assert_eq!(params.channels, 2);
    assert_eq!(params.sample_rate, 44100);
    assert_eq!(params.block_size, 1024);

    controller.stop().unwrap();
    assert_eq!(controller.state(), StreamState::Stopped);
    assert!(!backend.capture_open());
}

#[test]
fn test_start_twice_opens_once() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);

    controller.start().unwrap();
    controller.start().unwrap();
    assert_eq!(backend.inputs_opened().len(), 1);
}

#[test]
fn test_stop_is_idempotent() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);

    // Stopping a stopped controller is a no-op
    assert!(controller.stop().is_ok());

    controller.start().unwrap();
    assert!(controller.stop().is_ok());
    assert!(controller.stop().is_ok());
    assert_eq!(controller.state(), StreamState::Stopped);
}

#[test]
fn test_start_failure_leaves_controller_stopped() {
    let backend = MockBackend::studio();
    backend.fail_input(true);
    let controller = controller(&backend);

    let err = controller.start().unwrap_err();
    assert!(matches!(err, AudioError::DeviceOpen(_)));
    assert_eq!(controller.state(), StreamState::Stopped);

    // No retry happens behind the caller's back
    assert!(backend.inputs_opened().is_empty());

    backend.fail_input(false);
    controller.start().unwrap();
    assert_eq!(controller.state(), StreamState::Capturing);
}

#[test]
fn test_start_without_devices() {
    let backend = MockBackend::new(Vec::new());
    let controller = controller(&backend);

    assert!(matches!(controller.start(), Err(AudioError::DeviceOpen(_))));
    assert_eq!(controller.state(), StreamState::Stopped);
}

#[test]
fn test_start_monitoring_requires_capture() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);

    let result = controller.start_monitoring();
    assert_eq!(result, Err(AudioError::NotCapturing));
    assert_eq!(controller.state(), StreamState::Stopped);
    assert!(backend.inputs_opened().is_empty());
    assert!(backend.outputs_opened().is_empty());
}

#[test]
fn test_invalid_input_channel_keeps_previous_channel() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);
    controller.start().unwrap();

    let result = controller.set_input_channel(5);
    assert_eq!(
        result,
        Err(AudioError::InvalidChannel {
            channel: 5,
            available: 2
        })
    );
    assert_eq!(controller.config().input_channel, 0);
    assert_eq!(controller.state(), StreamState::Capturing);
    assert_eq!(backend.inputs_opened().len(), 1);
}

#[test]
fn test_set_input_channel_restarts_capture() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);
    controller.start().unwrap();

    controller.set_input_channel(1).unwrap();
    assert_eq!(controller.config().input_channel, 1);
    assert_eq!(controller.state(), StreamState::Capturing);
    assert_eq!(backend.inputs_opened().len(), 2);

    // Only the right channel is loud, so only it registers a level
    let frames: Vec<f32> = (0..256).flat_map(|_| [0.0, 0.5]).collect();
    assert!(backend.feed(&frames, 1.0));
    assert!((controller.level() - 0.5).abs() < 1e-6);
}

#[test]
fn test_set_device_resets_channel() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);
    controller.set_input_channel(1).unwrap();
    controller.start().unwrap();

    controller.set_device(DeviceId(1)).unwrap();
    let config = controller.config();
    assert_eq!(config.input_device, Some(DeviceId(1)));
    assert_eq!(config.input_channel, 0);

    let (device, params) = backend.last_input().unwrap();
    assert_eq!(device, DeviceId(1));
    assert_eq!(params.channels, 1);
    assert_eq!(controller.active_input_device().unwrap().name, "Mock Mic");
}

#[test]
fn test_set_device_rejects_unknown_and_output_only() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);

    assert_eq!(
        controller.set_device(DeviceId(9)),
        Err(AudioError::DeviceNotFound(DeviceId(9)))
    );
    assert_eq!(
        controller.set_device(DeviceId(2)),
        Err(AudioError::DeviceNotFound(DeviceId(2)))
    );
    assert_eq!(controller.config().input_device, None);
}

#[test]
fn test_buffer_size_is_clamped() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);

    controller.set_buffer_size(1).unwrap();
    assert_eq!(controller.config().buffer_size, 32);
    controller.set_buffer_size(1_000_000).unwrap();
    assert_eq!(controller.config().buffer_size, 8192);

    // Stopped controllers do not open anything
    assert!(backend.inputs_opened().is_empty());
}

#[test]
fn test_low_latency_shrinks_blocks() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);
    controller.start().unwrap();

    controller.set_low_latency(true).unwrap();
    let (_, params) = backend.last_input().unwrap();
    assert_eq!(params.block_size, LOW_LATENCY_BUFFER_SIZE);
    assert_eq!(controller.state(), StreamState::Capturing);
}

#[test]
fn test_monitoring_passthrough() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);
    controller.set_buffer_size(256).unwrap();
    controller.start().unwrap();
    controller.start_monitoring().unwrap();

    assert_eq!(controller.state(), StreamState::Monitoring);
    assert!(controller.config().monitoring);
    let (device, params) = backend.outputs_opened()[0];
    assert_eq!(device, DeviceId(0));
    assert_eq!(params.channels, 2);

    assert!(backend.feed(&constant(0.5, 256, 2), 1.0));
    let mut out = vec![1.0; 256 * 2];
    assert!(backend.render(&mut out));
    assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-6));

    assert_eq!(controller.set_monitor_volume(0.5), 0.5);
    assert!(backend.feed(&constant(0.5, 256, 2), 2.0));
    assert!(backend.render(&mut out));
    assert!(out.iter().all(|&s| (s - 0.25).abs() < 1e-6));
}

#[test]
fn test_stop_monitoring_keeps_capture() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);
    controller.start().unwrap();
    controller.start_monitoring().unwrap();

    controller.stop_monitoring().unwrap();
    assert_eq!(controller.state(), StreamState::Capturing);
    assert!(backend.capture_open());
    assert!(!backend.output_open());
    assert!(!controller.config().monitoring);

    assert!(controller.toggle_monitoring().unwrap());
    assert_eq!(controller.state(), StreamState::Monitoring);
    assert!(!controller.toggle_monitoring().unwrap());
    assert_eq!(controller.state(), StreamState::Capturing);
}

#[test]
fn test_monitoring_failure_restores_capture() {
    let backend = MockBackend::studio();
    backend.fail_output(true);
    let controller = controller(&backend);
    controller.start().unwrap();

    let err = controller.start_monitoring().unwrap_err();
    assert!(matches!(err, AudioError::DeviceOpen(_)));
    assert_eq!(controller.state(), StreamState::Capturing);
    assert!(backend.capture_open());
    assert!(!backend.output_open());
    assert!(!controller.config().monitoring);
}

#[test]
fn test_start_with_monitoring_falls_back_to_capture() {
    let backend = MockBackend::studio();
    backend.fail_output(true);
    let config = CaptureConfig {
        monitoring: true,
        ..Default::default()
    };
    let controller = StreamController::with_backend(Arc::new(backend.clone()), config);

    controller.start().unwrap();
    assert_eq!(controller.state(), StreamState::Capturing);
    assert!(backend.capture_open());
}

#[test]
fn test_reconfiguration_preserves_monitoring() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);
    controller.start().unwrap();
    controller.start_monitoring().unwrap();

    controller.set_buffer_size(512).unwrap();
    assert_eq!(controller.state(), StreamState::Monitoring);
    assert_eq!(backend.last_input().unwrap().1.block_size, 512);
    assert_eq!(backend.outputs_opened().len(), 2);
    assert!(backend.output_open());

    controller.set_output_device(DeviceId(2)).unwrap();
    assert_eq!(controller.state(), StreamState::Monitoring);
    assert_eq!(backend.outputs_opened().last().unwrap().0, DeviceId(2));
    assert_eq!(controller.active_output_device().unwrap().name, "Mock Speakers");
}

#[test]
fn test_threshold_is_clamped() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);

    assert_eq!(controller.set_threshold(1.7), 1.0);
    assert_eq!(controller.set_threshold(-0.3), 0.0);
    assert_eq!(controller.set_threshold(0.25), 0.25);
    assert_eq!(controller.threshold(), 0.25);
    assert_eq!(controller.config().onset_threshold, 0.25);
}

#[test]
fn test_onset_callback_delivery() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);
    let (tx, rx) = mpsc::channel();
    controller.on_onset(move |timestamp, rms| {
        let _ = tx.send((timestamp, rms));
    });
    controller.start().unwrap();

    let loud = constant(0.5, 256, 2);
    let quiet = constant(0.0, 256, 2);
    backend.feed(&loud, 10.0);
    backend.feed(&quiet, 10.02);
    backend.feed(&loud, 10.05); // inside the retrigger interval
    backend.feed(&loud, 10.2);

    let (first, rms) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(first, 10.0);
    assert!((rms - 0.5).abs() < 1e-6);

    let (second, _) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(second, 10.2);
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn test_threshold_change_applies_to_running_stream() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);
    let (tx, rx) = mpsc::channel();
    controller.on_onset(move |timestamp, _| {
        let _ = tx.send(timestamp);
    });
    controller.start().unwrap();

    controller.set_threshold(0.8);
    backend.feed(&constant(0.5, 128, 2), 1.0);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    controller.set_threshold(0.3);
    backend.feed(&constant(0.5, 128, 2), 2.0);
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 2.0);
}

#[tokio::test]
async fn test_onset_subscription() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);
    let mut onsets = controller.subscribe();
    controller.start().unwrap();

    backend.feed(&constant(0.4, 512, 2), 3.5);

    let event = tokio::time::timeout(Duration::from_secs(1), onsets.recv())
        .await
        .expect("onset not delivered")
        .unwrap();
    assert_eq!(event.timestamp, 3.5);
    assert!((event.rms - 0.4).abs() < 1e-6);
}

#[tokio::test]
async fn test_state_subscription() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);
    let mut states = controller.subscribe_state();

    controller.start().unwrap();
    controller.start_monitoring().unwrap();
    controller.stop().unwrap();

    // Monitoring is reopened through a stop, so the full sequence is observed
    let mut seen = Vec::new();
    while let Ok(state) = states.try_recv() {
        seen.push(state);
    }
    assert_eq!(
        seen,
        vec![
            StreamState::Capturing,
            StreamState::Stopped,
            StreamState::Capturing,
            StreamState::Monitoring,
            StreamState::Stopped,
        ]
    );
}

#[test]
fn test_level_and_diagnostics() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);
    controller.start().unwrap();

    backend.feed(&constant(0.3, 128, 2), 1.0);
    assert!((controller.level() - 0.3).abs() < 1e-6);

    // Three samples cannot be split into stereo frames
    backend.feed(&[0.1, 0.2, 0.3], 1.1);
    let diagnostics = controller.diagnostics();
    assert_eq!(diagnostics.callbacks, 2);
    assert_eq!(diagnostics.callback_errors, 1);

    controller.stop().unwrap();
    assert_eq!(controller.level(), 0.0);
}

#[test]
fn test_stop_reports_shutdown_timeout() {
    let backend = MockBackend::studio();
    backend.hang_on_close(SHUTDOWN_TIMEOUT + Duration::from_millis(500));
    let controller = controller(&backend);
    controller.start().unwrap();

    let err = controller.stop().unwrap_err();
    assert_eq!(err, AudioError::ShutdownTimeout(SHUTDOWN_TIMEOUT));
    assert!(!err.is_recoverable());
    assert_eq!(controller.state(), StreamState::Stopped);

    assert!(controller.stop().is_ok());
}

#[test]
fn test_failed_reopen_restores_previous_device() {
    let backend = MockBackend::studio();
    backend.refuse_device(DeviceId(1));
    let controller = controller(&backend);
    controller.set_input_channel(1).unwrap();
    controller.start().unwrap();

    let err = controller.set_device(DeviceId(1)).unwrap_err();
    assert!(matches!(err, AudioError::DeviceOpen(_)));

    let config = controller.config();
    assert_eq!(config.input_device, None);
    assert_eq!(config.input_channel, 1);
    assert_eq!(controller.state(), StreamState::Capturing);
    assert_eq!(backend.last_input().unwrap().0, DeviceId(0));
}

#[test]
fn test_stop_bounds_slow_listener() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);
    let (entered_tx, entered_rx) = mpsc::channel();
    controller.on_onset(move |_, _| {
        let _ = entered_tx.send(());
        thread::sleep(SHUTDOWN_TIMEOUT * 3);
    });
    controller.start().unwrap();

    backend.feed(&constant(0.5, 256, 2), 1.0);
    entered_rx.recv_timeout(Duration::from_secs(1)).unwrap();

    let started = Instant::now();
    let err = controller.stop().unwrap_err();
    assert_eq!(err, AudioError::ShutdownTimeout(SHUTDOWN_TIMEOUT));
    assert!(started.elapsed() < SHUTDOWN_TIMEOUT * 2);
    assert_eq!(controller.state(), StreamState::Stopped);
    assert!(!backend.capture_open());
}

#[test]
fn test_listener_may_call_back_into_controller() {
    let backend = MockBackend::studio();
    let controller = Arc::new(controller(&backend));
    let weak: Weak<StreamController<MockBackend>> = Arc::downgrade(&controller);
    let (entered_tx, entered_rx) = mpsc::channel();
    controller.on_onset(move |_, _| {
        let _ = entered_tx.send(());
        thread::sleep(Duration::from_millis(200));
        if let Some(controller) = weak.upgrade() {
            controller.set_threshold(0.2);
            controller.set_monitor_volume(0.6);
            let _ = controller.config();
        }
    });
    controller.start().unwrap();

    backend.feed(&constant(0.5, 256, 2), 1.0);
    entered_rx.recv_timeout(Duration::from_secs(1)).unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let stopper = Arc::clone(&controller);
    thread::spawn(move || {
        let _ = done_tx.send(stopper.stop());
    });
    let result = done_rx
        .recv_timeout(Duration::from_secs(3))
        .expect("stop() blocked on a listener calling back into the controller");
    assert!(result.is_ok());

    assert_eq!(controller.threshold(), 0.2);
    let config = controller.config();
    assert_eq!(config.onset_threshold, 0.2);
    assert_eq!(config.monitor_volume, 0.6);
}

#[test]
fn test_listener_may_stop_the_controller() {
    let backend = MockBackend::studio();
    let controller = Arc::new(controller(&backend));
    let weak = Arc::downgrade(&controller);
    let (tx, rx) = mpsc::channel();
    controller.on_onset(move |_, _| {
        if let Some(controller) = weak.upgrade() {
            let _ = tx.send(controller.stop());
        }
    });
    controller.start().unwrap();

    backend.feed(&constant(0.5, 256, 2), 1.0);
    let result = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(result.is_ok());
    assert_eq!(controller.state(), StreamState::Stopped);
    assert!(!backend.capture_open());
}

#[test]
fn test_panicking_listener_does_not_stop_delivery() {
    let backend = MockBackend::studio();
    let controller = controller(&backend);
    controller.on_onset(|timestamp, _| {
        if timestamp == 1.0 {
            panic!("listener bug");
        }
    });
    let (tx, rx) = mpsc::channel();
    controller.on_onset(move |timestamp, _| {
        let _ = tx.send(timestamp);
    });
    controller.start().unwrap();

    let loud = constant(0.5, 256, 2);
    for n in 1..=6 {
        backend.feed(&loud, n as f64);
    }

    let delivered: Vec<f64> = (0..6)
        .map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap())
        .collect();
    assert_eq!(delivered, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert_eq!(controller.diagnostics().listener_panics, 1);
    assert_eq!(controller.state(), StreamState::Capturing);
    assert!(controller.stop().is_ok());
}
