//! Capture/monitoring stream lifecycle
//!
//! ```text
//! Stopped --start()--> Capturing --start_monitoring()--> Capturing+Monitoring
//!    ^                    |  ^                                 |
//!    +------stop()--------+  +--------stop_monitoring()--------+
//! ```
//!
//! Streams live on a dedicated session thread which opens them, reports the
//! result, parks until told to stop, drops them and acknowledges. The control
//! side waits for that acknowledgement at most [`SHUTDOWN_TIMEOUT`], so
//! `stop()` either returns with the callbacks detached from the device or
//! reports [`AudioError::ShutdownTimeout`].
//!
//! Every reconfiguration stops the session, edits the configuration under the
//! control lock and reopens with the previous running/monitoring state. If the
//! reopen fails the previous configuration is restored.
//!
//! Onset listeners run on a dispatcher thread and may call back into the
//! controller, so a closed session's dispatcher is only waited for after the
//! control lock is released, again bounded by [`SHUTDOWN_TIMEOUT`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::audio::backend::{AudioBackend, CpalBackend, StreamParams};
use crate::audio::buffer::{AudioRingBuffer, OnsetQueue};
use crate::audio::capture::CaptureProcessor;
use crate::audio::controls::{MonotonicClock, StreamControls, StreamDiagnostics};
use crate::audio::device::{DeviceDescriptor, DeviceId, DeviceRegistry};
use crate::audio::dispatch::{OnsetDispatcher, OnsetListeners};
use crate::audio::error::{AudioError, AudioResult};
use crate::audio::monitor::MonitorProcessor;
use crate::audio::onset::{OnsetDetector, OnsetEvent};
use crate::state::config::{clamp_buffer_size, CaptureConfig};
use crate::state::{StreamState, StreamStateCell};

/// Upper bound for detaching the callbacks from the device in `stop()`
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound for the backend to open the streams
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Monitoring is rendered as mono or stereo
const MAX_MONITOR_CHANNELS: u16 = 2;

/// Output half of a session
struct MonitorPlan {
    device: DeviceDescriptor,
    params: StreamParams,
    processor: MonitorProcessor,
}

/// Everything the session thread needs to open its streams
struct SessionPlan {
    input: DeviceDescriptor,
    input_params: StreamParams,
    capture: CaptureProcessor,
    monitor: Option<MonitorPlan>,
}

/// Handles to a running session thread
struct ActiveSession {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    thread: Option<JoinHandle<()>>,
    dispatcher: OnsetDispatcher,
    input: DeviceDescriptor,
    output: Option<DeviceDescriptor>,
}

struct ControllerInner {
    config: CaptureConfig,
    session: Option<ActiveSession>,
    /// Dispatchers told to stop, waited for once the lock is released
    retired: Vec<OnsetDispatcher>,
}

/// Owner of the capture and monitoring streams
///
/// All lifecycle methods take `&self` and serialize on one control mutex;
/// state, level, threshold and volume reads never take that lock.
///
/// # Example
/// ```no_run
/// use pickbeat::audio::StreamController;
/// use pickbeat::state::CaptureConfig;
///
/// let controller = StreamController::new(CaptureConfig::default());
/// controller.on_onset(|timestamp, rms| println!("onset at {timestamp:.3}s ({rms:.2})"));
/// controller.start().unwrap();
/// // ...
/// controller.stop().unwrap();
/// ```
pub struct StreamController<B: AudioBackend = CpalBackend> {
    backend: Arc<B>,
    registry: DeviceRegistry<B>,
    inner: Mutex<ControllerInner>,
    state: StreamStateCell,
    controls: Arc<StreamControls>,
    listeners: Arc<OnsetListeners>,
    clock: MonotonicClock,
}

impl StreamController<CpalBackend> {
    /// Controller over the system audio host
    pub fn new(config: CaptureConfig) -> Self {
        Self::with_backend(Arc::new(CpalBackend), config)
    }
}

impl<B: AudioBackend> StreamController<B> {
    pub fn with_backend(backend: Arc<B>, config: CaptureConfig) -> Self {
        let config = config.clamped();
        let controls = Arc::new(StreamControls::new(
            config.onset_threshold,
            config.monitor_volume,
        ));

        Self {
            registry: DeviceRegistry::new(Arc::clone(&backend)),
            backend,
            inner: Mutex::new(ControllerInner {
                config,
                session: None,
                retired: Vec::new(),
            }),
            state: StreamStateCell::new(),
            controls,
            listeners: Arc::new(OnsetListeners::new()),
            clock: MonotonicClock::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- queries ----

    pub fn state(&self) -> StreamState {
        self.state.current()
    }

    /// Receive every state change
    pub fn subscribe_state(&self) -> mpsc::Receiver<StreamState> {
        self.state.subscribe()
    }

    /// Current configuration, with the live threshold and volume
    pub fn config(&self) -> CaptureConfig {
        let mut config = self.lock().config.clone();
        config.onset_threshold = self.controls.threshold();
        config.monitor_volume = self.controls.monitor_volume();
        config
    }

    pub fn registry(&self) -> &DeviceRegistry<B> {
        &self.registry
    }

    pub fn list_input_devices(&self) -> AudioResult<Vec<DeviceDescriptor>> {
        self.registry.list_input_devices()
    }

    pub fn list_output_devices(&self) -> AudioResult<Vec<DeviceDescriptor>> {
        self.registry.list_output_devices()
    }

    /// Clock used to timestamp captured blocks
    pub fn clock(&self) -> MonotonicClock {
        self.clock
    }

    /// RMS of the most recent block, 0.0 while stopped
    pub fn level(&self) -> f32 {
        self.controls.level()
    }

    pub fn threshold(&self) -> f32 {
        self.controls.threshold()
    }

    pub fn monitor_volume(&self) -> f32 {
        self.controls.monitor_volume()
    }

    pub fn diagnostics(&self) -> StreamDiagnostics {
        StreamDiagnostics {
            listener_panics: self.listeners.panic_count(),
            ..self.controls.diagnostics()
        }
    }

    /// Input device of the running session
    pub fn active_input_device(&self) -> Option<DeviceDescriptor> {
        self.lock().session.as_ref().map(|s| s.input.clone())
    }

    /// Output device of the running session, if monitoring
    pub fn active_output_device(&self) -> Option<DeviceDescriptor> {
        self.lock().session.as_ref().and_then(|s| s.output.clone())
    }

    // ---- onset consumers ----

    /// Register `on_onset(timestamp, rms)`, invoked off the real-time thread
    pub fn on_onset<F>(&self, callback: F)
    where
        F: Fn(f64, f32) + Send + Sync + 'static,
    {
        self.listeners.add_callback(callback);
    }

    /// Channel receiving every accepted onset
    pub fn subscribe(&self) -> mpsc::Receiver<OnsetEvent> {
        self.listeners.subscribe()
    }

    // ---- lifecycle ----

    /// Open the capture stream; a no-op while already running
    ///
    /// If the configuration asks for monitoring and the output side fails,
    /// capture still starts and the failure is logged.
    ///
    /// # Errors
    /// `AudioError::DeviceOpen` if the input stream cannot be opened; the
    /// controller stays stopped and does not retry.
    pub fn start(&self) -> AudioResult<()> {
        self.exclusive(|inner| {
            if inner.session.is_some() {
                debug!("Audio capture already started");
                return Ok(());
            }

            let monitoring = inner.config.monitoring;
            match self.open_with_fallback(inner, monitoring) {
                Ok(()) => Ok(()),
                Err(err) if self.state().is_capturing() => {
                    warn!(error = %err, "Capture started without monitoring");
                    Ok(())
                }
                Err(err) => Err(err),
            }
        })
    }

    /// Close all streams; calling it while stopped is a no-op
    ///
    /// Onsets already queued are still delivered before it returns.
    ///
    /// # Errors
    /// `AudioError::ShutdownTimeout` if the streams did not detach in time,
    /// or an onset listener was still running when the wait ran out.
    pub fn stop(&self) -> AudioResult<()> {
        let (result, drained) = self.exclusive_drained(|inner| {
            let result = self.close_session(inner);
            inner.config.monitoring = false;
            result
        });
        result?;
        if !drained {
            error!(timeout = ?SHUTDOWN_TIMEOUT, "Onset listeners did not finish in time");
            return Err(AudioError::ShutdownTimeout(SHUTDOWN_TIMEOUT));
        }
        Ok(())
    }

    /// Start passing the input through to the output device
    ///
    /// # Errors
    /// `AudioError::NotCapturing` while stopped. If the output cannot be
    /// opened, a capture-only stream is restored before the error is returned.
    pub fn start_monitoring(&self) -> AudioResult<()> {
        self.exclusive(|inner| match self.state() {
            StreamState::Stopped => Err(AudioError::NotCapturing),
            StreamState::Monitoring => Ok(()),
            StreamState::Capturing => {
                self.close_session(inner)?;
                self.open_with_fallback(inner, true)
            }
        })
    }

    /// Stop the passthrough and keep capturing
    pub fn stop_monitoring(&self) -> AudioResult<()> {
        self.exclusive(|inner| {
            if !self.state().is_monitoring() {
                inner.config.monitoring = false;
                return Ok(());
            }
            self.close_session(inner)?;
            self.open_session(inner, false)
        })
    }

    /// Flip monitoring, returning whether it is now enabled
    pub fn toggle_monitoring(&self) -> AudioResult<bool> {
        if self.state().is_monitoring() {
            self.stop_monitoring()?;
        } else {
            self.start_monitoring()?;
        }
        Ok(self.state().is_monitoring())
    }

    // ---- configuration ----

    /// Select the input device; resets the input channel to 0
    pub fn set_device(&self, id: DeviceId) -> AudioResult<()> {
        let device = self.registry.find(id)?;
        if !device.is_input() {
            return Err(AudioError::DeviceNotFound(id));
        }
        info!(
            device = %device.name,
            channels = device.max_input_channels,
            "Selecting input device"
        );
        self.exclusive(|inner| {
            self.reconfigure(inner, |config| {
                config.input_device = Some(id);
                config.input_channel = 0;
            })
        })
    }

    /// Select the monitoring output device
    pub fn set_output_device(&self, id: DeviceId) -> AudioResult<()> {
        let device = self.registry.find(id)?;
        if !device.is_output() {
            return Err(AudioError::DeviceNotFound(id));
        }
        info!(device = %device.name, "Selecting output device");
        self.exclusive(|inner| self.reconfigure(inner, |config| config.output_device = Some(id)))
    }

    /// Select the analyzed input channel
    ///
    /// # Errors
    /// `AudioError::InvalidChannel` if the current input device has no such
    /// channel; the previous channel is kept.
    pub fn set_input_channel(&self, channel: u16) -> AudioResult<()> {
        self.exclusive(|inner| {
            let device = self.resolve_input(&inner.config)?;
            if channel >= device.max_input_channels {
                warn!(
                    channel,
                    device = %device.name,
                    available = device.max_input_channels,
                    "Rejecting input channel"
                );
                return Err(AudioError::InvalidChannel {
                    channel,
                    available: device.max_input_channels,
                });
            }
            if channel == inner.config.input_channel {
                return Ok(());
            }
            info!(channel, "Selecting input channel");
            self.reconfigure(inner, |config| config.input_channel = channel)
        })
    }

    /// Set frames per callback, clamped to 32..=8192
    pub fn set_buffer_size(&self, frames: u32) -> AudioResult<()> {
        let frames = clamp_buffer_size(frames);
        self.exclusive(|inner| {
            if frames == inner.config.buffer_size {
                return Ok(());
            }
            self.reconfigure(inner, |config| config.buffer_size = frames)
        })
    }

    pub fn set_low_latency(&self, enabled: bool) -> AudioResult<()> {
        self.exclusive(|inner| {
            if enabled == inner.config.low_latency {
                return Ok(());
            }
            self.reconfigure(inner, |config| config.low_latency = enabled)
        })
    }

    /// Set the onset debounce interval in seconds
    pub fn set_min_retrigger_interval(&self, secs: f64) -> AudioResult<()> {
        let secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
        self.exclusive(|inner| self.reconfigure(inner, |config| config.min_retrigger_secs = secs))
    }

    /// Set the onset threshold, clamped to [0, 1]; applies from the next block
    ///
    /// Never takes the control lock, so onset listeners may call it.
    pub fn set_threshold(&self, threshold: f32) -> f32 {
        self.controls.set_threshold(threshold)
    }

    /// Set the monitoring volume, clamped to [0, 1]; applies from the next block
    pub fn set_monitor_volume(&self, volume: f32) -> f32 {
        self.controls.set_monitor_volume(volume)
    }

    // ---- internals ----

    /// Run `op` under the control lock, then wait for retired dispatchers
    fn exclusive<T, F>(&self, op: F) -> AudioResult<T>
    where
        F: FnOnce(&mut ControllerInner) -> AudioResult<T>,
    {
        let (result, drained) = self.exclusive_drained(op);
        if !drained {
            warn!("Onset listeners of the previous stream are still running");
        }
        result
    }

    /// Like [`exclusive`](Self::exclusive), also reporting whether every
    /// retired dispatcher exited within [`SHUTDOWN_TIMEOUT`]
    fn exclusive_drained<T, F>(&self, op: F) -> (AudioResult<T>, bool)
    where
        F: FnOnce(&mut ControllerInner) -> AudioResult<T>,
    {
        let (result, retired) = {
            let mut inner = self.lock();
            let result = op(&mut inner);
            (result, std::mem::take(&mut inner.retired))
        };

        // Listeners may call back into the controller, so wait unlocked
        let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
        let drained = retired.into_iter().fold(true, |drained, mut dispatcher| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            dispatcher.stop(remaining) && drained
        });
        (result, drained)
    }

    fn set_state(&self, state: StreamState) {
        if let Err(err) = self.state.transition(state) {
            error!(error = %err, "Stream state machine out of sync");
        }
    }

    fn reconfigure<F>(&self, inner: &mut ControllerInner, apply: F) -> AudioResult<()>
    where
        F: FnOnce(&mut CaptureConfig),
    {
        let prior = self.state();
        if !prior.is_capturing() {
            apply(&mut inner.config);
            return Ok(());
        }

        self.close_session(inner)?;
        let previous = inner.config.clone();
        apply(&mut inner.config);
        let err = match self.open_with_fallback(inner, prior.is_monitoring()) {
            Ok(()) => return Ok(()),
            // Capture runs with the new setting, only monitoring was lost
            Err(err) if self.state().is_capturing() => return Err(err),
            Err(err) => err,
        };

        warn!(error = %err, "Reopen failed, restoring the previous configuration");
        inner.config = previous;
        if let Err(restore) = self.open_with_fallback(inner, prior.is_monitoring()) {
            if !self.state().is_capturing() {
                error!(error = %restore, "Previous configuration failed to reopen too");
            }
        }
        Err(err)
    }

    fn resolve_input(&self, config: &CaptureConfig) -> AudioResult<DeviceDescriptor> {
        match config.input_device {
            Some(id) => {
                let device = self.registry.find(id)?;
                if device.is_input() {
                    Ok(device)
                } else {
                    Err(AudioError::DeviceNotFound(id))
                }
            }
            None => self
                .registry
                .default_input_device()?
                .ok_or_else(|| AudioError::DeviceOpen("no input device available".to_string())),
        }
    }

    fn resolve_output(&self, config: &CaptureConfig) -> AudioResult<DeviceDescriptor> {
        match config.output_device {
            Some(id) => {
                let device = self.registry.find(id)?;
                if device.is_output() {
                    Ok(device)
                } else {
                    Err(AudioError::DeviceNotFound(id))
                }
            }
            None => self
                .registry
                .default_output_device()?
                .ok_or_else(|| AudioError::DeviceOpen("no output device available".to_string())),
        }
    }

    /// Open a session; a failed monitored open falls back to capture-only
    ///
    /// The monitoring error is still returned after the fallback succeeds.
    fn open_with_fallback(&self, inner: &mut ControllerInner, monitoring: bool) -> AudioResult<()> {
        match self.open_session(inner, monitoring) {
            Err(err) if monitoring => {
                warn!(error = %err, "Monitoring failed, restoring capture-only stream");
                self.open_session(inner, false)?;
                Err(err)
            }
            result => result,
        }
    }

    fn open_session(&self, inner: &mut ControllerInner, monitoring: bool) -> AudioResult<()> {
        let config = inner.config.clone();
        let input = self.resolve_input(&config)?;
        let channels = input.max_input_channels;
        if config.input_channel >= channels {
            warn!(
                channel = config.input_channel,
                available = channels,
                "Configured channel missing on device, using the last channel"
            );
        }

        let block_size = config.effective_buffer_size();
        let input_params = StreamParams {
            channels,
            sample_rate: config.sample_rate,
            block_size,
        };

        let (onset_tx, onset_rx) = OnsetQueue::with_default_capacity();
        let mut capture = CaptureProcessor::new(
            OnsetDetector::new(self.controls.threshold(), config.min_retrigger_secs),
            Arc::clone(&self.controls),
            onset_tx,
            self.clock,
            channels,
            config.input_channel,
            block_size as usize,
        );

        let monitor = if monitoring {
            let device = self.resolve_output(&config)?;
            let out_channels = device.max_output_channels.min(MAX_MONITOR_CHANNELS);
            let (ring_tx, ring_rx) = AudioRingBuffer::for_monitoring(block_size as usize);
            capture = capture.with_monitor(ring_tx);
            Some(MonitorPlan {
                params: StreamParams {
                    channels: out_channels,
                    sample_rate: config.sample_rate,
                    block_size,
                },
                processor: MonitorProcessor::new(
                    ring_rx,
                    Arc::clone(&self.controls),
                    out_channels,
                    block_size as usize,
                ),
                device,
            })
        } else {
            None
        };
        let output = monitor.as_ref().map(|plan| plan.device.clone());

        let dispatcher = OnsetDispatcher::spawn(onset_rx, Arc::clone(&self.listeners))
            .map_err(|e| AudioError::DeviceOpen(format!("failed to start onset dispatcher: {e}")))?;

        let plan = SessionPlan {
            input: input.clone(),
            input_params,
            capture,
            monitor,
        };
        let (opened_tx, opened_rx) = bounded(1);
        let (stop_tx, stop_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(1);
        let backend = Arc::clone(&self.backend);

        self.controls.set_monitoring(monitoring);
        let spawned = thread::Builder::new()
            .name("pickbeat-audio".to_string())
            .spawn(move || run_session(backend, plan, opened_tx, stop_rx, done_tx));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                self.controls.set_monitoring(false);
                dispatcher.signal_stop();
                inner.retired.push(dispatcher);
                return Err(AudioError::DeviceOpen(format!("failed to spawn audio thread: {e}")));
            }
        };

        // (error, whether the thread has finished and can be joined)
        let failure = match opened_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some((err, true)),
            Err(RecvTimeoutError::Timeout) => {
                let _ = stop_tx.send(());
                Some((
                    AudioError::DeviceOpen(format!("device did not open within {OPEN_TIMEOUT:?}")),
                    false,
                ))
            }
            Err(RecvTimeoutError::Disconnected) => Some((
                AudioError::DeviceOpen("audio thread exited while opening".to_string()),
                true,
            )),
        };
        if let Some((err, finished)) = failure {
            if finished && thread.join().is_err() {
                error!("Audio session thread panicked while opening");
            }
            self.controls.set_monitoring(false);
            dispatcher.signal_stop();
            inner.retired.push(dispatcher);
            error!(device = %input.name, monitoring, error = %err, "Failed to open audio stream");
            return Err(err);
        }

        info!(
            device = %input.name,
            output = output.as_ref().map(|d| d.name.as_str()).unwrap_or("-"),
            channels,
            channel = config.input_channel,
            sample_rate = config.sample_rate,
            block_size,
            monitoring,
            "Audio capture started"
        );

        inner.session = Some(ActiveSession {
            stop_tx,
            done_rx,
            thread: Some(thread),
            dispatcher,
            input,
            output,
        });
        inner.config.monitoring = monitoring;
        self.set_state(StreamState::Capturing);
        if monitoring {
            self.set_state(StreamState::Monitoring);
        }
        Ok(())
    }

    /// Detach the streams; the dispatcher is retired, not waited for
    fn close_session(&self, inner: &mut ControllerInner) -> AudioResult<()> {
        let Some(mut session) = inner.session.take() else {
            return Ok(());
        };

        info!(device = %session.input.name, "Stopping audio capture");
        self.controls.set_monitoring(false);
        let _ = session.stop_tx.send(());

        let result = match session.done_rx.recv_timeout(SHUTDOWN_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = session.thread.take() {
                    if thread.join().is_err() {
                        error!("Audio session thread panicked");
                    }
                }
                debug!("Audio capture stopped");
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                error!(timeout = ?SHUTDOWN_TIMEOUT, "Audio stream did not shut down in time");
                Err(AudioError::ShutdownTimeout(SHUTDOWN_TIMEOUT))
            }
        };

        session.dispatcher.signal_stop();
        inner.retired.push(session.dispatcher);
        self.controls.set_level(0.0);
        self.set_state(StreamState::Stopped);
        result
    }
}

impl<B: AudioBackend> Drop for StreamController<B> {
    fn drop(&mut self) {
        let (result, drained) = self.exclusive_drained(|inner| self.close_session(inner));
        if let Err(err) = result {
            warn!(error = %err, "Audio capture did not stop cleanly");
        }
        if !drained {
            warn!("Onset listeners still running after the controller was dropped");
        }
    }
}

/// Body of the session thread
///
/// Streams are created and dropped here, so backends with thread-bound
/// stream handles work unchanged.
fn run_session<B: AudioBackend>(
    backend: Arc<B>,
    plan: SessionPlan,
    opened: Sender<AudioResult<()>>,
    stop: Receiver<()>,
    done: Sender<()>,
) {
    let SessionPlan {
        input,
        input_params,
        capture,
        monitor,
    } = plan;

    let input_stream = match backend.open_input(&input, &input_params, capture) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = opened.send(Err(err));
            return;
        }
    };

    let output_stream = match monitor {
        Some(plan) => match backend.open_output(&plan.device, &plan.params, plan.processor) {
            Ok(stream) => Some(stream),
            Err(err) => {
                drop(input_stream);
                let _ = opened.send(Err(err));
                return;
            }
        },
        None => None,
    };

    if opened.send(Ok(())).is_err() {
        // Controller gave up waiting; streams close on return
        return;
    }

    // A dropped controller disconnects the channel, which also means stop
    let _ = stop.recv();
    drop(output_stream);
    drop(input_stream);
    let _ = done.send(());
}
