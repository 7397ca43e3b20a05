//! In-memory audio backend for hardware-free tests
//!
//! Open streams park their processors inside the backend; tests drive them
//! with [`MockBackend::feed`] and [`MockBackend::render`]. Dropping a stream
//! detaches its processor, the way a real device stops calling back.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use pickbeat::audio::capture::CaptureProcessor;
use pickbeat::audio::monitor::MonitorProcessor;
use pickbeat::audio::{
    AudioBackend, AudioError, AudioResult, DeviceDescriptor, DeviceId, StreamParams,
};

#[derive(Default)]
struct Shared {
    devices: Vec<DeviceDescriptor>,
    capture: Option<CaptureProcessor>,
    monitor: Option<MonitorProcessor>,
    fail_input: bool,
    fail_output: bool,
    fail_enumeration: bool,
    refused: Vec<DeviceId>,
    close_delay: Option<Duration>,
    inputs_opened: Vec<(DeviceId, StreamParams)>,
    outputs_opened: Vec<(DeviceId, StreamParams)>,
}

#[derive(Clone, Default)]
pub struct MockBackend {
    shared: Arc<Mutex<Shared>>,
}

pub struct MockStream {
    shared: Arc<Mutex<Shared>>,
    output: bool,
    close_delay: Option<Duration>,
}

impl Drop for MockStream {
    fn drop(&mut self) {
        if let Some(delay) = self.close_delay {
            thread::sleep(delay);
        }
        let mut shared = self.shared.lock().unwrap();
        if self.output {
            shared.monitor = None;
        } else {
            shared.capture = None;
        }
    }
}

pub fn device(id: usize, name: &str, inputs: u16, outputs: u16) -> DeviceDescriptor {
    DeviceDescriptor {
        id: DeviceId(id),
        name: name.to_string(),
        max_input_channels: inputs,
        max_output_channels: outputs,
        default_sample_rate: 48000,
        is_default_input: false,
        is_default_output: false,
    }
}

impl MockBackend {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        let backend = Self::default();
        backend.lock().devices = devices;
        backend
    }

    /// Stereo interface (default in/out), mono mic and stereo speakers
    pub fn studio() -> Self {
        let mut interface = device(0, "Mock Interface", 2, 2);
        interface.is_default_input = true;
        interface.is_default_output = true;
        Self::new(vec![
            interface,
            device(1, "Mock Mic", 1, 0),
            device(2, "Mock Speakers", 0, 2),
        ])
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap()
    }

    pub fn set_devices(&self, devices: Vec<DeviceDescriptor>) {
        self.lock().devices = devices;
    }

    pub fn fail_input(&self, fail: bool) {
        self.lock().fail_input = fail;
    }

    pub fn fail_output(&self, fail: bool) {
        self.lock().fail_output = fail;
    }

    /// Make one device refuse to open while the others keep working
    pub fn refuse_device(&self, id: DeviceId) {
        self.lock().refused.push(id);
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.lock().fail_enumeration = fail;
    }

    /// Make streams opened from now on block for `delay` when closed
    pub fn hang_on_close(&self, delay: Duration) {
        self.lock().close_delay = Some(delay);
    }

    /// Deliver one interleaved input buffer; false if no capture stream is open
    pub fn feed(&self, data: &[f32], timestamp: f64) -> bool {
        match self.lock().capture.as_mut() {
            Some(capture) => {
                capture.process_at(data, timestamp);
                true
            }
            None => false,
        }
    }

    /// Pull one interleaved output buffer; false if no output stream is open
    pub fn render(&self, output: &mut [f32]) -> bool {
        match self.lock().monitor.as_mut() {
            Some(monitor) => {
                monitor.render(output);
                true
            }
            None => false,
        }
    }

    pub fn capture_open(&self) -> bool {
        self.lock().capture.is_some()
    }

    pub fn output_open(&self) -> bool {
        self.lock().monitor.is_some()
    }

    pub fn inputs_opened(&self) -> Vec<(DeviceId, StreamParams)> {
        self.lock().inputs_opened.clone()
    }

    pub fn outputs_opened(&self) -> Vec<(DeviceId, StreamParams)> {
        self.lock().outputs_opened.clone()
    }

    pub fn last_input(&self) -> Option<(DeviceId, StreamParams)> {
        self.lock().inputs_opened.last().copied()
    }

    fn stream(&self, output: bool, close_delay: Option<Duration>) -> MockStream {
        MockStream {
            shared: Arc::clone(&self.shared),
            output,
            close_delay,
        }
    }
}

impl AudioBackend for MockBackend {
    type Stream = MockStream;

    fn devices(&self) -> AudioResult<Vec<DeviceDescriptor>> {
        let shared = self.lock();
        if shared.fail_enumeration {
            return Err(AudioError::DeviceUnavailable("mock host offline".to_string()));
        }
        Ok(shared.devices.clone())
    }

    fn open_input(
        &self,
        device: &DeviceDescriptor,
        params: &StreamParams,
        processor: CaptureProcessor,
    ) -> AudioResult<MockStream> {
        let mut shared = self.lock();
        if shared.fail_input || shared.refused.contains(&device.id) {
            return Err(AudioError::DeviceOpen(format!("{} refused to open", device.name)));
        }
        shared.inputs_opened.push((device.id, *params));
        shared.capture = Some(processor);
        let delay = shared.close_delay;
        drop(shared);
        Ok(self.stream(false, delay))
    }

    fn open_output(
        &self,
        device: &DeviceDescriptor,
        params: &StreamParams,
        processor: MonitorProcessor,
    ) -> AudioResult<MockStream> {
        let mut shared = self.lock();
        if shared.fail_output || shared.refused.contains(&device.id) {
            return Err(AudioError::DeviceOpen(format!("{} refused to open", device.name)));
        }
        shared.outputs_opened.push((device.id, *params));
        shared.monitor = Some(processor);
        let delay = shared.close_delay;
        drop(shared);
        Ok(self.stream(true, delay))
    }
}

/// `frames` of interleaved audio with every sample set to `value`
pub fn constant(value: f32, frames: usize, channels: usize) -> Vec<f32> {
    vec![value; frames * channels]
}
