//! Monitoring (passthrough) of the captured signal to an output device

use std::sync::Arc;

use crate::audio::buffer::AudioBufferConsumer;
use crate::audio::controls::StreamControls;
use crate::audio::onset::clamp_unit;

/// Scale a mono block by `volume` and duplicate it into `output_channels`
///
/// # Example
/// ```
/// use pickbeat::audio::monitor::mix;
///
/// let out = mix(&[1.0, -0.5], 0.5, 2);
/// assert_eq!(out, vec![0.5, 0.5, -0.25, -0.25]);
/// ```
pub fn mix(input: &[f32], volume: f32, output_channels: usize) -> Vec<f32> {
    let mut output = vec![0.0; input.len() * output_channels];
    mix_into(input, volume, output_channels, &mut output);
    output
}

/// In-place variant of [`mix`] for the output callback
///
/// Frames of `output` beyond `input.len()` are filled with silence.
pub fn mix_into(input: &[f32], volume: f32, output_channels: usize, output: &mut [f32]) {
    if output_channels == 0 {
        output.fill(0.0);
        return;
    }
    let volume = clamp_unit(volume);
    let mut frames = output.chunks_exact_mut(output_channels);
    // input first: zip must not pull a frame it cannot fill
    for (&sample, frame) in input.iter().zip(&mut frames) {
        frame.fill(sample * volume);
    }
    for frame in &mut frames {
        frame.fill(0.0);
    }
    frames.into_remainder().fill(0.0);
}

/// Output-side real-time processor
///
/// Pulls monitored samples from the ring filled by the capture callback and
/// renders them at the current monitoring volume. Holds one block of backlog
/// before starting to play and discards backlog beyond two blocks, which
/// bounds the monitoring latency.
pub struct MonitorProcessor {
    consumer: AudioBufferConsumer,
    controls: Arc<StreamControls>,
    channels: usize,
    block_size: usize,
    scratch: Vec<f32>,
    primed: bool,
}

impl MonitorProcessor {
    pub fn new(
        consumer: AudioBufferConsumer,
        controls: Arc<StreamControls>,
        channels: u16,
        block_size: usize,
    ) -> Self {
        let block_size = block_size.max(1);
        Self {
            consumer,
            controls,
            channels: usize::from(channels),
            block_size,
            scratch: Vec::with_capacity(block_size),
            primed: false,
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels as u16
    }

    pub fn controls(&self) -> Arc<StreamControls> {
        Arc::clone(&self.controls)
    }

    /// Fill one interleaved output buffer
    pub fn render(&mut self, output: &mut [f32]) {
        if self.channels == 0 || output.len() % self.channels != 0 {
            self.controls.record_callback_error();
            output.fill(0.0);
            return;
        }
        if !self.controls.is_monitoring() {
            output.fill(0.0);
            return;
        }

        let backlog = self.consumer.available_samples();
        if backlog > self.block_size * 2 {
            self.consumer.skip(backlog - self.block_size);
        }
        if !self.primed {
            if backlog < self.block_size {
                output.fill(0.0);
                return;
            }
            self.primed = true;
        }

        let volume = self.controls.monitor_volume();
        let chunk_len = self.block_size * self.channels;
        for chunk in output.chunks_mut(chunk_len) {
            let frames = chunk.len() / self.channels;
            self.scratch.clear();
            self.scratch.resize(frames, 0.0);
            let read = self.consumer.pop_slice(&mut self.scratch);
            if read < frames {
                self.controls.record_monitor_underrun();
                self.primed = false;
            }
            mix_into(&self.scratch[..read], volume, self.channels, chunk);
        }
    }
}
