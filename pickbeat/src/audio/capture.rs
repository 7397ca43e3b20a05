use std::sync::Arc;

use crate::audio::buffer::{AudioBufferProducer, OnsetProducer};
use crate::audio::controls::{MonotonicClock, StreamControls};
use crate::audio::onset::{AudioBlock, OnsetDetector};

/// Capture-side real-time processor
///
/// Runs inside the input callback: selects the configured channel, measures
/// the block level, detects onsets and feeds the monitoring ring. Everything
/// it needs is allocated up front; the callback path never allocates, locks
/// or logs. Malformed buffers are dropped and counted.
pub struct CaptureProcessor {
    detector: OnsetDetector,
    controls: Arc<StreamControls>,
    onsets: OnsetProducer,
    monitor: Option<AudioBufferProducer>,
    clock: MonotonicClock,
    channels: usize,
    channel: usize,
    block_size: usize,
    scratch: Vec<f32>,
}

impl CaptureProcessor {
    /// # Arguments
    /// * `channels` - Interleaved channel count of the input stream
    /// * `channel` - Channel to analyze, clamped to the last available channel
    /// * `block_size` - Expected frames per callback; larger buffers are processed in pieces
    pub fn new(
        detector: OnsetDetector,
        controls: Arc<StreamControls>,
        onsets: OnsetProducer,
        clock: MonotonicClock,
        channels: u16,
        channel: u16,
        block_size: usize,
    ) -> Self {
        let channels = usize::from(channels);
        let block_size = block_size.max(1);
        Self {
            detector,
            controls,
            onsets,
            monitor: None,
            clock,
            channels,
            channel: usize::from(channel).min(channels.saturating_sub(1)),
            block_size,
            scratch: Vec::with_capacity(block_size),
        }
    }

    /// Also forward captured samples to the monitoring ring
    pub fn with_monitor(mut self, monitor: AudioBufferProducer) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn channels(&self) -> u16 {
        self.channels as u16
    }

    pub fn controls(&self) -> Arc<StreamControls> {
        Arc::clone(&self.controls)
    }

    /// Process an interleaved input buffer stamped with the current time
    pub fn process(&mut self, data: &[f32]) {
        let timestamp = self.clock.now();
        self.process_at(data, timestamp);
    }

    /// Process an interleaved input buffer with an explicit arrival time
    pub fn process_at(&mut self, data: &[f32], timestamp: f64) {
        self.controls.record_callback();
        if self.channels == 0 || data.len() % self.channels != 0 {
            self.controls.record_callback_error();
            return;
        }

        let chunk_len = self.block_size * self.channels;
        for frames in data.chunks(chunk_len) {
            self.scratch.clear();
            self.scratch.extend(
                frames
                    .chunks_exact(self.channels)
                    .map(|frame| frame[self.channel]),
            );
            self.handle_block(timestamp);
        }
    }

    fn handle_block(&mut self, timestamp: f64) {
        let block = AudioBlock::new(&self.scratch, timestamp);
        let level = block.rms();
        self.controls.set_level(level);

        self.detector.set_threshold(self.controls.threshold());
        if let Some(event) = self.detector.detect_level(level, timestamp) {
            if !self.onsets.try_push(event) {
                self.controls.record_dropped_onset();
            }
        }

        if let Some(monitor) = self.monitor.as_mut() {
            let written = monitor.push_slice(block.samples);
            if written < block.samples.len() {
                self.controls
                    .record_monitor_overrun((block.samples.len() - written) as u64);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::{AudioRingBuffer, OnsetConsumer, OnsetQueue};

    fn processor(channels: u16, channel: u16, block: usize) -> (CaptureProcessor, OnsetConsumer) {
        let (producer, consumer) = OnsetQueue::new(8);
        let controls = Arc::new(StreamControls::new(0.2, 1.0));
        let processor = CaptureProcessor::new(
            OnsetDetector::new(0.2, 0.1),
            controls,
            producer,
            MonotonicClock::new(),
            channels,
            channel,
            block,
        );
        (processor, consumer)
    }

    fn interleave(left: f32, right: f32, frames: usize) -> Vec<f32> {
        (0..frames).flat_map(|_| [left, right]).collect()
    }

    #[test]
    fn test_selects_configured_channel() {
        let (mut capture, mut onsets) = processor(2, 1, 64);

        capture.process_at(&interleave(0.9, 0.0, 64), 0.0);
        assert!(onsets.pop().is_none(), "loud left channel must be ignored");
        assert_eq!(capture.controls().level(), 0.0);

        capture.process_at(&interleave(0.0, 0.5, 64), 1.0);
        let event = onsets.pop().expect("onset on right channel");
        assert_eq!(event.timestamp, 1.0);
        assert!((event.rms - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_channel_clamped_to_device() {
        let (capture, _) = processor(2, 5, 64);
        assert_eq!(capture.channel, 1);
    }

    #[test]
    fn test_level_tracks_last_block() {
        let (mut capture, _) = processor(1, 0, 32);
        capture.process_at(&[0.1; 32], 0.0);
        assert!((capture.controls().level() - 0.1).abs() < 1e-6);
        capture.process_at(&[0.0; 32], 0.1);
        assert_eq!(capture.controls().level(), 0.0);
    }

    #[test]
    fn test_threshold_changes_apply_to_next_block() {
        let (mut capture, mut onsets) = processor(1, 0, 32);
        capture.controls().set_threshold(0.6);
        capture.process_at(&[0.5; 32], 0.0);
        assert!(onsets.pop().is_none());

        capture.controls().set_threshold(0.4);
        capture.process_at(&[0.5; 32], 0.5);
        assert!(onsets.pop().is_some());
    }

    #[test]
    fn test_malformed_buffer_is_counted() {
        let (mut capture, mut onsets) = processor(2, 0, 32);
        capture.process_at(&[0.9; 5], 0.0);
        assert!(onsets.pop().is_none());
        let diagnostics = capture.controls().diagnostics();
        assert_eq!(diagnostics.callbacks, 1);
        assert_eq!(diagnostics.callback_errors, 1);
    }

    #[test]
    fn test_full_queue_drops_onsets() {
        let (producer, _consumer) = OnsetQueue::new(1);
        let controls = Arc::new(StreamControls::new(0.2, 1.0));
        let mut capture = CaptureProcessor::new(
            OnsetDetector::new(0.2, 0.1),
            Arc::clone(&controls),
            producer,
            MonotonicClock::new(),
            1,
            0,
            16,
        );

        capture.process_at(&[0.9; 16], 0.0);
        capture.process_at(&[0.9; 16], 1.0);
        capture.process_at(&[0.9; 16], 2.0);
        assert_eq!(controls.diagnostics().dropped_onsets, 2);
    }

    #[test]
    fn test_oversized_buffer_processed_in_pieces() {
        let (mut capture, _) = processor(1, 0, 16);
        let mut data = vec![0.0f32; 16];
        data.extend(std::iter::repeat_n(0.3f32, 16));
        capture.process_at(&data, 0.0);
        // Level reflects the last piece
        assert!((capture.controls().level() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_feeds_monitor_ring() {
        let (ring_producer, mut ring_consumer) = AudioRingBuffer::new(8);
        let (capture, _) = processor(2, 0, 4);
        let mut capture = capture.with_monitor(ring_producer);

        capture.process_at(&interleave(0.25, 0.75, 4), 0.0);
        let mut out = [0.0f32; 4];
        assert_eq!(ring_consumer.pop_slice(&mut out), 4);
        assert_eq!(out, [0.25; 4]);

        capture.process_at(&interleave(0.25, 0.75, 4), 0.1);
        capture.process_at(&interleave(0.25, 0.75, 4), 0.2);
        capture.process_at(&interleave(0.25, 0.75, 4), 0.3);
        assert_eq!(capture.controls().diagnostics().monitor_overruns, 4);
    }
}
