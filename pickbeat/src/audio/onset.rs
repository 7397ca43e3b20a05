//! RMS-based onset detection with retrigger debouncing

use serde::{Deserialize, Serialize};

/// Default onset threshold (RMS, normalized audio)
pub const DEFAULT_THRESHOLD: f32 = 0.1;

/// Default minimum time between two onsets, in seconds
pub const DEFAULT_MIN_RETRIGGER_SECS: f64 = 0.1;

/// A detected transient
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnsetEvent {
    /// Arrival time of the block, seconds on the stream's monotonic clock
    pub timestamp: f64,
    /// Root-mean-square amplitude of the block
    pub rms: f32,
}

impl OnsetEvent {
    pub fn new(timestamp: f64, rms: f32) -> Self {
        Self { timestamp, rms }
    }
}

/// Mono samples of the selected channel for one callback period
#[derive(Debug, Clone, Copy)]
pub struct AudioBlock<'a> {
    pub samples: &'a [f32],
    pub timestamp: f64,
}

impl<'a> AudioBlock<'a> {
    pub fn new(samples: &'a [f32], timestamp: f64) -> Self {
        Self { samples, timestamp }
    }

    pub fn rms(&self) -> f32 {
        rms(self.samples)
    }
}

/// `sqrt(mean(x²))`, 0.0 for an empty block
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Threshold onset detector
///
/// Stateful and single-writer: only the capture callback may call
/// [`OnsetDetector::detect`] for a given instance.
#[derive(Debug, Clone)]
pub struct OnsetDetector {
    threshold: f32,
    min_retrigger_interval: f64,
    last_onset_time: Option<f64>,
}

impl Default for OnsetDetector {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_MIN_RETRIGGER_SECS)
    }
}

impl OnsetDetector {
    pub fn new(threshold: f32, min_retrigger_interval: f64) -> Self {
        Self {
            threshold: clamp_unit(threshold),
            min_retrigger_interval: min_retrigger_interval.max(0.0),
            last_onset_time: None,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Set the threshold, clamped to [0, 1]
    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = clamp_unit(threshold);
    }

    pub fn min_retrigger_interval(&self) -> f64 {
        self.min_retrigger_interval
    }

    pub fn last_onset_time(&self) -> Option<f64> {
        self.last_onset_time
    }

    /// Forget the previous onset so the next loud block fires immediately
    pub fn reset(&mut self) {
        self.last_onset_time = None;
    }

    /// Analyze one block of samples
    pub fn detect(&mut self, samples: &[f32], timestamp: f64) -> Option<OnsetEvent> {
        self.detect_level(rms(samples), timestamp)
    }

    pub fn detect_block(&mut self, block: &AudioBlock<'_>) -> Option<OnsetEvent> {
        self.detect(block.samples, block.timestamp)
    }

    /// Decide on an already computed RMS value
    pub fn detect_level(&mut self, rms: f32, timestamp: f64) -> Option<OnsetEvent> {
        if rms <= self.threshold {
            return None;
        }
        if let Some(last) = self.last_onset_time {
            if timestamp - last <= self.min_retrigger_interval {
                return None;
            }
        }
        self.last_onset_time = Some(timestamp);
        Some(OnsetEvent::new(timestamp, rms))
    }
}

/// Clamp to [0, 1], mapping NaN to 0
pub(crate) fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
