//! Scalars shared between the control thread and the real-time callbacks
//!
//! Every field is an independent atomic; readers never see torn values but
//! there is no consistency across fields.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::audio::onset::clamp_unit;

/// `f32` stored as its bit pattern in an `AtomicU32`
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Monotonic seconds since a fixed epoch
///
/// Block timestamps and the beat clock must share one instance so that hit
/// times and beat anchors are comparable.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDiagnostics {
    /// Capture callback invocations
    pub callbacks: u64,
    /// Callback errors swallowed locally (format mismatch, driver errors)
    pub callback_errors: u64,
    /// Onsets dropped because the dispatcher queue was full
    pub dropped_onsets: u64,
    /// Samples that did not fit into the monitoring ring
    pub monitor_overruns: u64,
    /// Output callbacks that ran out of monitored samples
    pub monitor_underruns: u64,
    /// Onset listener invocations that panicked
    pub listener_panics: u64,
}

/// Live parameters and counters of the capture pipeline
#[derive(Debug)]
pub struct StreamControls {
    threshold: AtomicF32,
    monitor_volume: AtomicF32,
    level: AtomicF32,
    monitoring: AtomicBool,
    callbacks: AtomicU64,
    callback_errors: AtomicU64,
    dropped_onsets: AtomicU64,
    monitor_overruns: AtomicU64,
    monitor_underruns: AtomicU64,
}

impl StreamControls {
    pub fn new(threshold: f32, monitor_volume: f32) -> Self {
        Self {
            threshold: AtomicF32::new(clamp_unit(threshold)),
            monitor_volume: AtomicF32::new(clamp_unit(monitor_volume)),
            level: AtomicF32::new(0.0),
            monitoring: AtomicBool::new(false),
            callbacks: AtomicU64::new(0),
            callback_errors: AtomicU64::new(0),
            dropped_onsets: AtomicU64::new(0),
            monitor_overruns: AtomicU64::new(0),
            monitor_underruns: AtomicU64::new(0),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold.load()
    }

    /// Clamped to [0, 1]; returns the stored value
    pub fn set_threshold(&self, threshold: f32) -> f32 {
        let threshold = clamp_unit(threshold);
        self.threshold.store(threshold);
        threshold
    }

    pub fn monitor_volume(&self) -> f32 {
        self.monitor_volume.load()
    }

    /// Clamped to [0, 1]; returns the stored value
    pub fn set_monitor_volume(&self, volume: f32) -> f32 {
        let volume = clamp_unit(volume);
        self.monitor_volume.store(volume);
        volume
    }

    /// Most recent block RMS
    pub fn level(&self) -> f32 {
        self.level.load()
    }

    pub(crate) fn set_level(&self, level: f32) {
        self.level.store(level);
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::Acquire)
    }

    pub(crate) fn set_monitoring(&self, monitoring: bool) {
        self.monitoring.store(monitoring, Ordering::Release);
    }

    pub(crate) fn record_callback(&self) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_callback_error(&self) {
        self.callback_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_onset(&self) {
        self.dropped_onsets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_monitor_overrun(&self, samples: u64) {
        self.monitor_overruns.fetch_add(samples, Ordering::Relaxed);
    }

    pub(crate) fn record_monitor_underrun(&self) {
        self.monitor_underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn diagnostics(&self) -> StreamDiagnostics {
        StreamDiagnostics {
            callbacks: self.callbacks.load(Ordering::Relaxed),
            callback_errors: self.callback_errors.load(Ordering::Relaxed),
            dropped_onsets: self.dropped_onsets.load(Ordering::Relaxed),
            monitor_overruns: self.monitor_overruns.load(Ordering::Relaxed),
            monitor_underruns: self.monitor_underruns.load(Ordering::Relaxed),
            // Counted by the onset listeners, filled in by the controller
            listener_panics: 0,
        }
    }
}

impl Default for StreamControls {
    fn default() -> Self {
        Self::new(crate::audio::onset::DEFAULT_THRESHOLD, 1.0)
    }
}
