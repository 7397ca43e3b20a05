use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audio::controls::MonotonicClock;

/// Slowest accepted tempo
pub const MIN_TEMPO_BPM: f64 = 40.0;

/// Fastest accepted tempo
pub const MAX_TEMPO_BPM: f64 = 220.0;

/// Tempo of a fresh analyzer
pub const DEFAULT_TEMPO_BPM: f64 = 80.0;

/// Accepted deviation of a fresh analyzer, in units of its [`DeviationMode`]
pub const DEFAULT_TOLERANCE: f64 = 0.1;

/// Unit in which hit deviation and tolerance are expressed
///
/// The two are not equivalent across tempos: a tolerance of 0.1 beats is
/// 100 ms at 60 BPM but 50 ms at 120 BPM, while 0.1 s stays 100 ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationMode {
    /// `|beats_elapsed - nearest_beat|`, a fraction of a beat in [0, 0.5]
    #[default]
    Beats,
    /// `|timestamp - nearest_expected_time|` in seconds
    Seconds,
}

/// Clamp a tempo into [`MIN_TEMPO_BPM`, `MAX_TEMPO_BPM`]
pub fn clamp_tempo(bpm: f64) -> f64 {
    if bpm.is_nan() {
        return DEFAULT_TEMPO_BPM;
    }
    bpm.clamp(MIN_TEMPO_BPM, MAX_TEMPO_BPM)
}

/// Outcome of one analyzed hit
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HitVerdict {
    pub is_accurate: bool,
    /// Distance to the nearest beat, unit per [`DeviationMode`]
    pub deviation: f64,
    /// Index of the nearest beat, 0 being the anchor
    pub beat: i64,
}

/// Position of a time on the beat grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BeatPosition {
    /// Index of the last beat at or before the time
    pub beat: i64,
    /// Progress towards the next beat in [0, 1)
    pub phase: f64,
}

/// Aggregate accuracy
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RhythmStats {
    pub total_hits: u64,
    pub accurate_hits: u64,
    /// `accurate_hits / max(1, total_hits)`
    pub accuracy: f64,
    pub tempo: f64,
    /// Mean deviation over all analyzed hits, 0 when there are none
    pub mean_deviation: f64,
}

/// Beat clock and hit accuracy tracker
///
/// `Inactive` until [`start`](Self::start); hits analyzed while inactive are
/// ignored. Changing the tempo keeps the anchor, so within a running session
/// the grid is re-spaced around beat zero rather than re-anchored.
#[derive(Debug, Clone)]
pub struct RhythmAnalyzer {
    clock: MonotonicClock,
    tempo: f64,
    beat_interval: f64,
    tolerance: f64,
    mode: DeviationMode,
    anchor: f64,
    active: bool,
    total_hits: u64,
    accurate_hits: u64,
    deviation_sum: f64,
}

impl RhythmAnalyzer {
    pub fn new(clock: MonotonicClock) -> Self {
        Self::with_tolerance(clock, DEFAULT_TOLERANCE, DeviationMode::default())
    }

    pub fn with_tolerance(clock: MonotonicClock, tolerance: f64, mode: DeviationMode) -> Self {
        Self {
            clock,
            tempo: DEFAULT_TEMPO_BPM,
            beat_interval: 60.0 / DEFAULT_TEMPO_BPM,
            tolerance: tolerance.max(0.0),
            mode,
            anchor: 0.0,
            active: false,
            total_hits: 0,
            accurate_hits: 0,
            deviation_sum: 0.0,
        }
    }

    /// Anchor beat zero at the current clock time and reset statistics
    pub fn start(&mut self) {
        let now = self.clock.now();
        self.start_at(now);
    }

    /// Anchor beat zero at `anchor` and reset statistics
    pub fn start_at(&mut self, anchor: f64) {
        self.anchor = anchor;
        self.active = true;
        self.reset_stats();
        info!(tempo = self.tempo, anchor, "Rhythm analyzer started");
    }

    /// Freeze the clock; statistics are kept
    pub fn stop(&mut self) {
        if self.active {
            self.active = false;
            info!(
                total = self.total_hits,
                accurate = self.accurate_hits,
                "Rhythm analyzer stopped"
            );
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn reset_stats(&mut self) {
        self.total_hits = 0;
        self.accurate_hits = 0;
        self.deviation_sum = 0.0;
    }

    /// Set the tempo, clamped to [40, 220] BPM; the anchor does not move
    pub fn set_tempo(&mut self, bpm: f64) {
        self.tempo = clamp_tempo(bpm);
        self.beat_interval = 60.0 / self.tempo;
        debug!(tempo = self.tempo, interval = self.beat_interval, "Tempo changed");
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Seconds per beat
    pub fn beat_interval(&self) -> f64 {
        self.beat_interval
    }

    pub fn anchor(&self) -> f64 {
        self.anchor
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn set_tolerance(&mut self, tolerance: f64) {
        self.tolerance = tolerance.max(0.0);
    }

    pub fn deviation_mode(&self) -> DeviationMode {
        self.mode
    }

    pub fn set_deviation_mode(&mut self, mode: DeviationMode) {
        self.mode = mode;
    }

    pub fn clock(&self) -> MonotonicClock {
        self.clock
    }

    /// `(is_accurate, deviation)` for a hit; `(false, 0.0)` while inactive
    pub fn analyze_hit(&mut self, timestamp: f64) -> (bool, f64) {
        match self.evaluate(timestamp) {
            Some(verdict) => (verdict.is_accurate, verdict.deviation),
            None => (false, 0.0),
        }
    }

    /// Analyze a hit and update statistics; `None` while inactive
    pub fn evaluate(&mut self, timestamp: f64) -> Option<HitVerdict> {
        if !self.active {
            return None;
        }

        let beats_elapsed = (timestamp - self.anchor) / self.beat_interval;
        let nearest = beats_elapsed.round();
        let deviation = match self.mode {
            DeviationMode::Beats => (beats_elapsed - nearest).abs(),
            DeviationMode::Seconds => {
                (timestamp - (self.anchor + nearest * self.beat_interval)).abs()
            }
        };
        let is_accurate = deviation <= self.tolerance;

        self.total_hits += 1;
        if is_accurate {
            self.accurate_hits += 1;
        }
        self.deviation_sum += deviation;

        Some(HitVerdict {
            is_accurate,
            deviation,
            beat: nearest as i64,
        })
    }

    /// Where `timestamp` falls on the beat grid; `None` while inactive
    pub fn beat_position(&self, timestamp: f64) -> Option<BeatPosition> {
        if !self.active {
            return None;
        }
        let beats_elapsed = (timestamp - self.anchor) / self.beat_interval;
        let beat = beats_elapsed.floor();
        Some(BeatPosition {
            beat: beat as i64,
            phase: beats_elapsed - beat,
        })
    }

    /// Time of the first beat strictly after `timestamp`
    pub fn next_beat_time(&self, timestamp: f64) -> Option<f64> {
        self.beat_position(timestamp)
            .map(|position| self.anchor + (position.beat + 1) as f64 * self.beat_interval)
    }

    pub fn get_stats(&self) -> RhythmStats {
        let total = self.total_hits;
        RhythmStats {
            total_hits: total,
            accurate_hits: self.accurate_hits,
            accuracy: self.accurate_hits as f64 / total.max(1) as f64,
            tempo: self.tempo,
            mean_deviation: if total == 0 {
                0.0
            } else {
                self.deviation_sum / total as f64
            },
        }
    }
}
