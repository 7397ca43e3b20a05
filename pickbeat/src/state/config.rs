//! Trainer configuration
//!
//! Plain serde records with defaults. Persisting them is left to the
//! embedding application; this module only (de)serializes and validates.
//!
//! # Example
//!
//! ```
//! use pickbeat::state::config::TrainerConfig;
//!
//! let config = TrainerConfig::from_json(r#"{ "audio": { "onset_threshold": 3.0 } }"#).unwrap();
//! assert_eq!(config.audio.onset_threshold, 1.0);
//! assert_eq!(config.audio.sample_rate, 44100);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::device::DeviceId;
use crate::audio::onset::{clamp_unit, DEFAULT_MIN_RETRIGGER_SECS, DEFAULT_THRESHOLD};
use crate::rhythm::{clamp_tempo, DeviationMode, DEFAULT_TEMPO_BPM, DEFAULT_TOLERANCE};

/// Smallest accepted block size in frames
pub const MIN_BUFFER_SIZE: u32 = 32;

/// Largest accepted block size in frames
pub const MAX_BUFFER_SIZE: u32 = 8192;

/// Block size requested in low-latency mode
pub const LOW_LATENCY_BUFFER_SIZE: u32 = 128;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A value that cannot be clamped into range
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub audio: CaptureConfig,
    pub rhythm: RhythmConfig,
}

impl TrainerConfig {
    /// Parse and sanitize a JSON document; missing fields take defaults
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.sanitized()
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn sanitized(self) -> ConfigResult<Self> {
        Ok(Self {
            audio: self.audio.sanitized()?,
            rhythm: self.rhythm.sanitized(),
        })
    }
}

/// Stream configuration, owned by the stream controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Input device (None means the host default)
    pub input_device: Option<DeviceId>,
    /// Output device for monitoring (None means the host default)
    pub output_device: Option<DeviceId>,
    /// Input channel analyzed on multi-channel devices
    pub input_channel: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Frames per callback
    pub buffer_size: u32,
    /// Prefer small device buffers over callback safety margin
    pub low_latency: bool,
    /// Pass the input through to the output device
    pub monitoring: bool,
    /// Monitoring gain (0.0 - 1.0)
    pub monitor_volume: f32,
    /// Onset RMS threshold (0.0 - 1.0)
    pub onset_threshold: f32,
    /// Minimum seconds between two onsets
    pub min_retrigger_secs: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            input_channel: 0,
            sample_rate: 44100,
            buffer_size: 1024,
            low_latency: false,
            monitoring: false,
            monitor_volume: 1.0,
            onset_threshold: DEFAULT_THRESHOLD,
            min_retrigger_secs: DEFAULT_MIN_RETRIGGER_SECS,
        }
    }
}

impl CaptureConfig {
    /// Clamp every field into its documented range
    ///
    /// # Errors
    /// `ConfigError::Invalid` for a zero sample rate.
    pub fn sanitized(self) -> ConfigResult<Self> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive".to_string()));
        }
        Ok(self.clamped())
    }

    /// Like [`sanitized`](Self::sanitized) but never fails; a zero sample
    /// rate falls back to the default
    pub fn clamped(self) -> Self {
        Self {
            sample_rate: if self.sample_rate == 0 {
                Self::default().sample_rate
            } else {
                self.sample_rate
            },
            buffer_size: clamp_buffer_size(self.buffer_size),
            monitor_volume: clamp_unit(self.monitor_volume),
            onset_threshold: clamp_unit(self.onset_threshold),
            min_retrigger_secs: if self.min_retrigger_secs.is_finite() {
                self.min_retrigger_secs.max(0.0)
            } else {
                DEFAULT_MIN_RETRIGGER_SECS
            },
            ..self
        }
    }

    /// Frames per callback actually requested from the device
    pub fn effective_buffer_size(&self) -> u32 {
        if self.low_latency {
            self.buffer_size.min(LOW_LATENCY_BUFFER_SIZE)
        } else {
            self.buffer_size
        }
    }

    /// Nominal block duration in seconds
    pub fn block_duration(&self) -> f64 {
        f64::from(self.effective_buffer_size()) / f64::from(self.sample_rate.max(1))
    }
}

/// Clamp a block size to [`MIN_BUFFER_SIZE`, `MAX_BUFFER_SIZE`]
pub fn clamp_buffer_size(frames: u32) -> u32 {
    frames.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE)
}

/// Rhythm analyzer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RhythmConfig {
    /// Target tempo in BPM (40 - 220)
    pub tempo_bpm: f64,
    /// Accepted deviation, in units of `deviation_mode`
    pub tolerance: f64,
    pub deviation_mode: DeviationMode,
}

impl Default for RhythmConfig {
    fn default() -> Self {
        Self {
            tempo_bpm: DEFAULT_TEMPO_BPM,
            tolerance: DEFAULT_TOLERANCE,
            deviation_mode: DeviationMode::Beats,
        }
    }
}

impl RhythmConfig {
    pub fn sanitized(self) -> Self {
        Self {
            tempo_bpm: clamp_tempo(self.tempo_bpm),
            tolerance: if self.tolerance.is_finite() {
                self.tolerance.max(0.0)
            } else {
                DEFAULT_TOLERANCE
            },
            ..self
        }
    }
}
