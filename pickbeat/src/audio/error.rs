use std::time::Duration;

use thiserror::Error;

use crate::audio::device::DeviceId;

/// Audio-related errors
///
/// Driver errors are converted into these variants at the backend boundary,
/// callers never see raw cpal errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    /// The audio host could not be queried
    #[error("Audio subsystem unavailable: {0}")]
    DeviceUnavailable(String),

    /// No device matches the requested identity
    #[error("Audio device {0} not found")]
    DeviceNotFound(DeviceId),

    /// Failed to open or start a stream
    #[error("Failed to open audio device: {0}")]
    DeviceOpen(String),

    /// Requested input channel does not exist on the device
    #[error("Input channel {channel} is not available (device has {available} channels)")]
    InvalidChannel { channel: u16, available: u16 },

    /// Operation requires an active capture stream
    #[error("Audio capture is not running")]
    NotCapturing,

    /// The stream did not detach from the device in time
    #[error("Audio stream did not shut down within {0:?}")]
    ShutdownTimeout(Duration),
}

impl AudioError {
    /// Whether the caller can keep using the audio subsystem after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ShutdownTimeout(_))
    }
}

impl From<cpal::DevicesError> for AudioError {
    fn from(err: cpal::DevicesError) -> Self {
        Self::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        Self::DeviceOpen(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(err: cpal::PlayStreamError) -> Self {
        Self::DeviceOpen(err.to_string())
    }
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
