//! Application-level error handling
//!
//! Aggregates the module errors into [`AppError`], with stable codes and a
//! serializable [`ErrorContext`] for whatever front end embeds the trainer.
//!
//! # Example
//!
//! ```
//! use pickbeat::audio::AudioError;
//! use pickbeat::utils::error::{AppError, ErrorCode};
//!
//! let err = AppError::from(AudioError::NotCapturing);
//! assert_eq!(err.code(), ErrorCode::AudioNotCapturing);
//! assert!(err.context().recoverable);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::error::AudioError;
use crate::state::config::ConfigError;
use crate::state::StateError;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Audio
    AudioDeviceUnavailable,
    AudioDeviceNotFound,
    AudioDeviceOpenFailed,
    AudioInvalidChannel,
    AudioNotCapturing,
    AudioShutdownTimeout,

    // Config
    ConfigInvalid,

    // State
    StateInvalidTransition,

    InternalError,
}

/// User-facing error details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub code: ErrorCode,
    /// Short message suitable for display
    pub message: String,
    /// Full error text for logs
    pub detail: Option<String>,
    pub recovery_hint: Option<String>,
    pub recoverable: bool,
}

impl ErrorContext {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
            recovery_hint: None,
            recoverable: true,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_recovery_hint(mut self, hint: impl Into<String>) -> Self {
        self.recovery_hint = Some(hint.into());
        self
    }

    pub fn not_recoverable(mut self) -> Self {
        self.recoverable = false;
        self
    }
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Audio(err) => match err {
                AudioError::DeviceUnavailable(_) => ErrorCode::AudioDeviceUnavailable,
                AudioError::DeviceNotFound(_) => ErrorCode::AudioDeviceNotFound,
                AudioError::DeviceOpen(_) => ErrorCode::AudioDeviceOpenFailed,
                AudioError::InvalidChannel { .. } => ErrorCode::AudioInvalidChannel,
                AudioError::NotCapturing => ErrorCode::AudioNotCapturing,
                AudioError::ShutdownTimeout(_) => ErrorCode::AudioShutdownTimeout,
            },
            AppError::Config(_) => ErrorCode::ConfigInvalid,
            AppError::State(_) => ErrorCode::StateInvalidTransition,
            AppError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Short message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            AppError::Audio(AudioError::DeviceUnavailable(_)) => {
                "The audio system could not be queried".to_string()
            }
            AppError::Audio(AudioError::DeviceNotFound(id)) => {
                format!("Audio device {id} is no longer available")
            }
            AppError::Audio(AudioError::DeviceOpen(_)) => {
                "The audio device could not be opened".to_string()
            }
            AppError::Audio(AudioError::InvalidChannel { channel, available }) => {
                format!("Channel {channel} does not exist, the device has {available}")
            }
            AppError::Audio(AudioError::NotCapturing) => {
                "Start capturing before enabling monitoring".to_string()
            }
            AppError::Audio(AudioError::ShutdownTimeout(_)) => {
                "The audio device did not stop in time".to_string()
            }
            AppError::Config(_) => "The configuration is invalid".to_string(),
            AppError::State(_) => "The operation is not allowed right now".to_string(),
            AppError::Internal(msg) => format!("Internal error: {msg}"),
        }
    }

    pub fn recovery_hint(&self) -> Option<String> {
        match self {
            AppError::Audio(AudioError::DeviceNotFound(_)) => {
                Some("Refresh the device list and select another device".to_string())
            }
            AppError::Audio(AudioError::DeviceOpen(_)) => Some(
                "Check that no other application holds the device exclusively, \
                 or try another sample rate or buffer size"
                    .to_string(),
            ),
            AppError::Audio(AudioError::InvalidChannel { .. }) => {
                Some("Pick a channel from the device's channel list".to_string())
            }
            AppError::Audio(AudioError::NotCapturing) => Some("Call start() first".to_string()),
            AppError::Audio(AudioError::ShutdownTimeout(_)) => {
                Some("Restart the application to release the device".to_string())
            }
            _ => None,
        }
    }

    pub fn context(&self) -> ErrorContext {
        let mut ctx = ErrorContext::new(self.code(), self.user_message()).with_detail(self.to_string());
        ctx.recovery_hint = self.recovery_hint();
        if !self.is_recoverable() {
            ctx = ctx.not_recoverable();
        }
        ctx
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Audio(err) => err.is_recoverable(),
            AppError::Config(_) | AppError::State(_) => true,
            AppError::Internal(_) => false,
        }
    }
}

/// Result type for application operations
pub type AppResult<T> = Result<T, AppError>;
