//! Real-time pick/onset detection with monitoring and rhythm accuracy scoring
//!
//! - [`audio`] - devices, streams, onset detection and the monitoring path
//! - [`rhythm`] - beat grid and hit accuracy statistics
//! - [`session`] - capture and rhythm analysis as one training session
//! - [`state`] - stream state machine and configuration records
//! - [`utils`] - logging and application-level errors

/// Audio capture, onset detection and monitoring
pub mod audio;

/// Rhythm accuracy analysis
pub mod rhythm;

/// Training session facade
pub mod session;

/// State machine and configuration
pub mod state;

/// Utility modules
pub mod utils;

pub use audio::{AudioError, AudioResult, OnsetEvent, StreamController};
pub use rhythm::{RhythmAnalyzer, RhythmStats};
pub use session::{HitResult, RhythmTrainer};
pub use state::{StreamState, TrainerConfig};
pub use utils::{AppError, AppResult};
