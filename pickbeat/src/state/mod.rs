//! State and configuration
//!
//! - `stream_state` - capture pipeline state machine with lock-free reads
//! - `config` - serde configuration records
//! - `error` - state machine errors

pub mod config;
mod error;
mod stream_state;

pub use config::{CaptureConfig, ConfigError, ConfigResult, RhythmConfig, TrainerConfig};
pub use error::{StateError, StateResult};
pub use stream_state::{StreamState, StreamStateCell};
