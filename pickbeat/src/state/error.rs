use thiserror::Error;

use super::stream_state::StreamState;

/// State machine errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    /// Edge not part of the stream state machine
    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidTransition { from: StreamState, to: StreamState },
}

/// Result type for state operations
pub type StateResult<T> = Result<T, StateError>;
