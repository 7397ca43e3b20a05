/// Logging utilities
pub mod logging;

/// Application-level error handling
pub mod error;

// Re-export commonly used types
pub use error::{AppError, AppResult, ErrorCode, ErrorContext};
