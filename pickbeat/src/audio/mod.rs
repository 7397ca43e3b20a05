/// Hardware abstraction over the audio host
pub mod backend;

/// Lock-free queues between the real-time callbacks and the rest
pub mod buffer;

/// Input callback processing
pub mod capture;

/// Stream lifecycle and reconfiguration
pub mod controller;

/// Shared atomics read by the callbacks
pub mod controls;

/// Audio device enumeration
pub mod device;

/// Onset delivery off the real-time thread
pub mod dispatch;

/// Audio-related error types
pub mod error;

/// Monitoring passthrough
pub mod monitor;

/// RMS onset detection
pub mod onset;

// Re-export commonly used types
pub use backend::{AudioBackend, CpalBackend, StreamParams};
pub use controller::{StreamController, OPEN_TIMEOUT, SHUTDOWN_TIMEOUT};
pub use controls::{MonotonicClock, StreamDiagnostics};
pub use device::{DeviceDescriptor, DeviceId, DeviceRegistry};
pub use error::{AudioError, AudioResult};
pub use onset::{AudioBlock, OnsetDetector, OnsetEvent};
