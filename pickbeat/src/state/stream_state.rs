use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::mpsc;

use super::error::{StateError, StateResult};

/// Lifecycle state of the capture pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum StreamState {
    /// No stream is open
    #[default]
    Stopped,

    /// Input stream open, onsets are detected
    Capturing,

    /// Input and output streams open, input is passed through
    Monitoring,
}

impl StreamState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Capturing, with or without monitoring
    pub fn is_capturing(&self) -> bool {
        !self.is_stopped()
    }

    pub fn is_monitoring(&self) -> bool {
        matches!(self, Self::Monitoring)
    }

    /// State name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Capturing => "Capturing",
            Self::Monitoring => "Capturing+Monitoring",
        }
    }
}

/// Stream state with validated transitions
///
/// Writes come from the controller under its control lock; reads are
/// lock-free and may happen from any thread.
pub struct StreamStateCell {
    state: ArcSwap<StreamState>,
    listeners: Mutex<Vec<mpsc::Sender<StreamState>>>,
}

impl StreamStateCell {
    /// # Examples
    ///
    /// ```
    /// use pickbeat::state::{StreamState, StreamStateCell};
    ///
    /// let cell = StreamStateCell::new();
    /// assert_eq!(cell.current(), StreamState::Stopped);
    /// assert!(cell.transition(StreamState::Capturing).is_ok());
    /// assert!(cell.transition(StreamState::Monitoring).is_ok());
    /// ```
    pub fn new() -> Self {
        Self {
            state: ArcSwap::new(Arc::new(StreamState::Stopped)),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn current(&self) -> StreamState {
        **self.state.load()
    }

    /// Move to `new_state`, notifying subscribers
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidTransition`] if the edge is not part of the state machine.
    pub fn transition(&self, new_state: StreamState) -> StateResult<()> {
        let current = self.current();
        if current == new_state {
            return Ok(());
        }
        if !Self::is_valid_transition(current, new_state) {
            return Err(StateError::InvalidTransition {
                from: current,
                to: new_state,
            });
        }
        self.state.store(Arc::new(new_state));
        tracing::debug!(from = current.name(), to = new_state.name(), "Stream state changed");
        self.notify_listeners(new_state);
        Ok(())
    }

    /// Receive every state change
    pub fn subscribe(&self) -> mpsc::Receiver<StreamState> {
        let (tx, rx) = mpsc::channel(16);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn notify_listeners(&self, new_state: StreamState) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|tx| !matches!(
            tx.try_send(new_state),
            Err(mpsc::error::TrySendError::Closed(_))
        ));
    }

    fn is_valid_transition(from: StreamState, to: StreamState) -> bool {
        use StreamState::*;

        matches!(
            (from, to),
            (Stopped, Capturing) | (Capturing, Monitoring) | (Monitoring, Capturing) | (_, Stopped)
        )
    }
}

impl Default for StreamStateCell {
    fn default() -> Self {
        Self::new()
    }
}
