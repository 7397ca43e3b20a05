//! Delivery of onset events off the real-time thread
//!
//! The capture callback only pushes into a bounded [`OnsetQueue`]. A worker
//! thread drains it and invokes registered callbacks and channel subscribers,
//! so slow consumers can never stall the audio callback.
//!
//! [`OnsetQueue`]: crate::audio::buffer::OnsetQueue

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::buffer::OnsetConsumer;
use crate::audio::onset::OnsetEvent;

/// How long the worker sleeps when the queue is empty
pub const DISPATCH_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Capacity of each subscriber channel
const SUBSCRIBER_CAPACITY: usize = 64;

/// Wait applied when a dispatcher is dropped without an explicit stop
const DROP_TIMEOUT: Duration = Duration::from_secs(1);

/// `on_onset(timestamp, rms)` callback
pub type OnsetCallback = Arc<dyn Fn(f64, f32) + Send + Sync>;

/// Registered consumers of onset events
///
/// Shared by every capture session of a controller, so registrations survive
/// stream restarts.
#[derive(Default)]
pub struct OnsetListeners {
    callbacks: Mutex<Vec<OnsetCallback>>,
    subscribers: Mutex<Vec<mpsc::Sender<OnsetEvent>>>,
    panics: AtomicU64,
}

impl OnsetListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked once per accepted onset
    pub fn add_callback<F>(&self, callback: F)
    where
        F: Fn(f64, f32) + Send + Sync + 'static,
    {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Channel receiving every accepted onset
    ///
    /// Events are dropped for a subscriber whose channel is full; closed
    /// receivers are removed on the next dispatch.
    pub fn subscribe(&self) -> mpsc::Receiver<OnsetEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    #[cfg(test)]
    fn callback_count(&self) -> usize {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Callback invocations that panicked
    pub fn panic_count(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }

    /// Deliver one event to every listener
    ///
    /// A panicking callback misses this event only; the remaining listeners
    /// still receive it.
    pub fn dispatch(&self, event: OnsetEvent) {
        let callbacks: Vec<OnsetCallback> = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        // Called without the lock held so callbacks may register listeners
        for callback in &callbacks {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                callback(event.timestamp, event.rms)
            }));
            if outcome.is_err() {
                self.panics.fetch_add(1, Ordering::Relaxed);
                warn!(timestamp = event.timestamp, "Onset listener panicked");
            }
        }

        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| match tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Onset subscriber is lagging, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

/// Worker thread draining one session's onset queue
pub struct OnsetDispatcher {
    running: Arc<AtomicBool>,
    worker: Option<Worker>,
}

struct Worker {
    handle: JoinHandle<()>,
    /// Disconnects when the worker returns
    done: Receiver<()>,
}

impl OnsetDispatcher {
    /// Spawn the worker
    pub fn spawn(consumer: OnsetConsumer, listeners: Arc<OnsetListeners>) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let (done_tx, done_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("pickbeat-onsets".to_string())
            .spawn(move || Self::run(consumer, listeners, flag, done_tx))?;

        debug!("Onset dispatcher started");
        Ok(Self {
            running,
            worker: Some(Worker {
                handle,
                done: done_rx,
            }),
        })
    }

    fn run(
        mut consumer: OnsetConsumer,
        listeners: Arc<OnsetListeners>,
        running: Arc<AtomicBool>,
        done: Sender<()>,
    ) {
        loop {
            // Read the flag before draining so events queued before stop are delivered
            let keep_running = running.load(Ordering::Acquire);
            while let Some(event) = consumer.pop() {
                listeners.dispatch(event);
            }
            if !keep_running {
                break;
            }
            thread::park_timeout(DISPATCH_POLL_INTERVAL);
        }
        debug!("Onset dispatcher finished");
        let _ = done.send(());
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Ask the worker to deliver what is queued and exit, without waiting
    pub fn signal_stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = &self.worker {
            worker.handle.thread().unpark();
        }
    }

    /// Stop the worker, waiting at most `timeout` for it to exit
    ///
    /// Returns `false` if a listener was still running when the wait ran
    /// out; the worker is then detached and exits on its own once the
    /// listener returns.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.signal_stop();
        let Some(worker) = self.worker.take() else {
            return true;
        };
        if worker.handle.thread().id() == thread::current().id() {
            // Stopped from inside one of its own listeners
            return true;
        }

        match worker.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    warn!("Onset dispatcher thread panicked");
                } else {
                    info!("Onset dispatcher stopped");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout = ?timeout, "Onset listener still running, dispatcher detached");
                false
            }
        }
    }
}

impl Drop for OnsetDispatcher {
    fn drop(&mut self) {
        self.stop(DROP_TIMEOUT);
    }
}
