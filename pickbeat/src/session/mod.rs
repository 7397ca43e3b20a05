//! Rhythm training session
//!
//! Wires a [`StreamController`] to a [`RhythmAnalyzer`]: every detected onset
//! is scored against the beat grid and published as a [`HitResult`].
//!
//! ```text
//! capture callback -> onset queue -> dispatcher -> RhythmTrainer -> HitResult subscribers
//! ```
//!
//! # Example
//!
//! ```no_run
//! use pickbeat::session::RhythmTrainer;
//! use pickbeat::state::TrainerConfig;
//!
//! # async fn run() -> Result<(), pickbeat::utils::AppError> {
//! let trainer = RhythmTrainer::from_config(TrainerConfig::default());
//! let mut hits = trainer.subscribe_hits();
//! trainer.start()?;
//!
//! while let Some(hit) = hits.recv().await {
//!     println!("beat {} off by {:.3}", hit.beat, hit.deviation);
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::{AudioBackend, AudioResult, CpalBackend, OnsetEvent, StreamController};
use crate::rhythm::{BeatPosition, HitVerdict, RhythmAnalyzer, RhythmStats};
use crate::state::{RhythmConfig, TrainerConfig};

/// Capacity of each hit subscriber channel
const HIT_CHANNEL_CAPACITY: usize = 64;

/// One scored onset
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HitResult {
    /// Onset time in seconds on the controller clock
    pub timestamp: f64,
    pub rms: f32,
    pub is_accurate: bool,
    /// Distance to the nearest beat, in the analyzer's deviation unit
    pub deviation: f64,
    /// Index of the nearest beat
    pub beat: i64,
}

impl HitResult {
    fn new(event: OnsetEvent, verdict: HitVerdict) -> Self {
        Self {
            timestamp: event.timestamp,
            rms: event.rms,
            is_accurate: verdict.is_accurate,
            deviation: verdict.deviation,
            beat: verdict.beat,
        }
    }
}

#[derive(Default)]
struct HitListeners {
    subscribers: Mutex<Vec<mpsc::Sender<HitResult>>>,
}

impl HitListeners {
    fn subscribe(&self) -> mpsc::Receiver<HitResult> {
        let (tx, rx) = mpsc::channel(HIT_CHANNEL_CAPACITY);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn publish(&self, hit: HitResult) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| match tx.try_send(hit) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Hit subscriber is lagging, result dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

/// Score one onset and publish the result; inactive analyzers ignore it
fn score_onset(analyzer: &Mutex<RhythmAnalyzer>, hits: &HitListeners, event: OnsetEvent) -> Option<HitResult> {
    let verdict = analyzer
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .evaluate(event.timestamp)?;
    let hit = HitResult::new(event, verdict);
    debug!(
        beat = hit.beat,
        deviation = hit.deviation,
        accurate = hit.is_accurate,
        "Hit scored"
    );
    hits.publish(hit);
    Some(hit)
}

/// Capture plus rhythm analysis as one session
pub struct RhythmTrainer<B: AudioBackend = CpalBackend> {
    controller: Arc<StreamController<B>>,
    analyzer: Arc<Mutex<RhythmAnalyzer>>,
    hits: Arc<HitListeners>,
}

impl RhythmTrainer<CpalBackend> {
    /// Trainer over the system audio host
    pub fn from_config(config: TrainerConfig) -> Self {
        let controller = Arc::new(StreamController::new(config.audio));
        Self::new(controller, config.rhythm)
    }
}

impl<B: AudioBackend> RhythmTrainer<B> {
    /// Attach an analyzer to `controller`
    ///
    /// The analyzer shares the controller's clock so onset timestamps and
    /// the beat grid agree.
    pub fn new(controller: Arc<StreamController<B>>, config: RhythmConfig) -> Self {
        let config = config.sanitized();
        let mut analyzer =
            RhythmAnalyzer::with_tolerance(controller.clock(), config.tolerance, config.deviation_mode);
        analyzer.set_tempo(config.tempo_bpm);

        let analyzer = Arc::new(Mutex::new(analyzer));
        let hits = Arc::new(HitListeners::default());

        // Weak so a dropped trainer leaves only an inert callback behind
        let weak_analyzer: Weak<Mutex<RhythmAnalyzer>> = Arc::downgrade(&analyzer);
        let weak_hits: Weak<HitListeners> = Arc::downgrade(&hits);
        controller.on_onset(move |timestamp, rms| {
            if let (Some(analyzer), Some(hits)) = (weak_analyzer.upgrade(), weak_hits.upgrade()) {
                score_onset(&analyzer, &hits, OnsetEvent::new(timestamp, rms));
            }
        });

        Self {
            controller,
            analyzer,
            hits,
        }
    }

    fn analyzer(&self) -> MutexGuard<'_, RhythmAnalyzer> {
        self.analyzer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start capturing, then anchor the beat grid at the current time
    pub fn start(&self) -> AudioResult<()> {
        self.controller.start()?;
        let mut analyzer = self.analyzer();
        analyzer.start();
        info!(tempo = analyzer.tempo(), "Rhythm training started");
        Ok(())
    }

    /// Freeze the analyzer and stop capturing
    pub fn stop(&self) -> AudioResult<()> {
        self.analyzer().stop();
        info!("Rhythm training stopped");
        self.controller.stop()
    }

    pub fn is_active(&self) -> bool {
        self.analyzer().is_active()
    }

    pub fn stats(&self) -> RhythmStats {
        self.analyzer().get_stats()
    }

    pub fn reset_stats(&self) {
        self.analyzer().reset_stats();
    }

    /// Change the tempo without moving the beat grid anchor
    pub fn set_tempo(&self, bpm: f64) -> f64 {
        let mut analyzer = self.analyzer();
        analyzer.set_tempo(bpm);
        analyzer.tempo()
    }

    pub fn tempo(&self) -> f64 {
        self.analyzer().tempo()
    }

    /// Current position on the beat grid, for beat indicators
    pub fn beat_position(&self) -> Option<BeatPosition> {
        let now = self.controller.clock().now();
        self.analyzer().beat_position(now)
    }

    /// Channel receiving every scored hit
    pub fn subscribe_hits(&self) -> mpsc::Receiver<HitResult> {
        self.hits.subscribe()
    }

    /// Run `f` with the analyzer locked
    pub fn with_analyzer<R>(&self, f: impl FnOnce(&mut RhythmAnalyzer) -> R) -> R {
        f(&mut self.analyzer())
    }

    pub fn controller(&self) -> &Arc<StreamController<B>> {
        &self.controller
    }
}
