/// Beat clock and hit accuracy
pub mod analyzer;

pub use analyzer::{
    clamp_tempo, BeatPosition, DeviationMode, HitVerdict, RhythmAnalyzer, RhythmStats,
    DEFAULT_TEMPO_BPM, DEFAULT_TOLERANCE, MAX_TEMPO_BPM, MIN_TEMPO_BPM,
};
