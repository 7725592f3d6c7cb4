use crate::quality::Tier;
use crate::state::PlaybackState;
use std::time::Duration;

/// Events emitted by the engine to its presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged(PlaybackState),
    /// The synchronizer advanced into a different segment.
    SegmentChanged {
        index: usize,
    },
    QualityChanged {
        tier: Tier,
        auto: bool,
    },
    BufferingStarted,
    BufferingEnded,
    /// A periodic tick re-seeked drifting tracks to the audio master.
    DriftCorrected {
        drift: Duration,
    },
    /// An async probe discovered the real duration of a segment.
    DurationDiscovered {
        index: usize,
        duration: f64,
    },
    /// A recoverable fault was degraded instead of aborting the session.
    Degraded {
        reason: String,
    },
    PlaybackEnded,
}
