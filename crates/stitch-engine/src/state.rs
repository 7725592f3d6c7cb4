// Playback state machine: one dispatch entry point instead of transition
// logic scattered across media event handlers.

use std::fmt;
use tracing::trace;

/// Playback lifecycle of a session.
///
/// `Idle -> LoadingSegment -> Playing <-> Buffering -> (Ended | LoadingSegment)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No queue loaded yet, or torn down.
    Idle,
    /// Waiting for all required tracks of a segment to report ready and be
    /// time-aligned.
    LoadingSegment,
    Playing,
    /// A required track stalled; playback is held until it recovers or the
    /// bounded fallback fires.
    Buffering,
    /// The last segment finished and nothing follows.
    Ended,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::LoadingSegment => "loading",
            Self::Playing => "playing",
            Self::Buffering => "buffering",
            Self::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Everything that can move the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// Initial queue construction or a full reload.
    QueueLoaded,
    /// Every required track reported ready and was time-aligned.
    TracksReady,
    /// A required track ran out of decoded data.
    TrackStalled,
    /// The stalled track recovered (or the fallback timer forced a resume).
    TrackRecovered,
    /// The current segment's media ended, or a looping preview reached its
    /// synthetic end of script.
    SegmentEnded { has_next: bool },
    /// A seek or quality switch is rebuilding the pipeline.
    Reload,
    /// Session teardown.
    Teardown,
}

impl PlaybackState {
    /// Apply one event. Returns the new state, or `None` when the event is
    /// not meaningful in the current state (stale media callbacks are
    /// ignored, not errors).
    pub fn dispatch(self, event: SyncEvent) -> Option<PlaybackState> {
        use PlaybackState::*;
        use SyncEvent::*;

        let next = match (self, event) {
            (_, Teardown) => Idle,
            (Idle, QueueLoaded) => LoadingSegment,
            (Ended, QueueLoaded) => LoadingSegment,
            (_, Reload) => LoadingSegment,
            (LoadingSegment, TracksReady) => Playing,
            (Playing, TrackStalled) => Buffering,
            (Buffering, TrackRecovered) => Playing,
            (Playing | Buffering, SegmentEnded { has_next: true }) => LoadingSegment,
            (Playing | Buffering, SegmentEnded { has_next: false }) => Ended,
            _ => return None,
        };
        trace!(from = %self, to = %next, ?event, "playback state transition");
        Some(next)
    }

    pub fn is_playing(self) -> bool {
        self == PlaybackState::Playing
    }

    pub fn is_buffering(self) -> bool {
        matches!(self, PlaybackState::Buffering | PlaybackState::LoadingSegment)
    }

    pub fn is_ended(self) -> bool {
        self == PlaybackState::Ended
    }
}
