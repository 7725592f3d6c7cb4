// Stitch Engine: adaptive multi-track playback synchronization.
//
// A composed video is rendered from many independently hosted media segments
// that must play as one seamless, phase-locked stream. This crate is the
// runtime half of that job: it preloads upcoming segments into standby
// playback handles while the current one plays, keeps up to three concurrent
// tracks (principal video, voice audio, avatar overlay) within a drift
// tolerance of each other, bridges segment hand-offs with captured-frame
// compositing, maps arbitrary timeline seeks onto (segment, offset) pairs,
// and re-targets the whole pipeline to a different quality rendition without
// losing playback position.
//
// All engine logic is cooperative async on one logical event loop: commands
// arrive over a channel, timers drive the synchronizer tick, and in-flight
// loads are superseded through an epoch guard rather than queued.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod handle;
pub mod http;
pub mod net;
pub mod poll;
pub mod preload;
pub mod quality;
pub mod seek;
pub mod source;
pub mod state;
pub mod sync;
pub mod transition;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CachedMedia, MediaCache, canonical_url};
pub use config::{
    EngineConfig, PreloadConfig, ProbeConfig, QualityConfig, SeekConfig, SyncConfig,
    TransitionConfig,
};
pub use engine::{Collaborators, PlaybackEngine, StatusSnapshot};
pub use error::EngineError;
pub use events::EngineEvent;
pub use handle::{
    FrameBitmap, MediaHandle, ReadyState, TrackHandles, TrackPair, TrackRole, TransitionSurface,
};
pub use http::{build_client, install_rustls_provider};
pub use net::{BandwidthEstimate, BandwidthSource, ConnectionMetadata, SpeedEstimator};
pub use poll::{PollOutcome, PollPolicy, poll_until};
pub use quality::{
    AvailabilityTracker, QualityChoice, QualityController, QualityState, Tier,
};
pub use seek::{DragDebouncer, SeekKind};
pub use source::{DeliveryLookup, DurationProber, HttpDeliveryApi, QualityAvailability};
pub use state::{PlaybackState, SyncEvent};
pub use sync::{Synchronizer, TickOutcome};
pub use transition::{DeviceProfile, FrameCapturer};
