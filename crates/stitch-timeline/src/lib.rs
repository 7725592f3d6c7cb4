// Stitch Timeline: data model for composed multi-segment playback.
//
// A composed video is an ordered list of independently hosted media segments
// (talking-head clips, voice-over tracks, avatar overlays, generated slides)
// that must play back as one seamless stream. This crate owns the pure,
// I/O-free part of that problem: normalizing raw segment descriptors into a
// media queue with per-segment durations and playback rates, maintaining
// cumulative timing for the whole composition, and resolving global timeline
// positions to (segment, offset) pairs for seeking.

pub mod builder;
pub mod cursor;
pub mod error;
pub mod queue;
pub mod segment;

pub use builder::{BuiltTimeline, TimelineBuilder};
pub use cursor::PlaybackCursor;
pub use error::TimelineError;
pub use queue::MediaQueue;
pub use segment::{
    DURATION_EPSILON, DurationSource, SKIP_SENTINEL, Segment, SegmentDescriptor, SegmentKind,
};
