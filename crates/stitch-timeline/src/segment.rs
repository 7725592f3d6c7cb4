// Segment model: raw descriptors from the hosting application and the
// normalized form the rest of the engine works with.

use serde::{Deserialize, Serialize};

/// Presentation segments whose bullet content equals this sentinel are
/// placeholders inserted by the authoring side and are dropped at build time.
pub const SKIP_SENTINEL: &str = "[skip]";

/// Minimum duration assigned to a segment whose length is unknown at build
/// time. Non-zero so cumulative timing stays strictly ordered and playback
/// rate computation never divides by zero. Patched in place once the real
/// duration is discovered.
pub const DURATION_EPSILON: f64 = 0.1;

/// Kind of a composed-video segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    /// A regular talking-head or footage clip.
    Content,
    /// A generated slide presentation segment.
    Presentation,
    /// A lip-synced avatar segment.
    Lipsync,
}

/// Raw segment descriptor as supplied by the hosting application after it
/// resolves a generation job's status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentDescriptor {
    pub kind: SegmentKind,
    /// Main visual video of the segment.
    pub principal_media_url: String,
    /// Separately delivered voice-over track, when the principal video does
    /// not carry the segment's audio itself.
    #[serde(default)]
    pub voice_audio_url: Option<String>,
    /// Picture-in-picture avatar video composited on top of the principal.
    #[serde(default)]
    pub overlay_video_url: Option<String>,
    #[serde(default)]
    pub overlay_audio_url: Option<String>,
    /// Background template image for presentation segments.
    #[serde(default)]
    pub template_image_url: Option<String>,
    /// Slide text for presentation segments. `[skip]` marks a placeholder.
    #[serde(default)]
    pub bullet_content: Option<String>,
    /// Authoring-side duration the segment should occupy on the timeline.
    #[serde(default)]
    pub duration_hint: Option<f64>,
    /// Length of the underlying media file, when already known.
    #[serde(default)]
    pub native_duration: Option<f64>,
    /// Preview segments loop their media until the synthetic end of script.
    #[serde(default)]
    pub looping: bool,
}

impl SegmentDescriptor {
    /// Placeholder presentation segments are excluded from the timeline.
    pub fn is_skip_marker(&self) -> bool {
        self.kind == SegmentKind::Presentation
            && self.bullet_content.as_deref() == Some(SKIP_SENTINEL)
    }
}

/// Where a segment's target duration came from, in resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationSource {
    /// Explicit hint on the descriptor.
    Hint,
    /// Carried over from the previous queue on a cursor-preserving rebuild.
    Previous,
    /// Discovered native duration of the media file.
    Native,
    /// Unknown; `DURATION_EPSILON` placeholder awaiting an async probe.
    Fallback,
}

/// One normalized item of the composed video.
///
/// `target_duration` drives the authoritative timeline; `native_duration` is
/// the length of the underlying media file. The playback rate stretches or
/// compresses the media so it occupies exactly its timeline slot.
#[derive(Debug, Clone)]
pub struct Segment {
    pub kind: SegmentKind,
    pub principal_media_url: String,
    pub voice_audio_url: Option<String>,
    pub overlay_video_url: Option<String>,
    pub overlay_audio_url: Option<String>,
    pub template_image_url: Option<String>,
    pub bullet_content: Option<String>,
    pub looping: bool,
    pub target_duration: f64,
    pub native_duration: Option<f64>,
    pub playback_rate: f64,
    pub duration_source: DurationSource,
}

impl Segment {
    /// `native / target` when both are known and non-zero, else 1. Never
    /// zero, NaN, or infinite.
    pub fn compute_playback_rate(native: Option<f64>, target: f64) -> f64 {
        match native {
            Some(n) if n > 0.0 && target > 0.0 => {
                let rate = n / target;
                if rate.is_finite() && rate > 0.0 { rate } else { 1.0 }
            }
            _ => 1.0,
        }
    }

    /// Whether the segment's audio arrives on a separate voice track. When it
    /// does, the principal video's native audio must stay muted.
    pub fn has_separate_voice(&self) -> bool {
        self.voice_audio_url.is_some()
    }

    pub fn has_overlay(&self) -> bool {
        self.overlay_video_url.is_some()
    }

    pub fn has_overlay_audio(&self) -> bool {
        self.overlay_audio_url.is_some()
    }

    /// Re-derive the playback rate after a duration field changed.
    pub(crate) fn refresh_playback_rate(&mut self) {
        self.playback_rate = Self::compute_playback_rate(self.native_duration, self.target_duration);
    }
}
