// Timeline builder: turns raw ordered segment descriptors into a normalized
// media queue, optionally translating the current playback position into the
// new queue so a reload (quality switch, descriptor refresh) does not restart
// playback.

use crate::cursor::PlaybackCursor;
use crate::error::TimelineError;
use crate::queue::MediaQueue;
use crate::segment::{DURATION_EPSILON, DurationSource, Segment, SegmentDescriptor};
use tracing::debug;

/// Result of a timeline build.
#[derive(Debug, Clone)]
pub struct BuiltTimeline {
    pub queue: MediaQueue,
    pub cursor: PlaybackCursor,
    /// Indices whose duration is still the epsilon placeholder. The engine
    /// probes these asynchronously and patches the queue in place.
    pub pending_probes: Vec<usize>,
}

/// Builds media queues from raw descriptors.
///
/// Duration resolution chain, per segment: explicit hint, then the duration
/// already discovered in the previous queue (cursor-preserving rebuilds),
/// then the descriptor's own native duration, then a non-zero epsilon so the
/// timeline never collapses. A segment whose media turns out to be
/// unreachable still occupies its minimal slot; the failure surfaces at load
/// time, not here.
#[derive(Debug, Default)]
pub struct TimelineBuilder;

impl TimelineBuilder {
    /// Build a queue from `descriptors`. When `previous` carries the old
    /// queue and cursor, the returned cursor keeps the current segment index
    /// and intra-segment offset translated against the new cumulative times.
    pub fn build(
        descriptors: &[SegmentDescriptor],
        previous: Option<(&MediaQueue, &PlaybackCursor)>,
    ) -> Result<BuiltTimeline, TimelineError> {
        let mut segments = Vec::with_capacity(descriptors.len());
        for (position, descriptor) in descriptors
            .iter()
            .filter(|d| !d.is_skip_marker())
            .enumerate()
        {
            segments.push(Self::normalize(descriptor, position, previous.map(|(q, _)| q)));
        }
        if segments.is_empty() {
            return Err(TimelineError::EmptyTimeline);
        }

        let queue = MediaQueue::new(segments);
        let cursor = match previous {
            Some((_, old)) => Self::translate_cursor(old, &queue),
            None => PlaybackCursor::default(),
        };
        let pending_probes = queue.unknown_duration_indices();

        debug!(
            segments = queue.len(),
            total = queue.total_duration(),
            pending_probes = pending_probes.len(),
            preserved = previous.is_some(),
            "built media queue"
        );
        Ok(BuiltTimeline {
            queue,
            cursor,
            pending_probes,
        })
    }

    fn normalize(
        descriptor: &SegmentDescriptor,
        position: usize,
        previous: Option<&MediaQueue>,
    ) -> Segment {
        // A rebuild swaps URLs but keeps order and count, so previously
        // discovered durations are matched positionally.
        let carried = previous
            .and_then(|q| q.get(position))
            .filter(|s| s.kind == descriptor.kind);

        let native_duration = descriptor
            .native_duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .or_else(|| carried.and_then(|s| s.native_duration));

        let hint = descriptor
            .duration_hint
            .filter(|d| d.is_finite() && *d > 0.0);

        let (target_duration, duration_source) = if let Some(h) = hint {
            (h, DurationSource::Hint)
        } else if let Some(prev) = carried.filter(|s| s.duration_source != DurationSource::Fallback)
        {
            (prev.target_duration, DurationSource::Previous)
        } else if let Some(n) = native_duration {
            (n, DurationSource::Native)
        } else {
            (DURATION_EPSILON, DurationSource::Fallback)
        };

        let playback_rate = Segment::compute_playback_rate(native_duration, target_duration);
        Segment {
            kind: descriptor.kind,
            principal_media_url: descriptor.principal_media_url.clone(),
            voice_audio_url: descriptor.voice_audio_url.clone(),
            overlay_video_url: descriptor.overlay_video_url.clone(),
            overlay_audio_url: descriptor.overlay_audio_url.clone(),
            template_image_url: descriptor.template_image_url.clone(),
            bullet_content: descriptor.bullet_content.clone(),
            looping: descriptor.looping,
            target_duration,
            native_duration,
            playback_rate,
            duration_source,
        }
    }

    /// Keep the old segment index and offset, re-anchored to the new queue's
    /// cumulative times and clamped to its bounds.
    fn translate_cursor(old: &PlaybackCursor, queue: &MediaQueue) -> PlaybackCursor {
        let index = old.current_index.min(queue.len().saturating_sub(1));
        let target = queue
            .get(index)
            .map(|s| s.target_duration)
            .unwrap_or_default();
        let offset = old.segment_offset.clamp(0.0, target);
        PlaybackCursor {
            current_index: index,
            global_time: queue.segment_start(index) + offset,
            segment_offset: offset,
        }
    }
}
