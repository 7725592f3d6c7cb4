// Media queue: ordered segments plus cumulative end-times for the whole
// composition. Owned by the orchestrator; other components get read access
// and index-scoped mutation only.

use crate::error::TimelineError;
use crate::segment::{DurationSource, Segment};
use tracing::debug;

/// The ordered, normalized sequence of segments plus cumulative timing.
///
/// Invariant: `cumulative_end` is non-decreasing and its final value equals
/// the total duration of the composition.
#[derive(Debug, Clone, Default)]
pub struct MediaQueue {
    segments: Vec<Segment>,
    cumulative_end: Vec<f64>,
}

impl MediaQueue {
    pub fn new(segments: Vec<Segment>) -> Self {
        let mut queue = Self {
            segments,
            cumulative_end: Vec::new(),
        };
        queue.recompute_from(0);
        queue
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn cumulative_ends(&self) -> &[f64] {
        &self.cumulative_end
    }

    /// Total duration of the composition in seconds.
    pub fn total_duration(&self) -> f64 {
        self.cumulative_end.last().copied().unwrap_or(0.0)
    }

    /// Timeline start of segment `index`.
    pub fn segment_start(&self, index: usize) -> f64 {
        if index == 0 {
            0.0
        } else {
            self.cumulative_end
                .get(index - 1)
                .copied()
                .unwrap_or_default()
        }
    }

    /// Resolve a global timeline position to `(segment index, intra-segment
    /// offset)` via binary search over the cumulative end-times.
    ///
    /// Positions outside `[0, total]` are clamped. The final instant resolves
    /// to the last segment at its end rather than one past it.
    pub fn locate(&self, global_time: f64) -> (usize, f64) {
        if self.segments.is_empty() {
            return (0, 0.0);
        }
        let total = self.total_duration();
        let t = global_time.clamp(0.0, total);

        let index = self
            .cumulative_end
            .partition_point(|&end| end <= t)
            .min(self.segments.len() - 1);

        let offset = (t - self.segment_start(index))
            .clamp(0.0, self.segments[index].target_duration);
        (index, offset)
    }

    /// Record a discovered native duration for one segment and repair the
    /// cumulative times from that point on.
    ///
    /// Segments whose target duration was an epsilon placeholder adopt the
    /// discovered value as their timeline length; segments with an explicit
    /// hint keep their slot and only re-derive the playback rate.
    pub fn set_discovered_duration(
        &mut self,
        index: usize,
        native: f64,
    ) -> Result<(), TimelineError> {
        if !(native.is_finite() && native > 0.0) {
            return Err(TimelineError::InvalidDuration {
                index,
                value: native,
            });
        }
        let len = self.segments.len();
        let segment = self
            .segments
            .get_mut(index)
            .ok_or(TimelineError::IndexOutOfRange { index, len })?;

        segment.native_duration = Some(native);
        if segment.duration_source == DurationSource::Fallback {
            segment.target_duration = native;
            segment.duration_source = DurationSource::Native;
        }
        segment.refresh_playback_rate();
        debug!(
            index,
            native,
            target = segment.target_duration,
            rate = segment.playback_rate,
            "applied discovered segment duration"
        );
        self.recompute_from(index);
        Ok(())
    }

    /// Indices still carrying the epsilon placeholder, i.e. candidates for an
    /// asynchronous duration probe.
    pub fn unknown_duration_indices(&self) -> Vec<usize> {
        self.segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.duration_source == DurationSource::Fallback)
            .map(|(i, _)| i)
            .collect()
    }

    fn recompute_from(&mut self, index: usize) {
        self.cumulative_end.truncate(index);
        let mut acc = if index == 0 {
            0.0
        } else {
            self.cumulative_end[index - 1]
        };
        for segment in &self.segments[index..] {
            acc += segment.target_duration;
            self.cumulative_end.push(acc);
        }
    }
}
