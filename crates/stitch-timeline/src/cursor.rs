// Playback cursor: the engine's single source of truth for where playback
// currently is on the composed timeline.

use crate::queue::MediaQueue;

/// Current playback position.
///
/// `global_time` is monotonic while playing and is only set directly by the
/// seek path; the synchronizer advances it every timing tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaybackCursor {
    pub current_index: usize,
    pub global_time: f64,
    pub segment_offset: f64,
}

impl PlaybackCursor {
    /// Cursor positioned at a global timeline position of the given queue.
    pub fn at_global(queue: &MediaQueue, global_time: f64) -> Self {
        let (current_index, segment_offset) = queue.locate(global_time);
        Self {
            current_index,
            global_time: queue.segment_start(current_index) + segment_offset,
            segment_offset,
        }
    }

    /// Cursor at the start of segment `index`.
    pub fn at_segment(queue: &MediaQueue, index: usize) -> Self {
        Self {
            current_index: index,
            global_time: queue.segment_start(index),
            segment_offset: 0.0,
        }
    }

    /// Update the intra-segment offset, keeping `global_time` consistent.
    pub fn set_offset(&mut self, queue: &MediaQueue, offset: f64) {
        self.segment_offset = offset;
        self.global_time = queue.segment_start(self.current_index) + offset;
    }

    /// Normalized position in `[0, 1]` over the whole composition.
    pub fn normalized(&self, queue: &MediaQueue) -> f64 {
        let total = queue.total_duration();
        if total > 0.0 {
            (self.global_time / total).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}
