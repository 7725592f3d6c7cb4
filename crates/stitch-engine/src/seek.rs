// Seek debouncing: scrubbing emits a burst of drag positions, and reloading
// tracks for every one would thrash the pipeline. The debounce delay adapts
// to how fast the user is dragging.

use crate::config::SeekConfig;
use std::time::{Duration, Instant};
use tracing::trace;

/// How a seek request reached the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekKind {
    /// Intermediate position while the user is still dragging; debounced.
    Drag,
    /// The user let go of the scrubber; applied immediately.
    Release,
    /// API-driven seek with no gesture attached; applied immediately.
    Programmatic,
}

impl SeekKind {
    pub fn is_debounced(self) -> bool {
        self == SeekKind::Drag
    }
}

/// Adapts the debounce delay to drag speed: slow deliberate drags get a
/// short delay so the preview tracks the thumb, rapid scrubbing gets the
/// long delay so only the settled position triggers a reload.
pub struct DragDebouncer {
    config: SeekConfig,
    last_drag: Option<Instant>,
}

impl DragDebouncer {
    pub fn new(config: SeekConfig) -> Self {
        Self {
            config,
            last_drag: None,
        }
    }

    /// Delay to wait after this drag event before applying it, assuming no
    /// further drag supersedes it.
    pub fn delay(&mut self, now: Instant) -> Duration {
        let interval = self
            .last_drag
            .map(|previous| now.saturating_duration_since(previous));
        self.last_drag = Some(now);

        let reference = self.config.drag_reference.as_secs_f64();
        let speed = match interval {
            // First drag of a gesture counts as slow.
            None => 0.0,
            Some(interval) => {
                let gap = interval.as_secs_f64().min(reference);
                // 0.0 at (or beyond) the reference interval, 1.0 for
                // back-to-back events.
                1.0 - gap / reference
            }
        };

        let min = self.config.debounce_min.as_secs_f64();
        let max = self.config.debounce_max.as_secs_f64();
        let delay = Duration::from_secs_f64(min + (max - min) * speed);
        trace!(speed, delay_ms = delay.as_millis() as u64, "drag debounce delay");
        delay
    }

    /// Forget the gesture; the next drag starts a new one.
    pub fn reset(&mut self) {
        self.last_drag = None;
    }
}
