// Frame transition capture: bridges segment hand-offs with still frames so
// the viewer never sees a blank frame while the live tracks swap sources.

use crate::config::TransitionConfig;
use crate::handle::TrackHandles;
use tracing::{debug, trace};

/// Rendering capability class of the host device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    pub low_end: bool,
}

impl DeviceProfile {
    /// Detect from available parallelism; two cores or fewer counts as
    /// low-end and gets reduced surface resolution without smoothing.
    pub fn detect() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self { low_end: cores <= 2 }
    }
}

/// Captures hand-off frames onto the transition surfaces.
pub struct FrameCapturer {
    config: TransitionConfig,
    profile: DeviceProfile,
}

impl FrameCapturer {
    pub fn new(config: TransitionConfig) -> Self {
        let profile = match config.low_end_override {
            Some(low_end) => DeviceProfile { low_end },
            None => DeviceProfile::detect(),
        };
        debug!(low_end = profile.low_end, "transition capturer initialized");
        Self { config, profile }
    }

    pub fn profile(&self) -> DeviceProfile {
        self.profile
    }

    fn scale(&self) -> f64 {
        if self.profile.low_end {
            self.config.low_end_scale
        } else {
            1.0
        }
    }

    /// Snapshot the last visible frame of the active principal and overlay
    /// tracks onto their surfaces and bring the surfaces in front of the
    /// live tracks. Tracks with nothing to capture are left alone.
    pub fn capture_last(&self, tracks: &TrackHandles) {
        let smoothing = self.config.smoothing && !self.profile.low_end;
        let scale = self.scale();

        for (handle, surface) in [
            (tracks.principal.active(), &tracks.principal_surface),
            (tracks.overlay.active(), &tracks.overlay_surface),
        ] {
            if let Some(frame) = handle.capture_frame() {
                surface.set_smoothing(smoothing);
                surface.present(&frame.downscaled(scale));
                surface.set_visible(true);
                trace!(w = frame.width, h = frame.height, "captured outgoing frame");
            }
        }
    }

    /// Snapshot the first frame of the incoming segment from the standby
    /// handles, refreshing the surfaces so the hand-off lands on the new
    /// content rather than the old.
    pub fn capture_first(&self, tracks: &TrackHandles) {
        let scale = self.scale();
        for (handle, surface) in [
            (tracks.principal.standby(), &tracks.principal_surface),
            (tracks.overlay.standby(), &tracks.overlay_surface),
        ] {
            if let Some(frame) = handle.capture_frame() {
                surface.present(&frame.downscaled(scale));
                surface.set_visible(true);
                trace!(w = frame.width, h = frame.height, "captured incoming frame");
            }
        }
    }

    /// Hide both surfaces once the live tracks report decodable, time-synced
    /// frames again.
    pub fn reveal_live(&self, tracks: &TrackHandles) {
        tracks.principal_surface.set_visible(false);
        tracks.overlay_surface.set_visible(false);
    }
}
