// Media handle boundary: the per-track playback surfaces the presentation
// layer supplies on attach. The engine drives them; it never creates them.

use crate::error::EngineError;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// How much of the media a handle can currently present, in increasing
/// order. Mirrors the readiness ladder of platform media elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    /// Nothing fetched.
    Nothing,
    /// Duration and dimensions known.
    Metadata,
    /// The current frame is decodable.
    CurrentData,
    /// Enough data to advance at least a little.
    FutureData,
    /// Enough data to play through at the current rate.
    EnoughData,
}

/// Which of the concurrent streams a handle carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackRole {
    /// Main visual video of a segment.
    Principal,
    /// Separately delivered voice-over audio.
    Voice,
    /// Picture-in-picture avatar video.
    Overlay,
    /// Audio delivered alongside the avatar video. Kept muted; the voice
    /// track carries the segment's audible sound.
    OverlayAudio,
}

impl TrackRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Principal => "principal",
            Self::Voice => "voice",
            Self::Overlay => "overlay",
            Self::OverlayAudio => "overlay-audio",
        }
    }
}

impl fmt::Display for TrackRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A captured still frame used to bridge a segment hand-off.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBitmap {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA, row-major.
    pub pixels: Bytes,
}

impl FrameBitmap {
    /// Nearest-neighbor decimation by an integer step derived from `scale`.
    /// Used on low-end devices to keep transition surfaces inside the frame
    /// budget.
    pub fn downscaled(&self, scale: f64) -> FrameBitmap {
        let step = (1.0 / scale.clamp(0.1, 1.0)).round().max(1.0) as u32;
        if step <= 1 || self.width == 0 || self.height == 0 {
            return self.clone();
        }
        let out_w = self.width.div_ceil(step);
        let out_h = self.height.div_ceil(step);
        let mut pixels = Vec::with_capacity((out_w * out_h * 4) as usize);
        for y in (0..self.height).step_by(step as usize) {
            for x in (0..self.width).step_by(step as usize) {
                let src = ((y * self.width + x) * 4) as usize;
                pixels.extend_from_slice(&self.pixels[src..src + 4]);
            }
        }
        FrameBitmap {
            width: out_w,
            height: out_h,
            pixels: Bytes::from(pixels),
        }
    }
}

/// One playback surface for a single track, supplied by the presentation
/// layer (the analogue of a platform media element).
///
/// `load` resolves once the handle has accepted the source; readiness is
/// observed afterwards through `ready_state`/`buffered_ahead`, which is what
/// lets the preload manager poll cooperatively instead of blocking.
#[async_trait]
pub trait MediaHandle: Send + Sync {
    /// Point the handle at a new source. `warm` signals that the media is
    /// known to be resident (preload cache hit) and the implementation may
    /// skip its own fetch path.
    async fn load(&self, url: &Url, warm: bool) -> Result<(), EngineError>;

    async fn play(&self) -> Result<(), EngineError>;
    fn pause(&self);

    /// Current position in the media's own time domain (seconds).
    fn current_time(&self) -> f64;
    fn set_current_time(&self, seconds: f64);

    /// Media file length, once metadata is known.
    fn duration(&self) -> Option<f64>;

    fn set_rate(&self, rate: f64);
    fn set_muted(&self, muted: bool);
    fn set_volume(&self, volume: f64);

    fn ready_state(&self) -> ReadyState;
    /// Seconds of decoded media ahead of the play head.
    fn buffered_ahead(&self) -> f64;
    fn has_ended(&self) -> bool;

    fn set_visible(&self, visible: bool);
    /// Rasterize the currently presented frame, if any.
    fn capture_frame(&self) -> Option<FrameBitmap>;
}

/// A lightweight bitmap surface shown in front of the live tracks during a
/// hand-off so the viewer never perceives a blank frame.
pub trait TransitionSurface: Send + Sync {
    fn present(&self, frame: &FrameBitmap);
    fn set_visible(&self, visible: bool);
    /// Smoothing is disabled on low-end devices to protect the frame budget.
    fn set_smoothing(&self, enabled: bool);
}

/// Active/standby pair of handles for one track. The active handle plays the
/// current segment while the standby one preloads the next; a transition
/// swaps them.
pub struct TrackPair {
    handles: [Arc<dyn MediaHandle>; 2],
    active: usize,
}

impl TrackPair {
    pub fn new(a: Arc<dyn MediaHandle>, b: Arc<dyn MediaHandle>) -> Self {
        Self {
            handles: [a, b],
            active: 0,
        }
    }

    pub fn active(&self) -> &Arc<dyn MediaHandle> {
        &self.handles[self.active]
    }

    pub fn standby(&self) -> &Arc<dyn MediaHandle> {
        &self.handles[1 - self.active]
    }

    /// Promote the standby handle to active.
    pub fn swap(&mut self) {
        self.active = 1 - self.active;
    }
}

impl fmt::Debug for TrackPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackPair")
            .field("active", &self.active)
            .finish()
    }
}

/// Everything the presentation layer hands the engine on `attach`: a dual
/// buffer per track plus the two transition surfaces.
pub struct TrackHandles {
    pub principal: TrackPair,
    pub voice: TrackPair,
    pub overlay: TrackPair,
    pub overlay_audio: TrackPair,
    pub principal_surface: Arc<dyn TransitionSurface>,
    pub overlay_surface: Arc<dyn TransitionSurface>,
}

impl TrackHandles {
    pub fn pair(&self, role: TrackRole) -> &TrackPair {
        match role {
            TrackRole::Principal => &self.principal,
            TrackRole::Voice => &self.voice,
            TrackRole::Overlay => &self.overlay,
            TrackRole::OverlayAudio => &self.overlay_audio,
        }
    }

    pub fn pair_mut(&mut self, role: TrackRole) -> &mut TrackPair {
        match role {
            TrackRole::Principal => &mut self.principal,
            TrackRole::Voice => &mut self.voice,
            TrackRole::Overlay => &mut self.overlay,
            TrackRole::OverlayAudio => &mut self.overlay_audio,
        }
    }

    /// Swap every pair at once so a transition activates a consistent set.
    pub fn swap_all(&mut self) {
        self.principal.swap();
        self.voice.swap();
        self.overlay.swap();
        self.overlay_audio.swap();
    }
}

impl fmt::Debug for TrackHandles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackHandles")
            .field("principal", &self.principal)
            .field("voice", &self.voice)
            .field("overlay", &self.overlay)
            .field("overlay_audio", &self.overlay_audio)
            .finish()
    }
}
