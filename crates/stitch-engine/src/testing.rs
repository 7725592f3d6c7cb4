// Shared test doubles: scriptable media handles, surfaces, and boundary
// collaborators.

use crate::cache::canonical_url;
use std::sync::Once;
use crate::error::EngineError;
use crate::handle::{
    FrameBitmap, MediaHandle, ReadyState, TrackHandles, TrackPair, TransitionSurface,
};
use crate::quality::Tier;
use crate::source::{DeliveryLookup, DurationProber, QualityAvailability};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use stitch_timeline::{SegmentDescriptor, SegmentKind};
use url::Url;

/// Route test logs through tracing when `RUST_LOG` asks for them. Safe to
/// call from every test; the subscriber installs once per process.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// --- Media handle ---

#[derive(Debug, Clone)]
pub struct FakeHandleState {
    pub url: Option<Url>,
    pub time: f64,
    pub rate: f64,
    pub muted: bool,
    pub volume: f64,
    pub playing: bool,
    pub ready: ReadyState,
    pub buffered: f64,
    pub ended: bool,
    pub visible: bool,
    pub duration: Option<f64>,
    pub loads: Vec<(String, bool)>,
}

impl Default for FakeHandleState {
    fn default() -> Self {
        Self {
            url: None,
            time: 0.0,
            rate: 1.0,
            muted: false,
            volume: 1.0,
            playing: false,
            ready: ReadyState::Nothing,
            buffered: 10.0,
            ended: false,
            visible: true,
            duration: None,
            loads: Vec::new(),
        }
    }
}

/// Scriptable stand-in for a platform media element.
pub struct FakeMediaHandle {
    state: Mutex<FakeHandleState>,
    /// Ready state reported right after a successful load.
    ready_after_load: Mutex<ReadyState>,
    /// Canonical URL -> media duration reported after load.
    durations: Mutex<HashMap<String, f64>>,
    fail_loads: Mutex<bool>,
}

impl FakeMediaHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeHandleState::default()),
            ready_after_load: Mutex::new(ReadyState::EnoughData),
            durations: Mutex::new(HashMap::new()),
            fail_loads: Mutex::new(false),
        })
    }

    pub fn snapshot(&self) -> FakeHandleState {
        self.state.lock().clone()
    }

    pub fn load_count(&self) -> usize {
        self.state.lock().loads.len()
    }

    pub fn set_fail_loads(&self, fail: bool) {
        *self.fail_loads.lock() = fail;
    }

    pub fn set_ready_after_load(&self, ready: ReadyState) {
        *self.ready_after_load.lock() = ready;
    }

    pub fn script_duration(&self, url: &str, duration: f64) {
        let canonical = canonical_url(&Url::parse(url).unwrap());
        self.durations.lock().insert(canonical, duration);
    }

    pub fn set_ready(&self, ready: ReadyState) {
        self.state.lock().ready = ready;
    }

    pub fn set_buffered(&self, seconds: f64) {
        self.state.lock().buffered = seconds;
    }

    pub fn set_time(&self, seconds: f64) {
        self.state.lock().time = seconds;
    }

    pub fn set_ended(&self, ended: bool) {
        self.state.lock().ended = ended;
    }

    /// Simulate wall-clock playback of `dt` seconds.
    pub fn advance(&self, dt: f64) {
        let mut state = self.state.lock();
        if state.playing {
            state.time += dt * state.rate;
        }
    }
}

#[async_trait]
impl MediaHandle for FakeMediaHandle {
    async fn load(&self, url: &Url, warm: bool) -> Result<(), EngineError> {
        if *self.fail_loads.lock() {
            return Err(EngineError::load_failure(
                "fake",
                url.to_string(),
                "scripted failure",
            ));
        }
        let duration = self.durations.lock().get(&canonical_url(url)).copied();
        let mut state = self.state.lock();
        state.loads.push((url.to_string(), warm));
        state.url = Some(url.clone());
        state.time = 0.0;
        state.ended = false;
        state.ready = *self.ready_after_load.lock();
        state.duration = duration.or(Some(60.0));
        Ok(())
    }

    async fn play(&self) -> Result<(), EngineError> {
        self.state.lock().playing = true;
        Ok(())
    }

    fn pause(&self) {
        self.state.lock().playing = false;
    }

    fn current_time(&self) -> f64 {
        self.state.lock().time
    }

    fn set_current_time(&self, seconds: f64) {
        self.state.lock().time = seconds;
    }

    fn duration(&self) -> Option<f64> {
        self.state.lock().duration
    }

    fn set_rate(&self, rate: f64) {
        self.state.lock().rate = rate;
    }

    fn set_muted(&self, muted: bool) {
        self.state.lock().muted = muted;
    }

    fn set_volume(&self, volume: f64) {
        self.state.lock().volume = volume;
    }

    fn ready_state(&self) -> ReadyState {
        self.state.lock().ready
    }

    fn buffered_ahead(&self) -> f64 {
        self.state.lock().buffered
    }

    fn has_ended(&self) -> bool {
        self.state.lock().ended
    }

    fn set_visible(&self, visible: bool) {
        self.state.lock().visible = visible;
    }

    fn capture_frame(&self) -> Option<FrameBitmap> {
        Some(FrameBitmap {
            width: 4,
            height: 4,
            pixels: Bytes::from(vec![128u8; 4 * 4 * 4]),
        })
    }
}

// --- Transition surface ---

#[derive(Debug, Clone, Default)]
pub struct SurfaceLog {
    pub presented: u32,
    pub visible: bool,
    pub smoothing: bool,
    pub last_frame_size: Option<(u32, u32)>,
}

#[derive(Default)]
pub struct FakeSurface {
    log: Mutex<SurfaceLog>,
}

impl FakeSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl TransitionSurface for FakeSurface {
    fn present(&self, frame: &FrameBitmap) {
        let mut log = self.log.lock();
        log.presented += 1;
        log.last_frame_size = Some((frame.width, frame.height));
    }

    fn set_visible(&self, visible: bool) {
        self.log.lock().visible = visible;
    }

    fn set_smoothing(&self, enabled: bool) {
        self.log.lock().smoothing = enabled;
    }
}

pub fn surface_log(surface: &Arc<FakeSurface>) -> SurfaceLog {
    surface.log.lock().clone()
}

// --- Handle bundle ---

/// Keeps direct references to every fake while producing the `TrackHandles`
/// bundle the engine consumes.
pub struct FakeHandles {
    pub principal: [Arc<FakeMediaHandle>; 2],
    pub voice: [Arc<FakeMediaHandle>; 2],
    pub overlay: [Arc<FakeMediaHandle>; 2],
    pub overlay_audio: [Arc<FakeMediaHandle>; 2],
    pub principal_surface: Arc<FakeSurface>,
    pub overlay_surface: Arc<FakeSurface>,
}

impl FakeHandles {
    pub fn new() -> Self {
        Self {
            principal: [FakeMediaHandle::new(), FakeMediaHandle::new()],
            voice: [FakeMediaHandle::new(), FakeMediaHandle::new()],
            overlay: [FakeMediaHandle::new(), FakeMediaHandle::new()],
            overlay_audio: [FakeMediaHandle::new(), FakeMediaHandle::new()],
            principal_surface: FakeSurface::new(),
            overlay_surface: FakeSurface::new(),
        }
    }

    pub fn tracks(&self) -> TrackHandles {
        TrackHandles {
            principal: TrackPair::new(self.principal[0].clone(), self.principal[1].clone()),
            voice: TrackPair::new(self.voice[0].clone(), self.voice[1].clone()),
            overlay: TrackPair::new(self.overlay[0].clone(), self.overlay[1].clone()),
            overlay_audio: TrackPair::new(
                self.overlay_audio[0].clone(),
                self.overlay_audio[1].clone(),
            ),
            principal_surface: self.principal_surface.clone(),
            overlay_surface: self.overlay_surface.clone(),
        }
    }

    /// Simulate `dt` seconds of wall-clock playback on every handle.
    pub fn advance_all(&self, dt: f64) {
        for handle in self
            .principal
            .iter()
            .chain(self.voice.iter())
            .chain(self.overlay.iter())
            .chain(self.overlay_audio.iter())
        {
            handle.advance(dt);
        }
    }
}

// --- Boundary collaborators ---

pub struct ScriptedAvailability {
    tiers: Mutex<BTreeSet<Tier>>,
    fail: Mutex<bool>,
}

impl ScriptedAvailability {
    pub fn new(tiers: impl IntoIterator<Item = Tier>) -> Arc<Self> {
        Arc::new(Self {
            tiers: Mutex::new(tiers.into_iter().collect()),
            fail: Mutex::new(false),
        })
    }

    pub fn set_tiers(&self, tiers: impl IntoIterator<Item = Tier>) {
        *self.tiers.lock() = tiers.into_iter().collect();
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock() = fail;
    }
}

#[async_trait]
impl QualityAvailability for ScriptedAvailability {
    async fn available_tiers(&self, _output_id: &str) -> Result<BTreeSet<Tier>, EngineError> {
        if *self.fail.lock() {
            return Err(EngineError::internal("scripted availability failure"));
        }
        Ok(self.tiers.lock().clone())
    }
}

pub struct ScriptedDelivery {
    by_tier: Mutex<HashMap<Tier, Vec<SegmentDescriptor>>>,
    fail: Mutex<bool>,
}

impl ScriptedDelivery {
    /// Same composition at every tier, with tier-tagged query strings so the
    /// canonical media cache stays warm across switches.
    pub fn uniform(descriptors: Vec<SegmentDescriptor>) -> Arc<Self> {
        let mut by_tier = HashMap::new();
        for tier in Tier::descending() {
            let tagged = descriptors
                .iter()
                .cloned()
                .map(|mut d| {
                    d.principal_media_url =
                        format!("{}?tier={}", d.principal_media_url, tier.as_str());
                    d
                })
                .collect();
            by_tier.insert(tier, tagged);
        }
        Arc::new(Self {
            by_tier: Mutex::new(by_tier),
            fail: Mutex::new(false),
        })
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock() = fail;
    }
}

#[async_trait]
impl DeliveryLookup for ScriptedDelivery {
    async fn segment_descriptors(
        &self,
        _output_id: &str,
        tier: Tier,
    ) -> Result<Vec<SegmentDescriptor>, EngineError> {
        if *self.fail.lock() {
            return Err(EngineError::internal("scripted delivery failure"));
        }
        self.by_tier
            .lock()
            .get(&tier)
            .cloned()
            .ok_or_else(|| EngineError::internal("tier not scripted"))
    }
}

pub struct ScriptedProber {
    durations: Mutex<HashMap<String, f64>>,
}

impl ScriptedProber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            durations: Mutex::new(HashMap::new()),
        })
    }

    pub fn script(&self, url: &str, duration: f64) {
        let canonical = canonical_url(&Url::parse(url).unwrap());
        self.durations.lock().insert(canonical, duration);
    }
}

#[async_trait]
impl DurationProber for ScriptedProber {
    async fn probe_duration(&self, url: &Url) -> Result<f64, EngineError> {
        self.durations
            .lock()
            .get(&canonical_url(url))
            .copied()
            .ok_or_else(|| EngineError::internal("no scripted duration"))
    }
}

// --- Descriptor helpers ---

pub fn descriptor(url: &str, hint: Option<f64>) -> SegmentDescriptor {
    SegmentDescriptor {
        kind: SegmentKind::Content,
        principal_media_url: url.into(),
        voice_audio_url: None,
        overlay_video_url: None,
        overlay_audio_url: None,
        template_image_url: None,
        bullet_content: None,
        duration_hint: hint,
        native_duration: None,
        looping: false,
    }
}

pub fn descriptor_with_tracks(url: &str, hint: Option<f64>) -> SegmentDescriptor {
    let mut d = descriptor(url, hint);
    d.voice_audio_url = Some(format!("{url}.voice.aac"));
    d.overlay_video_url = Some(format!("{url}.avatar.mp4"));
    d.overlay_audio_url = Some(format!("{url}.avatar.aac"));
    d
}
