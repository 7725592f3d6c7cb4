// Dual-buffer preload: loads the next segment's media into the standby
// handles while the current one plays, tracks per-slot status so nothing is
// loaded twice, and guarantees via `ensure_ready` that a transition never
// proceeds into an unprepared segment silently.

use crate::cache::MediaCache;
use crate::config::PreloadConfig;
use crate::error::EngineError;
use crate::handle::{MediaHandle, ReadyState, TrackHandles, TrackRole};
use crate::poll::{PollPolicy, poll_until};
use std::sync::Arc;
use stitch_timeline::{MediaQueue, Segment};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// Lifecycle of one lookahead slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Idle,
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct PreloadSlot {
    pub segment_index: usize,
    pub status: SlotStatus,
}

/// Which handle of each pair a load targets. Preloads fill the standby side;
/// seeks and quality switches reload the active side in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Active,
    Standby,
}

/// How `ensure_ready` satisfied a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The preload finished inside the budget.
    Preloaded,
    /// The budget ran out and a forced emergency load filled the slot.
    EmergencyLoaded,
}

pub struct PreloadManager {
    config: PreloadConfig,
    cache: MediaCache,
    slots: Vec<PreloadSlot>,
}

impl PreloadManager {
    pub fn new(config: PreloadConfig) -> Self {
        let cache = MediaCache::new(config.cache_capacity);
        Self {
            config,
            cache,
            slots: Vec::new(),
        }
    }

    pub fn cache(&self) -> &MediaCache {
        &self.cache
    }

    pub fn status(&self, index: usize) -> SlotStatus {
        self.slots
            .iter()
            .find(|s| s.segment_index == index)
            .map(|s| s.status)
            .unwrap_or(SlotStatus::Idle)
    }

    fn set_status(&mut self, index: usize, status: SlotStatus) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.segment_index == index) {
            slot.status = status;
        } else {
            self.slots.push(PreloadSlot {
                segment_index: index,
                status,
            });
        }
    }

    /// Drop slot state for segments at or before `min_index` and anything
    /// beyond the lookahead window.
    pub fn prune(&mut self, current_index: usize) {
        let horizon = current_index + self.config.lookahead;
        self.slots
            .retain(|s| s.segment_index > current_index && s.segment_index <= horizon);
    }

    /// Forget everything. Used when a seek or quality switch invalidates the
    /// standby handles wholesale.
    pub fn reset(&mut self) {
        self.slots.clear();
    }

    /// Preload segment `index` into the standby handles. Returns the slot
    /// status afterwards; an already loading or ready slot is left alone.
    pub async fn preload(
        &mut self,
        queue: &MediaQueue,
        index: usize,
        tracks: &TrackHandles,
    ) -> SlotStatus {
        match self.status(index) {
            SlotStatus::Loading | SlotStatus::Ready => return self.status(index),
            SlotStatus::Idle | SlotStatus::Failed => {}
        }
        let Some(segment) = queue.get(index) else {
            return SlotStatus::Idle;
        };

        self.set_status(index, SlotStatus::Loading);
        let status = match self.load_segment(segment, tracks, Side::Standby).await {
            Ok(()) => SlotStatus::Ready,
            Err(error) => {
                warn!(index, %error, "preload failed");
                SlotStatus::Failed
            }
        };
        self.set_status(index, status);
        status
    }

    /// Block (cooperatively) until segment `index` is ready on the standby
    /// side, up to the configured budget, then force an emergency load.
    pub async fn ensure_ready(
        &mut self,
        queue: &MediaQueue,
        index: usize,
        tracks: &TrackHandles,
        token: &CancellationToken,
    ) -> Result<Readiness, EngineError> {
        let Some(segment) = queue.get(index) else {
            return Err(EngineError::internal(format!(
                "ensure_ready for out-of-range segment {index}"
            )));
        };

        if self.status(index) == SlotStatus::Idle {
            // Transition arrived before the background preload was kicked.
            self.preload(queue, index, tracks).await;
        }

        if self.status(index) == SlotStatus::Ready {
            let policy =
                PollPolicy::from_budget(self.config.ready_budget, self.config.poll_interval);
            let outcome = poll_until(&policy, token, move |_| async move {
                Self::standby_decodable(segment, tracks).then_some(())
            })
            .await?;
            if outcome.is_ready() {
                return Ok(Readiness::Preloaded);
            }
        }

        // Budget exhausted or the preload failed: reload synchronously and
        // proceed regardless of readiness so playback degrades instead of
        // hanging.
        warn!(index, "forcing emergency load before transition");
        self.set_status(index, SlotStatus::Loading);
        match self.load_segment(segment, tracks, Side::Standby).await {
            Ok(()) => self.set_status(index, SlotStatus::Ready),
            Err(error) => {
                self.set_status(index, SlotStatus::Failed);
                return Err(error);
            }
        }
        Ok(Readiness::EmergencyLoaded)
    }

    /// Whether every track required by `segment` has decodable data on the
    /// standby side.
    fn standby_decodable(segment: &Segment, tracks: &TrackHandles) -> bool {
        let mut ok = tracks.principal.standby().ready_state() >= ReadyState::CurrentData;
        if segment.has_separate_voice() {
            ok &= tracks.voice.standby().ready_state() >= ReadyState::CurrentData;
        }
        if segment.has_overlay() {
            ok &= tracks.overlay.standby().ready_state() >= ReadyState::CurrentData;
        }
        ok
    }

    /// Load every track of `segment` into one side of the pairs.
    ///
    /// The principal track is required; voice and overlay failures degrade to
    /// a missing track rather than failing the segment.
    pub async fn load_segment(
        &self,
        segment: &Segment,
        tracks: &TrackHandles,
        side: Side,
    ) -> Result<(), EngineError> {
        self.load_track(
            TrackRole::Principal,
            &segment.principal_media_url,
            tracks,
            side,
        )
        .await?;

        if let Some(url) = &segment.voice_audio_url
            && let Err(error) = self.load_track(TrackRole::Voice, url, tracks, side).await
        {
            warn!(%error, "voice track load failed, continuing without it");
        }
        if let Some(url) = &segment.overlay_video_url
            && let Err(error) = self.load_track(TrackRole::Overlay, url, tracks, side).await
        {
            warn!(%error, "overlay track load failed, continuing without it");
        }
        if let Some(url) = &segment.overlay_audio_url
            && let Err(error) = self
                .load_track(TrackRole::OverlayAudio, url, tracks, side)
                .await
        {
            warn!(%error, "overlay audio load failed, continuing without it");
        }
        Ok(())
    }

    async fn load_track(
        &self,
        role: TrackRole,
        raw_url: &str,
        tracks: &TrackHandles,
        side: Side,
    ) -> Result<(), EngineError> {
        let url = Url::parse(raw_url).map_err(|e| EngineError::InvalidUrl {
            input: raw_url.to_string(),
            reason: e.to_string(),
        })?;
        let pair = tracks.pair(role);
        let handle: &Arc<dyn MediaHandle> = match side {
            Side::Active => pair.active(),
            Side::Standby => pair.standby(),
        };

        let warm = self.cache.is_warm(&url);
        handle
            .load(&url, warm)
            .await
            .map_err(|e| EngineError::load_failure(role.as_str(), raw_url, e.to_string()))?;
        self.cache.record(&url, handle.duration());
        debug!(%role, url = raw_url, warm, ?side, "track loaded");
        Ok(())
    }
}
