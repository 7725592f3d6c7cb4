// Playback synchronizer: keeps the principal video, voice audio, and avatar
// overlay phase-locked. Audio is the sync master because it is the least
// tolerant of audible glitches; drifting video tracks are re-seeked to the
// audio clock without pausing playback.

use crate::config::SyncConfig;
use crate::handle::{MediaHandle, ReadyState, TrackHandles, TrackRole};
use crate::poll::{PollPolicy, poll_until};
use crate::state::{PlaybackState, SyncEvent};
use std::sync::Arc;
use std::time::{Duration, Instant};
use stitch_timeline::{MediaQueue, PlaybackCursor, Segment};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What one timing tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not in an active state; nothing to do.
    Inactive,
    Continue,
    /// The current segment finished (media end, or synthetic end of script
    /// for looping previews).
    SegmentEnded { has_next: bool },
}

/// Side effects of a tick the orchestrator turns into events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub outcome: TickOutcome,
    /// Largest corrected divergence, when the tick re-seeked tracks.
    pub drift_corrected: Option<Duration>,
    pub entered_buffering: bool,
    pub exited_buffering: bool,
}

impl TickReport {
    fn inactive() -> Self {
        Self {
            outcome: TickOutcome::Inactive,
            drift_corrected: None,
            entered_buffering: false,
            exited_buffering: false,
        }
    }
}

pub struct Synchronizer {
    config: SyncConfig,
    state: PlaybackState,
    stall_since: Option<Instant>,
}

impl Synchronizer {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            state: PlaybackState::Idle,
            stall_since: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Single dispatch entry point; every transition flows through here.
    pub fn apply(&mut self, event: SyncEvent) -> Option<PlaybackState> {
        let next = self.state.dispatch(event)?;
        if next != PlaybackState::Buffering {
            self.stall_since = None;
        }
        debug!(from = %self.state, to = %next, ?event, "synchronizer transition");
        self.state = next;
        Some(next)
    }

    /// Time-align every required track of `segment` to `offset` (timeline
    /// domain) and apply the rate and mute policy.
    ///
    /// Video tracks run at the segment's playback rate, so their media time
    /// is the offset scaled by that rate; the voice track is generated at
    /// timeline speed and stays unscaled. Principal audio is muted whenever a
    /// separate voice track exists; the overlay is visual-only and always
    /// muted.
    pub fn align_tracks(
        &self,
        tracks: &TrackHandles,
        segment: &Segment,
        offset: f64,
        user_muted: bool,
    ) {
        let rate = segment.playback_rate;
        let principal = tracks.principal.active();
        principal.set_rate(rate);
        principal.set_current_time(offset * rate);
        principal.set_muted(segment.has_separate_voice() || user_muted);
        principal.set_visible(true);

        if segment.has_separate_voice() {
            let voice = tracks.voice.active();
            voice.set_current_time(offset);
            voice.set_muted(user_muted);
        }

        let overlay = tracks.overlay.active();
        overlay.set_visible(segment.has_overlay());
        if segment.has_overlay() {
            overlay.set_rate(rate);
            overlay.set_current_time(offset * rate);
            overlay.set_muted(true);
        }

        // Overlay audio shares the avatar media's time domain and stays
        // muted; the voice track is the audible one.
        if segment.has_overlay_audio() {
            let overlay_audio = tracks.overlay_audio.active();
            overlay_audio.set_rate(rate);
            overlay_audio.set_current_time(offset * rate);
            overlay_audio.set_muted(true);
        }
    }

    /// Active handles the segment actually requires.
    fn required<'t>(
        tracks: &'t TrackHandles,
        segment: &Segment,
    ) -> Vec<(TrackRole, &'t Arc<dyn MediaHandle>)> {
        let mut required = vec![(TrackRole::Principal, tracks.principal.active())];
        if segment.has_separate_voice() {
            required.push((TrackRole::Voice, tracks.voice.active()));
        }
        if segment.has_overlay() {
            required.push((TrackRole::Overlay, tracks.overlay.active()));
        }
        required
    }

    /// Whether every required track has enough data to advance.
    pub fn tracks_ready(tracks: &TrackHandles, segment: &Segment) -> bool {
        Self::required(tracks, segment)
            .iter()
            .all(|(_, h)| h.ready_state() >= ReadyState::FutureData)
    }

    /// Cooperatively wait for the required tracks, bounded by `policy`.
    /// Returns false on timeout; the caller proceeds best-effort.
    pub async fn wait_tracks_ready(
        tracks: &TrackHandles,
        segment: &Segment,
        policy: &PollPolicy,
        token: &CancellationToken,
    ) -> Result<bool, crate::error::EngineError> {
        let outcome = poll_until(policy, token, move |_| async move {
            Self::tracks_ready(tracks, segment).then_some(())
        })
        .await?;
        Ok(outcome.is_ready())
    }

    /// Start (or restart) every required track. Overlay and audio are
    /// resumed explicitly because they may have been paused independently
    /// during a stall.
    pub async fn resume_tracks(&self, tracks: &TrackHandles, segment: &Segment) {
        for (role, handle) in Self::required(tracks, segment) {
            if let Err(error) = handle.play().await {
                warn!(%role, %error, "track resume failed");
            }
        }
        // Muted companion of the avatar video; it runs alongside but never
        // gates readiness.
        if segment.has_overlay_audio()
            && let Err(error) = tracks.overlay_audio.active().play().await
        {
            warn!(%error, "overlay audio resume failed");
        }
    }

    pub fn pause_tracks(&self, tracks: &TrackHandles) {
        tracks.principal.active().pause();
        tracks.voice.active().pause();
        tracks.overlay.active().pause();
        tracks.overlay_audio.active().pause();
    }

    /// One periodic timing tick: advance the cursor from the sync master,
    /// detect stalls and recoveries, correct drift, and report segment end.
    pub fn tick(
        &mut self,
        tracks: &TrackHandles,
        queue: &MediaQueue,
        cursor: &mut PlaybackCursor,
        paused: bool,
    ) -> TickReport {
        if !matches!(self.state, PlaybackState::Playing | PlaybackState::Buffering) {
            return TickReport::inactive();
        }
        let Some(segment) = queue.get(cursor.current_index) else {
            return TickReport::inactive();
        };

        let mut report = TickReport {
            outcome: TickOutcome::Continue,
            ..TickReport::inactive()
        };

        let rate = segment.playback_rate.max(f64::EPSILON);
        let principal = tracks.principal.active();
        let principal_offset = principal.current_time() / rate;
        let voice_offset = segment
            .has_separate_voice()
            .then(|| tracks.voice.active().current_time());
        let master_offset = voice_offset.unwrap_or(principal_offset);

        if paused {
            return report;
        }

        // Segment end: real media end for regular segments, the synthetic
        // end of script for looping previews.
        let media_ended = principal.has_ended() && !segment.looping;
        if media_ended || master_offset >= segment.target_duration {
            cursor.set_offset(queue, segment.target_duration);
            let has_next = cursor.current_index + 1 < queue.len();
            self.apply(SyncEvent::SegmentEnded { has_next });
            report.outcome = TickOutcome::SegmentEnded { has_next };
            return report;
        }

        let remaining = segment.target_duration - master_offset;
        let stalled = Self::required(tracks, segment).iter().any(|(_, h)| {
            h.ready_state() < ReadyState::FutureData
                || (h.buffered_ahead() < self.config.min_buffered_ahead
                    && remaining > self.config.min_buffered_ahead)
        });

        match self.state {
            PlaybackState::Playing if stalled => {
                self.apply(SyncEvent::TrackStalled);
                self.stall_since = Some(Instant::now());
                report.entered_buffering = true;
                return report;
            }
            PlaybackState::Buffering => {
                let forced = self
                    .stall_since
                    .is_some_and(|at| at.elapsed() >= self.config.buffering_fallback);
                if stalled && !forced {
                    return report;
                }
                if forced {
                    warn!("buffering fallback expired, forcing best-effort resume");
                }
                self.apply(SyncEvent::TrackRecovered);
                report.exited_buffering = true;
            }
            _ => {}
        }

        // Drift correction: re-seek everything to the sync master without
        // pausing.
        let tolerance = self.config.drift_tolerance.as_secs_f64();
        let overlay_offset = segment
            .has_overlay()
            .then(|| tracks.overlay.active().current_time() / rate);
        let mut worst: f64 = 0.0;
        if voice_offset.is_some() {
            worst = worst.max((principal_offset - master_offset).abs());
        }
        if let Some(overlay_offset) = overlay_offset {
            worst = worst.max((overlay_offset - master_offset).abs());
        }
        if worst > tolerance {
            principal.set_current_time(master_offset * rate);
            if segment.has_overlay() {
                tracks.overlay.active().set_current_time(master_offset * rate);
            }
            report.drift_corrected = Some(Duration::from_secs_f64(worst));
            debug!(drift_ms = (worst * 1000.0) as u64, "corrected track drift");
        }

        // Monotonic while playing: jitter in the master clock never moves
        // the cursor backwards.
        let new_offset = master_offset.clamp(0.0, segment.target_duration);
        if new_offset > cursor.segment_offset {
            cursor.set_offset(queue, new_offset);
        }
        report
    }
}
