// Playback orchestrator: owns the session (queue, cursor, quality state) and
// drives every subsystem from one logical event loop. Commands arrive over a
// channel, a timer drives the synchronizer tick, and in-flight work is
// superseded through an epoch counter rather than queued behind stale loads.

use crate::cache::canonical_url;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::handle::TrackHandles;
use crate::net::{ConnectionMetadata, SpeedEstimator};
use crate::poll::PollPolicy;
use crate::preload::{PreloadManager, Side, SlotStatus};
use crate::quality::{AvailabilityTracker, QualityChoice, QualityController, QualityDecision, Tier};
use crate::seek::{DragDebouncer, SeekKind};
use crate::source::{DeliveryLookup, DurationProber, QualityAvailability};
use crate::state::{PlaybackState, SyncEvent};
use crate::sync::{Synchronizer, TickOutcome};
use crate::transition::FrameCapturer;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use stitch_timeline::{MediaQueue, PlaybackCursor, SegmentDescriptor, TimelineBuilder};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

/// Everything the engine needs from its host but does not own: the delivery
/// boundary, the rendition status channel, optional platform connection
/// metadata, an optional duration prober, and the shared HTTP client.
pub struct Collaborators {
    pub delivery: Arc<dyn DeliveryLookup>,
    pub availability: Arc<dyn QualityAvailability>,
    pub connection: Option<Arc<dyn ConnectionMetadata>>,
    pub prober: Option<Arc<dyn DurationProber>>,
    pub http: reqwest::Client,
}

/// Point-in-time view of a session, readable without touching the run loop.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub is_playing: bool,
    pub is_buffering: bool,
    pub is_ended: bool,
    /// Position on the composed timeline, seconds.
    pub current_time: f64,
    pub total_duration: f64,
    pub current_segment: usize,
    pub selected_quality: Option<Tier>,
    pub auto_quality: bool,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            is_playing: false,
            is_buffering: false,
            is_ended: false,
            current_time: 0.0,
            total_duration: 0.0,
            current_segment: 0,
            selected_quality: None,
            auto_quality: true,
        }
    }
}

enum EngineCommand {
    Attach(TrackHandles),
    Load {
        output_id: String,
        /// Pre-resolved composition; `None` resolves through the delivery
        /// boundary at the selected tier.
        descriptors: Option<Vec<SegmentDescriptor>>,
        choice: QualityChoice,
        ack: oneshot::Sender<Result<(), EngineError>>,
    },
    Play,
    Pause,
    Seek {
        /// Normalized timeline position, `0..=1`.
        position: f64,
        kind: SeekKind,
    },
    SetVolume(f64),
    SetMuted(bool),
    SetQuality {
        choice: QualityChoice,
        ack: oneshot::Sender<Result<(), EngineError>>,
    },
    /// Result of an async duration probe; discarded when the epoch moved on.
    DurationDiscovered {
        epoch: u64,
        index: usize,
        duration: f64,
    },
}

/// Handle to a running playback engine. Cheap to use from any task; all
/// methods enqueue onto the run loop.
pub struct PlaybackEngine {
    commands: mpsc::Sender<EngineCommand>,
    status: Arc<RwLock<StatusSnapshot>>,
    token: CancellationToken,
}

impl PlaybackEngine {
    /// Spawn the run loop and return the control handle plus the event
    /// stream the presentation layer subscribes to.
    pub fn spawn(
        config: EngineConfig,
        collaborators: Collaborators,
    ) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(64);
        let status = Arc::new(RwLock::new(StatusSnapshot::default()));
        let token = CancellationToken::new();

        let run = RunLoop::new(
            config,
            collaborators,
            command_rx,
            command_tx.clone(),
            event_tx,
            status.clone(),
            token.clone(),
        );
        tokio::spawn(run.run());

        let engine = Self {
            commands: command_tx,
            status,
            token,
        };
        (engine, event_rx)
    }

    async fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::Cancelled)
    }

    /// Hand the engine its playback surfaces. Must precede `load`.
    pub async fn attach(&self, tracks: TrackHandles) -> Result<(), EngineError> {
        self.send(EngineCommand::Attach(tracks)).await
    }

    /// Load a composition. Resolves once the first segment is on the active
    /// handles; playback stays paused until `play`.
    pub async fn load(
        &self,
        output_id: impl Into<String>,
        descriptors: Option<Vec<SegmentDescriptor>>,
        choice: QualityChoice,
    ) -> Result<(), EngineError> {
        let (ack, done) = oneshot::channel();
        self.send(EngineCommand::Load {
            output_id: output_id.into(),
            descriptors,
            choice,
            ack,
        })
        .await?;
        done.await.map_err(|_| EngineError::Cancelled)?
    }

    pub async fn play(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Play).await
    }

    pub async fn pause(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Pause).await
    }

    /// Seek to a normalized position on the composed timeline (`0..=1`,
    /// clamped). `Drag` seeks are debounced against each other; `Release`
    /// and `Programmatic` apply immediately.
    pub async fn seek(&self, position: f64, kind: SeekKind) -> Result<(), EngineError> {
        self.send(EngineCommand::Seek { position, kind }).await
    }

    pub async fn set_volume(&self, volume: f64) -> Result<(), EngineError> {
        self.send(EngineCommand::SetVolume(volume)).await
    }

    pub async fn set_muted(&self, muted: bool) -> Result<(), EngineError> {
        self.send(EngineCommand::SetMuted(muted)).await
    }

    /// Request a quality change. Resolves once the pipeline has been rebuilt
    /// (or the request decided to keep the current tier).
    pub async fn set_quality(&self, choice: QualityChoice) -> Result<(), EngineError> {
        let (ack, done) = oneshot::channel();
        self.send(EngineCommand::SetQuality { choice, ack }).await?;
        done.await.map_err(|_| EngineError::Cancelled)?
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.read().clone()
    }

    /// Tear the run loop down. In-flight probes and polls observe the
    /// cancellation token and stop.
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

/// One loaded composition.
struct Session {
    output_id: String,
    descriptors: Vec<SegmentDescriptor>,
    queue: MediaQueue,
    cursor: PlaybackCursor,
}

enum Wakeup {
    Shutdown,
    Command(Option<EngineCommand>),
    Tick,
    SeekDeadline,
}

struct RunLoop {
    config: EngineConfig,
    collaborators: Collaborators,
    commands: mpsc::Receiver<EngineCommand>,
    command_tx: mpsc::Sender<EngineCommand>,
    events: mpsc::Sender<EngineEvent>,
    status: Arc<RwLock<StatusSnapshot>>,
    token: CancellationToken,

    sync: Synchronizer,
    preload: PreloadManager,
    capturer: FrameCapturer,
    quality: QualityController,
    availability: AvailabilityTracker,
    estimator: SpeedEstimator,
    debouncer: DragDebouncer,

    tracks: Option<TrackHandles>,
    session: Option<Session>,
    /// User-level pause, independent of the playback state machine.
    paused: bool,
    muted: bool,
    volume: f64,
    /// Bumped by every load, seek rebuild, and quality switch; stale async
    /// results carrying an older epoch are discarded.
    epoch: u64,
    ticks_since_quality_eval: u32,
    pending_seek: Option<(f64, time::Instant)>,
}

impl RunLoop {
    fn new(
        config: EngineConfig,
        collaborators: Collaborators,
        commands: mpsc::Receiver<EngineCommand>,
        command_tx: mpsc::Sender<EngineCommand>,
        events: mpsc::Sender<EngineEvent>,
        status: Arc<RwLock<StatusSnapshot>>,
        token: CancellationToken,
    ) -> Self {
        let sync = Synchronizer::new(config.sync.clone());
        let preload = PreloadManager::new(config.preload.clone());
        let capturer = FrameCapturer::new(config.transition.clone());
        let quality = QualityController::new(config.quality.clone());
        let availability = AvailabilityTracker::new(
            collaborators.availability.clone(),
            config.quality.availability_refresh,
        );
        let estimator = SpeedEstimator::new(
            config.probe.clone(),
            collaborators.http.clone(),
            collaborators.connection.clone(),
        );
        let debouncer = DragDebouncer::new(config.seek.clone());
        Self {
            config,
            collaborators,
            commands,
            command_tx,
            events,
            status,
            token,
            sync,
            preload,
            capturer,
            quality,
            availability,
            estimator,
            debouncer,
            tracks: None,
            session: None,
            paused: true,
            muted: false,
            volume: 1.0,
            epoch: 0,
            ticks_since_quality_eval: 0,
            pending_seek: None,
        }
    }

    async fn run(mut self) {
        let mut tick = time::interval(self.config.sync.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("playback engine started");

        loop {
            let seek_deadline = self.pending_seek.map(|(_, at)| at);
            let wake = tokio::select! {
                _ = self.token.cancelled() => Wakeup::Shutdown,
                command = self.commands.recv() => Wakeup::Command(command),
                _ = tick.tick() => Wakeup::Tick,
                _ = async {
                    match seek_deadline {
                        Some(at) => time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                } => Wakeup::SeekDeadline,
            };
            match wake {
                Wakeup::Shutdown | Wakeup::Command(None) => break,
                Wakeup::Command(Some(command)) => self.handle_command(command).await,
                Wakeup::Tick => self.on_tick().await,
                Wakeup::SeekDeadline => self.flush_pending_seek().await,
            }
        }

        self.token.cancel();
        if let Some(tracks) = &self.tracks {
            self.sync.pause_tracks(tracks);
        }
        self.sync.apply(SyncEvent::Teardown);
        self.publish_status();
        info!("playback engine stopped");
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Attach(tracks) => {
                debug!("track handles attached");
                self.tracks = Some(tracks);
            }
            EngineCommand::Load {
                output_id,
                descriptors,
                choice,
                ack,
            } => {
                let result = self.do_load(output_id, descriptors, choice).await;
                let _ = ack.send(result);
            }
            EngineCommand::Play => {
                if self.sync.state().is_ended() {
                    // Replay restarts from the head of the composition.
                    if let Err(error) = self.do_seek(0.0).await {
                        warn!(%error, "replay seek failed");
                    }
                }
                self.paused = false;
                let segment = self
                    .session
                    .as_ref()
                    .and_then(|s| s.queue.get(s.cursor.current_index).cloned());
                if let (Some(tracks), Some(segment)) = (&self.tracks, segment)
                    && self.sync.state().is_playing()
                {
                    self.sync.resume_tracks(tracks, &segment).await;
                }
                self.publish_status();
            }
            EngineCommand::Pause => {
                self.paused = true;
                if let Some(tracks) = &self.tracks {
                    self.sync.pause_tracks(tracks);
                }
                self.publish_status();
            }
            EngineCommand::Seek { position, kind } => {
                if kind.is_debounced() {
                    let delay = self.debouncer.delay(Instant::now());
                    self.pending_seek = Some((position, time::Instant::now() + delay));
                } else {
                    self.debouncer.reset();
                    self.pending_seek = None;
                    if let Err(error) = self.do_seek(position).await {
                        warn!(%error, position, "seek failed");
                        self.emit(EngineEvent::Degraded {
                            reason: error.to_string(),
                        });
                    }
                }
                self.publish_status();
            }
            EngineCommand::SetVolume(volume) => {
                self.volume = volume;
                if let Some(tracks) = &self.tracks {
                    tracks.principal.active().set_volume(volume);
                    tracks.voice.active().set_volume(volume);
                }
            }
            EngineCommand::SetMuted(muted) => {
                self.muted = muted;
                let has_voice = self
                    .session
                    .as_ref()
                    .and_then(|s| s.queue.get(s.cursor.current_index))
                    .is_some_and(|segment| segment.has_separate_voice());
                if let Some(tracks) = &self.tracks {
                    tracks.principal.active().set_muted(has_voice || muted);
                    tracks.voice.active().set_muted(muted);
                }
            }
            EngineCommand::SetQuality { choice, ack } => {
                let result = self.do_set_quality(choice).await;
                let _ = ack.send(result);
            }
            EngineCommand::DurationDiscovered {
                epoch,
                index,
                duration,
            } => {
                if epoch != self.epoch {
                    trace!(index, "stale duration probe discarded");
                    return;
                }
                if let Some(session) = self.session.as_mut() {
                    match session.queue.set_discovered_duration(index, duration) {
                        Ok(()) => self.emit(EngineEvent::DurationDiscovered { index, duration }),
                        Err(error) => warn!(index, %error, "discarding discovered duration"),
                    }
                }
                self.publish_status();
            }
        }
    }

    async fn do_load(
        &mut self,
        output_id: String,
        descriptors: Option<Vec<SegmentDescriptor>>,
        choice: QualityChoice,
    ) -> Result<(), EngineError> {
        if self.tracks.is_none() {
            return Err(EngineError::Detached);
        }

        let available = self.availability.refresh(&output_id).await;
        let affordable = {
            let estimate = self.estimator.estimate().await;
            self.estimator.classify(estimate.bps)
        };
        let tier = match self.quality.request(choice, affordable, &available) {
            QualityDecision::Switch(tier) => tier,
            QualityDecision::Keep => self
                .quality
                .selected()
                .unwrap_or_else(|| QualityController::decide_auto(affordable, &available)),
        };

        let descriptors = match descriptors {
            Some(descriptors) => descriptors,
            None => {
                self.collaborators
                    .delivery
                    .segment_descriptors(&output_id, tier)
                    .await?
            }
        };
        let built = TimelineBuilder::build(&descriptors, None)?;

        self.epoch += 1;
        self.preload.reset();
        let event = if matches!(
            self.sync.state(),
            PlaybackState::Idle | PlaybackState::Ended
        ) {
            SyncEvent::QueueLoaded
        } else {
            SyncEvent::Reload
        };
        self.sync.apply(event);
        self.emit(EngineEvent::StateChanged(self.sync.state()));

        info!(
            output_id,
            %tier,
            segments = built.queue.len(),
            total = built.queue.total_duration(),
            "composition loaded"
        );
        let pending_probes = built.pending_probes;
        self.session = Some(Session {
            output_id,
            descriptors,
            queue: built.queue,
            cursor: built.cursor,
        });
        self.quality.mark_switched(tier);
        self.emit(EngineEvent::QualityChanged {
            tier,
            auto: self.quality.auto_mode(),
        });
        self.spawn_probes(pending_probes);

        self.enter_segment(0.0).await?;
        self.maintain_preload().await;
        self.publish_status();
        Ok(())
    }

    /// Load the current segment onto the active handles at `offset`, align,
    /// and wait (bounded) for readiness.
    async fn enter_segment(&mut self, offset: f64) -> Result<(), EngineError> {
        let segment = self
            .session
            .as_ref()
            .and_then(|s| s.queue.get(s.cursor.current_index).cloned())
            .ok_or(EngineError::NoPlayableSegment)?;
        let tracks = self.tracks.as_ref().ok_or(EngineError::Detached)?;

        self.preload
            .load_segment(&segment, tracks, Side::Active)
            .await?;
        self.sync.align_tracks(tracks, &segment, offset, self.muted);
        tracks.principal.active().set_volume(self.volume);
        tracks.voice.active().set_volume(self.volume);

        let policy = PollPolicy::from_budget(
            self.config.preload.ready_budget,
            self.config.preload.poll_interval,
        );
        let ready = Synchronizer::wait_tracks_ready(tracks, &segment, &policy, &self.token).await?;
        if !ready {
            warn!("tracks not ready inside budget, proceeding best-effort");
        }

        if self.sync.apply(SyncEvent::TracksReady).is_some() {
            self.emit(EngineEvent::StateChanged(self.sync.state()));
        }
        if !self.paused {
            self.sync.resume_tracks(tracks, &segment).await;
        }
        self.capturer.reveal_live(tracks);
        Ok(())
    }

    /// `progress` is a normalized timeline position in `0..=1`, mapped onto
    /// the composition's total duration before resolution.
    async fn do_seek(&mut self, progress: f64) -> Result<(), EngineError> {
        let (position, index, offset) = {
            let session = self
                .session
                .as_ref()
                .ok_or_else(|| EngineError::internal("seek with no composition loaded"))?;
            let position = progress.clamp(0.0, 1.0) * session.queue.total_duration();
            let (index, offset) = session.queue.locate(position);
            (position, index, offset)
        };

        let same_segment = self.session.as_ref().is_some_and(|s| {
            s.cursor.current_index == index
                && matches!(
                    self.sync.state(),
                    PlaybackState::Playing | PlaybackState::Buffering
                )
        });

        if same_segment {
            // The media is already on the active handles; realign in place.
            let segment = self
                .session
                .as_ref()
                .and_then(|s| s.queue.get(index).cloned())
                .ok_or(EngineError::NoPlayableSegment)?;
            if let Some(session) = self.session.as_mut() {
                session.cursor = PlaybackCursor::at_global(&session.queue, position);
            }
            if let Some(tracks) = &self.tracks {
                self.sync.align_tracks(tracks, &segment, offset, self.muted);
            }
            debug!(position, index, offset, "intra-segment seek");
            self.publish_status();
            return Ok(());
        }

        debug!(position, index, offset, "cross-segment seek");
        if let Some(tracks) = &self.tracks {
            self.capturer.capture_last(tracks);
        }
        self.epoch += 1;
        self.preload.reset();
        if self.sync.apply(SyncEvent::Reload).is_some() {
            self.emit(EngineEvent::StateChanged(self.sync.state()));
        }
        if let Some(session) = self.session.as_mut() {
            session.cursor = PlaybackCursor::at_global(&session.queue, position);
        }
        self.emit(EngineEvent::SegmentChanged { index });

        self.enter_segment(offset).await?;
        self.maintain_preload().await;
        self.publish_status();
        Ok(())
    }

    async fn flush_pending_seek(&mut self) {
        let Some((position, _)) = self.pending_seek.take() else {
            return;
        };
        self.debouncer.reset();
        if let Err(error) = self.do_seek(position).await {
            warn!(%error, position, "debounced seek failed");
            self.emit(EngineEvent::Degraded {
                reason: error.to_string(),
            });
        }
        self.publish_status();
    }

    async fn do_set_quality(&mut self, choice: QualityChoice) -> Result<(), EngineError> {
        let Some(output_id) = self.session.as_ref().map(|s| s.output_id.clone()) else {
            // No composition yet: record the preference for the next load.
            if let QualityDecision::Switch(tier) =
                self.quality.request(choice, None, &BTreeSet::new())
            {
                self.quality.mark_switched(tier);
                self.emit(EngineEvent::QualityChanged {
                    tier,
                    auto: self.quality.auto_mode(),
                });
            }
            self.publish_status();
            return Ok(());
        };

        let available = self.availability.ensure_fresh(&output_id).await;
        let affordable = {
            let estimate = self.estimator.estimate().await;
            self.estimator.classify(estimate.bps)
        };
        match self.quality.request(choice, affordable, &available) {
            QualityDecision::Keep => Ok(()),
            QualityDecision::Switch(tier) => self.switch_tier(tier).await,
        }
    }

    /// Rebuild the pipeline against another rendition, preserving the
    /// playback position. A failure restores the previous rendition.
    async fn switch_tier(&mut self, tier: Tier) -> Result<(), EngineError> {
        let previous = self.quality.selected();
        let (output_id, old_queue, old_cursor, old_descriptors) = {
            let session = self
                .session
                .as_ref()
                .ok_or_else(|| EngineError::internal("quality switch with no composition"))?;
            (
                session.output_id.clone(),
                session.queue.clone(),
                session.cursor,
                session.descriptors.clone(),
            )
        };

        match self
            .try_switch(&output_id, tier, &old_queue, &old_cursor)
            .await
        {
            Ok(()) => {
                self.quality.mark_switched(tier);
                info!(%tier, auto = self.quality.auto_mode(), "quality switched");
                self.emit(EngineEvent::QualityChanged {
                    tier,
                    auto: self.quality.auto_mode(),
                });
                self.publish_status();
                Ok(())
            }
            Err(error) => {
                warn!(%tier, %error, "quality switch failed, restoring previous rendition");
                if let Some(session) = self.session.as_mut() {
                    session.queue = old_queue;
                    session.cursor = old_cursor;
                    session.descriptors = old_descriptors;
                }
                self.quality.revert(previous);
                self.emit(EngineEvent::Degraded {
                    reason: error.to_string(),
                });
                if let Err(restore) = self.enter_segment(old_cursor.segment_offset).await {
                    warn!(%restore, "failed to restore previous rendition");
                }
                self.publish_status();
                Err(EngineError::QualitySwitchFailed {
                    tier: tier.as_str().into(),
                    reason: error.to_string(),
                })
            }
        }
    }

    async fn try_switch(
        &mut self,
        output_id: &str,
        tier: Tier,
        old_queue: &MediaQueue,
        old_cursor: &PlaybackCursor,
    ) -> Result<(), EngineError> {
        let descriptors = self
            .collaborators
            .delivery
            .segment_descriptors(output_id, tier)
            .await?;
        let built = TimelineBuilder::build(&descriptors, Some((old_queue, old_cursor)))?;

        self.epoch += 1;
        self.preload.reset();
        if self.sync.apply(SyncEvent::Reload).is_some() {
            self.emit(EngineEvent::StateChanged(self.sync.state()));
        }
        let offset = built.cursor.segment_offset;
        let pending_probes = built.pending_probes;
        if let Some(session) = self.session.as_mut() {
            session.queue = built.queue;
            session.cursor = built.cursor;
            session.descriptors = descriptors;
        }
        self.spawn_probes(pending_probes);

        self.enter_segment(offset).await?;
        self.maintain_preload().await;
        Ok(())
    }

    /// Kick asynchronous duration probes for segments still carrying the
    /// epsilon placeholder. Results come back as commands tagged with the
    /// current epoch.
    fn spawn_probes(&self, pending: Vec<usize>) {
        let Some(prober) = self.collaborators.prober.clone() else {
            return;
        };
        let Some(session) = &self.session else {
            return;
        };
        for index in pending {
            let Some(segment) = session.queue.get(index) else {
                continue;
            };
            let Ok(url) = Url::parse(&segment.principal_media_url) else {
                warn!(index, "unparseable media URL, skipping duration probe");
                continue;
            };
            let prober = prober.clone();
            let commands = self.command_tx.clone();
            let epoch = self.epoch;
            let token = self.token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    result = prober.probe_duration(&url) => match result {
                        Ok(duration) => {
                            let _ = commands
                                .send(EngineCommand::DurationDiscovered { epoch, index, duration })
                                .await;
                        }
                        Err(error) => warn!(index, url = %canonical_url(&url), %error, "duration probe failed"),
                    },
                }
            });
        }
    }

    async fn on_tick(&mut self) {
        let report = {
            let (Some(session), Some(tracks)) = (self.session.as_mut(), self.tracks.as_ref())
            else {
                return;
            };
            self.sync
                .tick(tracks, &session.queue, &mut session.cursor, self.paused)
        };

        if report.entered_buffering {
            self.emit(EngineEvent::BufferingStarted);
            self.emit(EngineEvent::StateChanged(self.sync.state()));
        }
        if report.exited_buffering {
            self.emit(EngineEvent::BufferingEnded);
            self.emit(EngineEvent::StateChanged(self.sync.state()));
            // A starved track may have stopped itself during the stall;
            // restart the required set now that the state is live again.
            if !self.paused {
                let segment = self
                    .session
                    .as_ref()
                    .and_then(|s| s.queue.get(s.cursor.current_index).cloned());
                if let (Some(tracks), Some(segment)) = (&self.tracks, segment) {
                    self.sync.resume_tracks(tracks, &segment).await;
                }
            }
        }
        if let Some(drift) = report.drift_corrected {
            self.emit(EngineEvent::DriftCorrected { drift });
        }

        match report.outcome {
            TickOutcome::Inactive => {}
            TickOutcome::Continue => {
                self.maintain_preload().await;
                self.maybe_reevaluate_quality().await;
            }
            TickOutcome::SegmentEnded { has_next: true } => {
                self.emit(EngineEvent::StateChanged(self.sync.state()));
                self.advance_segment().await;
            }
            TickOutcome::SegmentEnded { has_next: false } => {
                if let Some(tracks) = &self.tracks {
                    self.sync.pause_tracks(tracks);
                }
                self.emit(EngineEvent::StateChanged(self.sync.state()));
                self.emit(EngineEvent::PlaybackEnded);
            }
        }
        self.publish_status();
    }

    /// Gapless hand-off to the next segment: bridge with captured frames,
    /// promote the preloaded standby handles, and only then release the old
    /// side.
    async fn advance_segment(&mut self) {
        if let Some(tracks) = &self.tracks {
            self.capturer.capture_last(tracks);
        }
        let Some(len) = self.session.as_ref().map(|s| s.queue.len()) else {
            return;
        };
        let mut next = match self.session.as_ref() {
            Some(session) => session.cursor.current_index + 1,
            None => return,
        };

        loop {
            if next >= len {
                // Every remaining segment failed to load.
                self.sync.apply(SyncEvent::Teardown);
                self.emit(EngineEvent::PlaybackEnded);
                self.publish_status();
                return;
            }
            let result = {
                let (Some(session), Some(tracks)) = (&self.session, &self.tracks) else {
                    return;
                };
                self.preload
                    .ensure_ready(&session.queue, next, tracks, &self.token)
                    .await
            };
            match result {
                Ok(_) => break,
                Err(EngineError::Cancelled) => return,
                Err(error) => {
                    warn!(index = next, %error, "segment unplayable, skipping");
                    self.emit(EngineEvent::Degraded {
                        reason: error.to_string(),
                    });
                    next += 1;
                }
            }
        }

        let Some(segment) = self
            .session
            .as_ref()
            .and_then(|s| s.queue.get(next).cloned())
        else {
            return;
        };
        if let Some(tracks) = self.tracks.as_mut() {
            self.capturer.capture_first(tracks);
            tracks.swap_all();
        }
        if let Some(session) = self.session.as_mut() {
            session.cursor = PlaybackCursor::at_segment(&session.queue, next);
        }
        if let Some(tracks) = &self.tracks {
            self.sync.align_tracks(tracks, &segment, 0.0, self.muted);
            tracks.principal.active().set_volume(self.volume);
            tracks.voice.active().set_volume(self.volume);
            // The outgoing segment is on the standby side now; stop it.
            tracks.principal.standby().pause();
            tracks.voice.standby().pause();
            tracks.overlay.standby().pause();
            tracks.overlay_audio.standby().pause();
        }
        if self.sync.apply(SyncEvent::TracksReady).is_some() {
            self.emit(EngineEvent::StateChanged(self.sync.state()));
        }
        self.emit(EngineEvent::SegmentChanged { index: next });
        if !self.paused
            && let Some(tracks) = &self.tracks
        {
            self.sync.resume_tracks(tracks, &segment).await;
        }
        if let Some(tracks) = &self.tracks {
            self.capturer.reveal_live(tracks);
        }
        self.maintain_preload().await;
        self.publish_status();
    }

    /// Keep the standby handles filled with the next segment.
    async fn maintain_preload(&mut self) {
        let (current, len) = match self.session.as_ref() {
            Some(session) => (session.cursor.current_index, session.queue.len()),
            None => return,
        };
        self.preload.prune(current);
        let next = current + 1;
        if next < len && self.preload.status(next) == SlotStatus::Idle {
            let (Some(session), Some(tracks)) = (&self.session, &self.tracks) else {
                return;
            };
            self.preload.preload(&session.queue, next, tracks).await;
        }
    }

    async fn maybe_reevaluate_quality(&mut self) {
        if self.session.is_none() || !self.quality.auto_mode() {
            return;
        }
        self.ticks_since_quality_eval += 1;
        if self.ticks_since_quality_eval < self.config.quality.auto_eval_ticks {
            return;
        }
        self.ticks_since_quality_eval = 0;
        if let Err(error) = self.do_set_quality(QualityChoice::Auto).await {
            warn!(%error, "automatic quality re-evaluation failed");
        }
    }

    fn publish_status(&self) {
        let mut snapshot = StatusSnapshot {
            selected_quality: self.quality.selected(),
            auto_quality: self.quality.auto_mode(),
            ..StatusSnapshot::default()
        };
        if let Some(session) = &self.session {
            snapshot.current_time = session.cursor.global_time;
            snapshot.total_duration = session.queue.total_duration();
            snapshot.current_segment = session.cursor.current_index;
        }
        let state = self.sync.state();
        snapshot.is_playing = state.is_playing() && !self.paused;
        snapshot.is_buffering = state.is_buffering();
        snapshot.is_ended = state.is_ended();
        *self.status.write() = snapshot;
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.try_send(event).is_err() {
            trace!("event receiver full or gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PreloadConfig, SyncConfig};
    use crate::handle::{MediaHandle, ReadyState};
    use crate::http::build_client;
    use crate::testing::{
        FakeHandles, ScriptedAvailability, ScriptedDelivery, ScriptedProber, descriptor,
        descriptor_with_tracks, init_tracing,
    };
    use std::time::Duration;

    struct Harness {
        run: RunLoop,
        events: mpsc::Receiver<EngineEvent>,
        fakes: FakeHandles,
        delivery: Arc<ScriptedDelivery>,
        prober: Arc<ScriptedProber>,
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            sync: SyncConfig {
                tick_interval: Duration::from_millis(10),
                ..Default::default()
            },
            preload: PreloadConfig {
                poll_interval: Duration::from_millis(1),
                ready_budget: Duration::from_millis(20),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn harness(descriptors: Vec<SegmentDescriptor>) -> Harness {
        init_tracing();
        let delivery = ScriptedDelivery::uniform(descriptors);
        let availability = ScriptedAvailability::new(Tier::descending());
        let prober = ScriptedProber::new();
        let (command_tx, command_rx) = mpsc::channel(16);
        let (event_tx, events) = mpsc::channel(64);
        let collaborators = Collaborators {
            delivery: delivery.clone(),
            availability: availability.clone(),
            connection: None,
            prober: Some(prober.clone()),
            http: build_client().unwrap(),
        };
        let run = RunLoop::new(
            fast_config(),
            collaborators,
            command_rx,
            command_tx,
            event_tx,
            Arc::new(RwLock::new(StatusSnapshot::default())),
            CancellationToken::new(),
        );
        Harness {
            run,
            events,
            fakes: FakeHandles::new(),
            delivery,
            prober,
        }
    }

    async fn loaded_harness(descriptors: Vec<SegmentDescriptor>, choice: QualityChoice) -> Harness {
        let mut h = harness(descriptors);
        h.run
            .handle_command(EngineCommand::Attach(h.fakes.tracks()))
            .await;
        h.run
            .do_load("output-1".into(), None, choice)
            .await
            .unwrap();
        h
    }

    fn drain(events: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn cursor(h: &Harness) -> PlaybackCursor {
        h.run.session.as_ref().unwrap().cursor
    }

    #[tokio::test]
    async fn load_requires_attached_tracks() {
        let mut h = harness(vec![descriptor("https://cdn.example/a.mp4", Some(5.0))]);
        let err = h
            .run
            .do_load("output-1".into(), None, QualityChoice::Auto)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Detached));
    }

    #[tokio::test]
    async fn load_prepares_first_segment_without_autoplay() {
        let h = loaded_harness(
            vec![
                descriptor("https://cdn.example/a.mp4", Some(5.0)),
                descriptor("https://cdn.example/b.mp4", Some(3.0)),
            ],
            QualityChoice::Auto,
        )
        .await;

        // Active principal got the first segment; playback waits for play().
        assert_eq!(h.fakes.principal[0].load_count(), 1);
        assert!(!h.fakes.principal[0].snapshot().playing);
        assert!(h.run.sync.state().is_playing());
        assert!(h.run.paused);
        let session = h.run.session.as_ref().unwrap();
        assert!((session.queue.total_duration() - 8.0).abs() < 1e-9);
        // No bandwidth signal: auto defaults to the highest available tier.
        assert_eq!(h.run.quality.selected(), Some(Tier::Q1080));
        // The next segment was preloaded onto the standby side.
        assert_eq!(h.fakes.principal[1].load_count(), 1);
    }

    #[tokio::test]
    async fn play_starts_the_aligned_tracks() {
        let mut h = loaded_harness(
            vec![descriptor_with_tracks("https://cdn.example/a.mp4", Some(5.0))],
            QualityChoice::Auto,
        )
        .await;
        h.run.handle_command(EngineCommand::Play).await;

        assert!(h.fakes.principal[0].snapshot().playing);
        assert!(h.fakes.voice[0].snapshot().playing);
        assert!(h.fakes.overlay_audio[0].snapshot().playing);
        assert!(!h.run.paused);
    }

    #[tokio::test]
    async fn seek_maps_normalized_positions_onto_the_timeline() {
        let mut h = loaded_harness(
            vec![
                descriptor("https://cdn.example/a.mp4", Some(5.0)),
                descriptor("https://cdn.example/b.mp4", Some(3.0)),
            ],
            QualityChoice::Auto,
        )
        .await;
        let total = h.run.session.as_ref().unwrap().queue.total_duration();

        for p in [0.0, 0.5, 0.999] {
            h.run.do_seek(p).await.unwrap();
            let expected = p * total;
            let cursor = cursor(&h);
            assert!(
                (cursor.global_time - expected).abs() < 1e-9,
                "p = {p}: cursor at {}, wanted {expected}",
                cursor.global_time
            );
        }
        // 0.999 of an 8s composition lands in the second segment, not at
        // 0.999s into the first.
        assert_eq!(cursor(&h).current_index, 1);
        assert!((cursor(&h).segment_offset - 2.992).abs() < 1e-9);

        // Out-of-range input clamps to the ends of the timeline.
        h.run.do_seek(1.5).await.unwrap();
        assert!((cursor(&h).global_time - total).abs() < 1e-9);
        h.run.do_seek(-0.5).await.unwrap();
        assert_eq!(cursor(&h).global_time, 0.0);
    }

    #[tokio::test]
    async fn intra_segment_seek_realigns_without_reloading() {
        let mut h = loaded_harness(
            vec![
                descriptor("https://cdn.example/a.mp4", Some(5.0)),
                descriptor("https://cdn.example/b.mp4", Some(3.0)),
            ],
            QualityChoice::Auto,
        )
        .await;
        let loads_before = h.fakes.principal[0].load_count();

        // 0.25 of the 8s composition is 2s into the first segment.
        h.run.do_seek(0.25).await.unwrap();

        assert_eq!(h.fakes.principal[0].load_count(), loads_before);
        assert!((h.fakes.principal[0].snapshot().time - 2.0).abs() < 1e-9);
        assert_eq!(cursor(&h).current_index, 0);
        assert!((cursor(&h).segment_offset - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cross_segment_seek_reloads_and_bridges_with_frames() {
        let mut h = loaded_harness(
            vec![
                descriptor("https://cdn.example/a.mp4", Some(5.0)),
                descriptor("https://cdn.example/b.mp4", Some(3.0)),
            ],
            QualityChoice::Auto,
        )
        .await;

        // 0.75 of the 8s composition is 1s into the second segment.
        h.run.do_seek(0.75).await.unwrap();

        let cursor = cursor(&h);
        assert_eq!(cursor.current_index, 1);
        assert!((cursor.segment_offset - 1.0).abs() < 1e-9);
        // Active side reloaded with the target segment.
        assert_eq!(h.fakes.principal[0].load_count(), 2);
        assert!(
            h.fakes.principal[0]
                .snapshot()
                .url
                .unwrap()
                .as_str()
                .contains("b.mp4")
        );
        // The hand-off was bridged with a captured frame, then revealed.
        let log = crate::testing::surface_log(&h.fakes.principal_surface);
        assert!(log.presented >= 1);
        assert!(!log.visible);
    }

    #[tokio::test]
    async fn drag_seeks_are_debounced_until_the_deadline() {
        let mut h = loaded_harness(
            vec![
                descriptor("https://cdn.example/a.mp4", Some(5.0)),
                descriptor("https://cdn.example/b.mp4", Some(3.0)),
            ],
            QualityChoice::Auto,
        )
        .await;

        h.run
            .handle_command(EngineCommand::Seek {
                position: 0.75,
                kind: SeekKind::Drag,
            })
            .await;
        // Not applied yet; the cursor still points at the first segment.
        assert!(h.run.pending_seek.is_some());
        assert_eq!(cursor(&h).current_index, 0);

        h.run.flush_pending_seek().await;
        assert!(h.run.pending_seek.is_none());
        assert_eq!(cursor(&h).current_index, 1);
    }

    #[tokio::test]
    async fn segment_end_swaps_to_the_preloaded_standby() {
        let mut h = loaded_harness(
            vec![
                descriptor("https://cdn.example/a.mp4", Some(5.0)),
                descriptor("https://cdn.example/b.mp4", Some(3.0)),
            ],
            QualityChoice::Auto,
        )
        .await;
        h.run.handle_command(EngineCommand::Play).await;

        h.fakes.principal[0].set_time(5.0);
        h.run.on_tick().await;

        let cursor = cursor(&h);
        assert_eq!(cursor.current_index, 1);
        assert!((cursor.global_time - 5.0).abs() < 1e-9);
        // The standby pair was promoted and started; the old side stopped.
        assert!(h.fakes.principal[1].snapshot().playing);
        assert!(!h.fakes.principal[0].snapshot().playing);
        let events = drain(&mut h.events);
        assert!(events.contains(&EngineEvent::SegmentChanged { index: 1 }));
    }

    #[tokio::test]
    async fn final_segment_end_finishes_playback() {
        let mut h = loaded_harness(
            vec![descriptor("https://cdn.example/a.mp4", Some(5.0))],
            QualityChoice::Auto,
        )
        .await;
        h.run.handle_command(EngineCommand::Play).await;

        h.fakes.principal[0].set_time(5.0);
        h.run.on_tick().await;

        assert!(h.run.sync.state().is_ended());
        let snapshot = h.run.status.read().clone();
        assert!(snapshot.is_ended);
        assert!(!snapshot.is_playing);
        let events = drain(&mut h.events);
        assert!(events.contains(&EngineEvent::PlaybackEnded));
    }

    #[tokio::test]
    async fn buffering_recovery_restarts_stalled_tracks() {
        let mut h = loaded_harness(
            vec![descriptor_with_tracks("https://cdn.example/a.mp4", Some(5.0))],
            QualityChoice::Auto,
        )
        .await;
        h.run.handle_command(EngineCommand::Play).await;
        assert!(h.fakes.voice[0].snapshot().playing);

        h.fakes.voice[0].set_ready(ReadyState::CurrentData);
        h.run.on_tick().await;
        assert_eq!(h.run.sync.state(), PlaybackState::Buffering);
        // The starved element stops itself while it waits for data.
        h.fakes.voice[0].pause();

        h.fakes.voice[0].set_ready(ReadyState::EnoughData);
        h.run.on_tick().await;

        assert!(h.run.sync.state().is_playing());
        assert!(
            h.fakes.voice[0].snapshot().playing,
            "recovered track should be playing again"
        );
        assert!(h.fakes.principal[0].snapshot().playing);
        let events = drain(&mut h.events);
        assert!(events.contains(&EngineEvent::BufferingEnded));
    }

    #[tokio::test]
    async fn quality_switch_preserves_segment_and_offset() {
        let mut h = loaded_harness(
            vec![
                descriptor("https://cdn.example/a.mp4", Some(5.0)),
                descriptor("https://cdn.example/b.mp4", Some(3.0)),
            ],
            QualityChoice::Tier(Tier::Q1080),
        )
        .await;
        h.run.do_seek(0.75).await.unwrap();

        h.run
            .do_set_quality(QualityChoice::Tier(Tier::Q480))
            .await
            .unwrap();

        let cursor = cursor(&h);
        assert_eq!(cursor.current_index, 1);
        assert!((cursor.segment_offset - 1.0).abs() < 1e-9);
        assert_eq!(h.run.quality.selected(), Some(Tier::Q480));

        let snapshot = h.fakes.principal[0].snapshot();
        assert!(snapshot.url.unwrap().as_str().contains("tier=480"));
        // Only the query differs between renditions, so the canonical cache
        // marks the reload warm.
        let last = snapshot.loads.last().cloned().unwrap();
        assert!(last.1, "rendition reload should be warm");
    }

    #[tokio::test]
    async fn failed_quality_switch_restores_previous_rendition() {
        let mut h = loaded_harness(
            vec![
                descriptor("https://cdn.example/a.mp4", Some(5.0)),
                descriptor("https://cdn.example/b.mp4", Some(3.0)),
            ],
            QualityChoice::Tier(Tier::Q1080),
        )
        .await;
        h.run.do_seek(0.75).await.unwrap();
        h.delivery.set_fail(true);

        let err = h
            .run
            .do_set_quality(QualityChoice::Tier(Tier::Q480))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::QualitySwitchFailed { .. }));
        assert_eq!(h.run.quality.selected(), Some(Tier::Q1080));
        let cursor = cursor(&h);
        assert_eq!(cursor.current_index, 1);
        assert!((cursor.segment_offset - 1.0).abs() < 1e-9);
        let events = drain(&mut h.events);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, EngineEvent::Degraded { .. }))
        );
    }

    #[tokio::test]
    async fn duration_probe_patches_the_queue_in_place() {
        let mut h = harness(vec![
            descriptor("https://cdn.example/a.mp4", Some(5.0)),
            descriptor("https://cdn.example/b.mp4", None),
        ]);
        // Rendition URLs carry a tier query; the prober keys canonically.
        h.prober.script("https://cdn.example/b.mp4", 3.0);
        h.run
            .handle_command(EngineCommand::Attach(h.fakes.tracks()))
            .await;
        h.run
            .do_load("output-1".into(), None, QualityChoice::Auto)
            .await
            .unwrap();

        // The probe task reports back through the command channel.
        let command = tokio::time::timeout(Duration::from_secs(1), h.run.commands.recv())
            .await
            .unwrap()
            .unwrap();
        h.run.handle_command(command).await;

        let total = h.run.session.as_ref().unwrap().queue.total_duration();
        assert!((total - 8.0).abs() < 1e-9);
        let events = drain(&mut h.events);
        assert!(events.contains(&EngineEvent::DurationDiscovered {
            index: 1,
            duration: 3.0
        }));
    }

    #[tokio::test]
    async fn stale_probe_results_are_discarded() {
        let mut h = loaded_harness(
            vec![
                descriptor("https://cdn.example/a.mp4", Some(5.0)),
                descriptor("https://cdn.example/b.mp4", None),
            ],
            QualityChoice::Auto,
        )
        .await;
        let before = h.run.session.as_ref().unwrap().queue.total_duration();

        h.run
            .handle_command(EngineCommand::DurationDiscovered {
                epoch: h.run.epoch - 1,
                index: 1,
                duration: 99.0,
            })
            .await;

        let after = h.run.session.as_ref().unwrap().queue.total_duration();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn mute_respects_the_separate_voice_policy() {
        let mut h = loaded_harness(
            vec![descriptor_with_tracks("https://cdn.example/a.mp4", Some(5.0))],
            QualityChoice::Auto,
        )
        .await;

        // Voice present: principal is muted regardless of the user flag.
        assert!(h.fakes.principal[0].snapshot().muted);
        assert!(!h.fakes.voice[0].snapshot().muted);

        h.run.handle_command(EngineCommand::SetMuted(true)).await;
        assert!(h.fakes.principal[0].snapshot().muted);
        assert!(h.fakes.voice[0].snapshot().muted);

        h.run.handle_command(EngineCommand::SetMuted(false)).await;
        assert!(h.fakes.principal[0].snapshot().muted);
        assert!(!h.fakes.voice[0].snapshot().muted);
    }

    #[tokio::test]
    async fn volume_applies_to_audible_tracks() {
        let mut h = loaded_harness(
            vec![descriptor_with_tracks("https://cdn.example/a.mp4", Some(5.0))],
            QualityChoice::Auto,
        )
        .await;
        h.run.handle_command(EngineCommand::SetVolume(0.25)).await;
        assert_eq!(h.fakes.voice[0].snapshot().volume, 0.25);
        assert_eq!(h.fakes.principal[0].snapshot().volume, 0.25);
    }

    #[tokio::test]
    async fn spawned_engine_round_trip() {
        let delivery = ScriptedDelivery::uniform(vec![
            descriptor("https://cdn.example/a.mp4", Some(5.0)),
            descriptor("https://cdn.example/b.mp4", Some(3.0)),
        ]);
        let availability = ScriptedAvailability::new(Tier::descending());
        let collaborators = Collaborators {
            delivery,
            availability,
            connection: None,
            prober: None,
            http: build_client().unwrap(),
        };
        let (engine, mut events) = PlaybackEngine::spawn(fast_config(), collaborators);
        let fakes = FakeHandles::new();

        engine.attach(fakes.tracks()).await.unwrap();
        engine
            .load("output-1", None, QualityChoice::Auto)
            .await
            .unwrap();
        assert!((engine.status().total_duration - 8.0).abs() < 1e-9);
        assert!(!engine.status().is_playing);

        engine.play().await.unwrap();
        let mut playing = false;
        for _ in 0..100 {
            if engine.status().is_playing {
                playing = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(playing, "engine never reported playing");
        assert!(
            events.recv().await.is_some(),
            "engine emitted no events at all"
        );

        engine.shutdown();
    }
}
