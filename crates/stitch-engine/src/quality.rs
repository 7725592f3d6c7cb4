// Quality adaptation: tier model, availability tracking, and the switch
// decision logic. The actual queue rebuild a decision triggers is owned by
// the orchestrator; this module only decides.

use crate::config::QualityConfig;
use crate::error::EngineError;
use crate::source::QualityAvailability;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// A quality rendition level of the same output, ordered lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
pub enum Tier {
    #[serde(rename = "360")]
    Q360,
    #[serde(rename = "480")]
    Q480,
    #[serde(rename = "720")]
    Q720,
    #[serde(rename = "1080")]
    Q1080,
}

impl Tier {
    pub const fn highest() -> Self {
        Tier::Q1080
    }

    /// All tiers from highest to lowest.
    pub fn descending() -> [Tier; 4] {
        [Tier::Q1080, Tier::Q720, Tier::Q480, Tier::Q360]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Q360 => "360",
            Tier::Q480 => "480",
            Tier::Q720 => "720",
            Tier::Q1080 => "1080",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the user (or the hosting application) asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityChoice {
    /// Network-driven selection.
    Auto,
    /// Pin a tier and suppress automatic re-evaluation.
    Tier(Tier),
}

/// Mutable quality state of one session.
#[derive(Debug, Clone)]
pub struct QualityState {
    pub selected: Option<Tier>,
    pub auto_mode: bool,
    pub last_switch: Option<Instant>,
}

impl Default for QualityState {
    fn default() -> Self {
        Self {
            selected: None,
            auto_mode: true,
            last_switch: None,
        }
    }
}

/// Caches which renditions currently exist for the requested output,
/// refreshing from the push/poll status channel on demand.
pub struct AvailabilityTracker {
    channel: Arc<dyn QualityAvailability>,
    cached: RwLock<BTreeSet<Tier>>,
    last_refresh: Mutex<Option<Instant>>,
    refresh_interval: std::time::Duration,
}

impl AvailabilityTracker {
    pub fn new(
        channel: Arc<dyn QualityAvailability>,
        refresh_interval: std::time::Duration,
    ) -> Self {
        Self {
            channel,
            cached: RwLock::new(BTreeSet::new()),
            last_refresh: Mutex::new(None),
            refresh_interval,
        }
    }

    pub fn available(&self) -> BTreeSet<Tier> {
        self.cached.read().clone()
    }

    /// Force a refresh. A channel failure keeps the last known answer.
    pub async fn refresh(&self, output_id: &str) -> BTreeSet<Tier> {
        match self.channel.available_tiers(output_id).await {
            Ok(tiers) => {
                debug!(output_id, ?tiers, "quality availability refreshed");
                *self.cached.write() = tiers.clone();
                *self.last_refresh.lock() = Some(Instant::now());
                tiers
            }
            Err(error) => {
                warn!(output_id, %error, "availability refresh failed, keeping cached answer");
                self.available()
            }
        }
    }

    /// Refresh only when the cached answer has gone stale.
    pub async fn ensure_fresh(&self, output_id: &str) -> BTreeSet<Tier> {
        let stale = self
            .last_refresh
            .lock()
            .map(|at| at.elapsed() >= self.refresh_interval)
            .unwrap_or(true);
        if stale {
            self.refresh(output_id).await
        } else {
            self.available()
        }
    }
}

/// Outcome of a quality request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityDecision {
    /// Rebuild against this tier.
    Switch(Tier),
    /// Already at the right tier, or the oscillation guard suppressed an
    /// automatic change.
    Keep,
}

/// Decides which tier a session should play.
pub struct QualityController {
    config: QualityConfig,
    state: QualityState,
}

impl QualityController {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            state: QualityState::default(),
        }
    }

    pub fn state(&self) -> &QualityState {
        &self.state
    }

    pub fn selected(&self) -> Option<Tier> {
        self.state.selected
    }

    pub fn auto_mode(&self) -> bool {
        self.state.auto_mode
    }

    /// Pick the best tier for automatic mode: the highest one that is both
    /// network-affordable and actually rendered. When the network-preferred
    /// tier is not yet rendered, fall down to the next lower available one;
    /// when only higher tiers exist, take the lowest of those; with no signal
    /// at all, default to the highest tier.
    pub fn decide_auto(affordable: Option<Tier>, available: &BTreeSet<Tier>) -> Tier {
        let preferred = affordable.unwrap_or(Tier::highest());
        if available.is_empty() {
            return preferred;
        }
        Tier::descending()
            .into_iter()
            .find(|t| *t <= preferred && available.contains(t))
            .or_else(|| available.iter().next().copied())
            .unwrap_or(preferred)
    }

    /// Resolve a quality request against the current network and
    /// availability signals.
    ///
    /// Manual selections pin the tier and always go through. Automatic
    /// re-evaluations are suppressed while the minimum switch interval has
    /// not elapsed.
    pub fn request(
        &mut self,
        choice: QualityChoice,
        affordable: Option<Tier>,
        available: &BTreeSet<Tier>,
    ) -> QualityDecision {
        let target = match choice {
            QualityChoice::Tier(tier) => {
                self.state.auto_mode = false;
                tier
            }
            QualityChoice::Auto => {
                self.state.auto_mode = true;
                let target = Self::decide_auto(affordable, available);
                let guarded = self
                    .state
                    .last_switch
                    .is_some_and(|at| at.elapsed() < self.config.min_switch_interval);
                if guarded && self.state.selected.is_some_and(|current| current != target) {
                    debug!(%target, "automatic switch suppressed by oscillation guard");
                    return QualityDecision::Keep;
                }
                target
            }
        };

        if self.state.selected == Some(target) {
            QualityDecision::Keep
        } else {
            QualityDecision::Switch(target)
        }
    }

    /// Record a completed switch.
    pub fn mark_switched(&mut self, tier: Tier) {
        self.state.selected = Some(tier);
        self.state.last_switch = Some(Instant::now());
    }

    /// A failed switch reverts to the previously active tier without
    /// touching the switch timestamp, so the next re-evaluation is not
    /// further delayed by the failure.
    pub fn revert(&mut self, previous: Option<Tier>) {
        self.state.selected = previous;
    }
}

/// Convenience re-export for boundary errors.
pub type QualityResult<T> = Result<T, EngineError>;
