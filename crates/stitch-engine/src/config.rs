// Engine configuration: per-subsystem sub-configs aggregated into one
// top-level struct. Drift tolerance and the buffering fallback are tunables,
// not load-bearing constants.

use std::time::Duration;

/// Configuration for the playback synchronizer.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval of the timing tick while a session is active.
    pub tick_interval: Duration,
    /// Maximum tolerated divergence between tracks before a corrective
    /// re-seek to the audio master.
    pub drift_tolerance: Duration,
    /// Minimum seconds of decoded media ahead of the play head before a
    /// track counts as stalled.
    pub min_buffered_ahead: f64,
    /// Upper bound on a buffering stall before a best-effort resume is
    /// forced rather than hanging indefinitely.
    pub buffering_fallback: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            drift_tolerance: Duration::from_millis(200),
            min_buffered_ahead: 0.3,
            buffering_fallback: Duration::from_secs(2),
        }
    }
}

/// Configuration for the dual-buffer preload manager.
#[derive(Debug, Clone)]
pub struct PreloadConfig {
    /// How many upcoming segments to keep slots for.
    pub lookahead: usize,
    /// Poll interval while waiting for a preload to become ready.
    pub poll_interval: Duration,
    /// Budget `ensure_ready` may spend polling before forcing an emergency
    /// load.
    pub ready_budget: Duration,
    /// Capacity of the canonical-URL media cache.
    pub cache_capacity: u64,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            lookahead: 2,
            poll_interval: Duration::from_millis(100),
            ready_budget: Duration::from_secs(3),
            cache_capacity: 32,
        }
    }
}

/// Configuration for transition frame capture.
#[derive(Debug, Clone)]
pub struct TransitionConfig {
    /// Force the low-end device profile instead of detecting it.
    pub low_end_override: Option<bool>,
    /// Resolution scale applied to captured frames on low-end devices.
    pub low_end_scale: f64,
    /// Whether surfaces smooth scaled frames. Disabled on low-end devices.
    pub smoothing: bool,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            low_end_override: None,
            low_end_scale: 0.5,
            smoothing: true,
        }
    }
}

/// Configuration for quality adaptation.
#[derive(Debug, Clone)]
pub struct QualityConfig {
    /// Minimum time between automatic tier changes (oscillation guard).
    pub min_switch_interval: Duration,
    /// Re-evaluate automatic quality every N synchronizer ticks.
    pub auto_eval_ticks: u32,
    /// Refresh the availability channel at most this often.
    pub availability_refresh: Duration,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_switch_interval: Duration::from_secs(10),
            auto_eval_ticks: 5,
            availability_refresh: Duration::from_secs(15),
        }
    }
}

/// Configuration for the network speed estimator.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Fixed small binary resource used for a timed download when the
    /// platform reports no connection metadata.
    pub probe_url: Option<String>,
    pub probe_timeout: Duration,
    /// Smoothing factor of the measurement history (0 < alpha <= 1).
    pub ewma_alpha: f64,
    /// Minimum bits per second for the 1080 tier.
    pub bps_1080: u64,
    /// Minimum bits per second for the 720 tier.
    pub bps_720: u64,
    /// Minimum bits per second for the 480 tier.
    pub bps_480: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            probe_url: None,
            probe_timeout: Duration::from_secs(5),
            ewma_alpha: 0.3,
            bps_1080: 5_000_000,
            bps_720: 2_500_000,
            bps_480: 1_200_000,
        }
    }
}

/// Configuration for the seek controller.
#[derive(Debug, Clone)]
pub struct SeekConfig {
    /// Shortest debounce applied to drag seeks (infrequent dragging).
    pub debounce_min: Duration,
    /// Longest debounce applied to drag seeks (continuous dragging).
    pub debounce_max: Duration,
    /// Drag intervals at or above this count as infrequent.
    pub drag_reference: Duration,
}

impl Default for SeekConfig {
    fn default() -> Self {
        Self {
            debounce_min: Duration::from_millis(50),
            debounce_max: Duration::from_millis(150),
            drag_reference: Duration::from_millis(400),
        }
    }
}

/// Aggregated engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub sync: SyncConfig,
    pub preload: PreloadConfig,
    pub transition: TransitionConfig,
    pub quality: QualityConfig,
    pub probe: ProbeConfig,
    pub seek: SeekConfig,
}
