// Network speed estimation: platform-reported connection metadata when the
// host can supply it, a timed download probe otherwise, an EWMA history as
// the cushion between the two, and a conservative default when everything
// else fails.

use crate::config::ProbeConfig;
use crate::error::EngineError;
use crate::quality::Tier;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use url::Url;

/// Platform-reported connection metadata, when the hosting environment has
/// any (e.g. an OS connection class API). Queried before falling back to a
/// real probe download.
pub trait ConnectionMetadata: Send + Sync {
    /// Estimated downstream bandwidth in bits per second, if known.
    fn downlink_bps(&self) -> Option<u64>;
}

/// Where a bandwidth figure came from, in falling order of trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthSource {
    Platform,
    Probe,
    History,
    /// No signal at all; the quality controller defaults to the highest tier.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandwidthEstimate {
    pub bps: Option<u64>,
    pub source: BandwidthSource,
}

/// Measures available downstream bandwidth and classifies it into a tier.
pub struct SpeedEstimator {
    config: ProbeConfig,
    client: reqwest::Client,
    metadata: Option<Arc<dyn ConnectionMetadata>>,
    /// EWMA of past measurements in bits per second.
    history: Mutex<Option<f64>>,
}

impl SpeedEstimator {
    pub fn new(
        config: ProbeConfig,
        client: reqwest::Client,
        metadata: Option<Arc<dyn ConnectionMetadata>>,
    ) -> Self {
        Self {
            config,
            client,
            metadata,
            history: Mutex::new(None),
        }
    }

    /// Current best estimate: platform metadata, then a timed probe, then
    /// the historical average.
    pub async fn estimate(&self) -> BandwidthEstimate {
        if let Some(bps) = self.metadata.as_ref().and_then(|m| m.downlink_bps()) {
            self.record(bps);
            return BandwidthEstimate {
                bps: Some(bps),
                source: BandwidthSource::Platform,
            };
        }

        if self.config.probe_url.is_some() {
            match self.probe().await {
                Ok(bps) => {
                    self.record(bps);
                    return BandwidthEstimate {
                        bps: Some(bps),
                        source: BandwidthSource::Probe,
                    };
                }
                Err(error) => {
                    warn!(%error, "bandwidth probe failed, falling back to history");
                }
            }
        }

        match self.historical_average() {
            Some(bps) => BandwidthEstimate {
                bps: Some(bps),
                source: BandwidthSource::History,
            },
            None => BandwidthEstimate {
                bps: None,
                source: BandwidthSource::None,
            },
        }
    }

    /// Time a real download of the fixed probe resource.
    async fn probe(&self) -> Result<u64, EngineError> {
        let raw = self
            .config
            .probe_url
            .as_deref()
            .ok_or_else(|| EngineError::ProbeFailed {
                reason: "no probe URL configured".into(),
            })?;
        let url = Url::parse(raw).map_err(|e| EngineError::InvalidUrl {
            input: raw.to_string(),
            reason: e.to_string(),
        })?;

        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .timeout(self.config.probe_timeout)
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;
        let elapsed = started.elapsed().as_secs_f64();
        if elapsed <= 0.0 || body.is_empty() {
            return Err(EngineError::ProbeFailed {
                reason: "probe produced no measurable transfer".into(),
            });
        }

        let bps = (body.len() as f64 * 8.0 / elapsed) as u64;
        debug!(
            bytes = body.len(),
            elapsed_ms = (elapsed * 1000.0) as u64,
            bps,
            "bandwidth probe complete"
        );
        Ok(bps)
    }

    /// Fold a measurement into the EWMA history.
    pub fn record(&self, bps: u64) {
        let mut history = self.history.lock();
        let alpha = self.config.ewma_alpha.clamp(0.01, 1.0);
        *history = Some(match *history {
            Some(prev) => alpha * bps as f64 + (1.0 - alpha) * prev,
            None => bps as f64,
        });
    }

    pub fn historical_average(&self) -> Option<u64> {
        self.history.lock().map(|v| v as u64)
    }

    /// Classify a bandwidth figure into the highest tier it affords.
    /// `None` means no signal, which the quality controller treats as
    /// "default to the highest tier".
    pub fn classify(&self, bps: Option<u64>) -> Option<Tier> {
        let bps = bps?;
        Some(if bps >= self.config.bps_1080 {
            Tier::Q1080
        } else if bps >= self.config.bps_720 {
            Tier::Q720
        } else if bps >= self.config.bps_480 {
            Tier::Q480
        } else {
            Tier::Q360
        })
    }

    /// One-call helper: estimate and classify.
    pub async fn affordable_tier(&self) -> Option<Tier> {
        let estimate = self.estimate().await;
        self.classify(estimate.bps)
    }
}
