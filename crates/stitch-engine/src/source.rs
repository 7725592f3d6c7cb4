// External collaborator boundary: the quality-availability channel, the
// quality-scoped delivery lookup, and the duration probe. The engine only
// sees these traits; the HTTP implementation at the bottom is the default
// production wiring.

use crate::error::EngineError;
use crate::quality::Tier;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use stitch_timeline::SegmentDescriptor;
use tracing::debug;
use url::Url;

/// Request/response channel reporting, per quality tier, whether that
/// tier's renditions are fully produced for an output.
#[async_trait]
pub trait QualityAvailability: Send + Sync {
    async fn available_tiers(&self, output_id: &str) -> Result<BTreeSet<Tier>, EngineError>;
}

/// Resolves the concrete per-track URLs of an output at a given tier.
/// Consulted on first load and on every quality change.
#[async_trait]
pub trait DeliveryLookup: Send + Sync {
    async fn segment_descriptors(
        &self,
        output_id: &str,
        tier: Tier,
    ) -> Result<Vec<SegmentDescriptor>, EngineError>;
}

/// Discovers the real duration of a media file whose length the descriptors
/// did not carry. The engine applies results asynchronously, patching the
/// queue in place.
#[async_trait]
pub trait DurationProber: Send + Sync {
    async fn probe_duration(&self, url: &Url) -> Result<f64, EngineError>;
}

// --- HTTP implementation ---

#[derive(Debug, Deserialize)]
struct RenditionStatus {
    tier: Tier,
    ready: bool,
}

#[derive(Debug, Deserialize)]
struct RenditionsResponse {
    renditions: Vec<RenditionStatus>,
}

#[derive(Debug, Deserialize)]
struct SegmentsResponse {
    segments: Vec<SegmentDescriptor>,
}

/// Default HTTP wiring for both boundary channels.
pub struct HttpDeliveryApi {
    client: reqwest::Client,
    base: Url,
}

impl HttpDeliveryApi {
    pub fn new(client: reqwest::Client, base: Url) -> Self {
        Self { client, base }
    }

    fn endpoint(&self, path: &str) -> Result<Url, EngineError> {
        self.base.join(path).map_err(|e| EngineError::InvalidUrl {
            input: path.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl QualityAvailability for HttpDeliveryApi {
    async fn available_tiers(&self, output_id: &str) -> Result<BTreeSet<Tier>, EngineError> {
        let url = self.endpoint(&format!("outputs/{output_id}/renditions"))?;
        let response: RenditionsResponse = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let tiers = response
            .renditions
            .into_iter()
            .filter(|r| r.ready)
            .map(|r| r.tier)
            .collect();
        debug!(output_id, ?tiers, "fetched rendition availability");
        Ok(tiers)
    }
}

#[async_trait]
impl DeliveryLookup for HttpDeliveryApi {
    async fn segment_descriptors(
        &self,
        output_id: &str,
        tier: Tier,
    ) -> Result<Vec<SegmentDescriptor>, EngineError> {
        let mut url = self.endpoint(&format!("outputs/{output_id}/segments"))?;
        url.query_pairs_mut().append_pair("tier", tier.as_str());
        let response: SegmentsResponse = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(
            output_id,
            %tier,
            segments = response.segments.len(),
            "resolved quality-scoped delivery"
        );
        Ok(response.segments)
    }
}
