// Preloaded-media cache, keyed by canonicalized URL.
//
// Quality renditions of the same segment differ only in their query strings
// (signed delivery parameters, tier tokens), so the canonical key strips the
// query and fragment. The cache is capacity-bounded; long sessions with many
// quality switches evict least-recently-used entries instead of growing
// without limit.

use moka::sync::Cache;
use tracing::trace;
use url::Url;

/// Canonical cache key for a media URL: scheme, host, port, and path only.
pub fn canonical_url(url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_query(None);
    canonical.set_fragment(None);
    canonical.to_string()
}

/// What the engine remembers about media it has already loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedMedia {
    /// Discovered media file duration, when metadata resolved.
    pub duration: Option<f64>,
}

/// Bounded cache of already-resident media, shared by the preload manager
/// and the duration-probe path.
#[derive(Clone)]
pub struct MediaCache {
    inner: Cache<String, CachedMedia>,
}

impl MediaCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Cache::new(capacity),
        }
    }

    /// Whether media for this URL is already resident, meaning a reload may
    /// skip the fetch path.
    pub fn is_warm(&self, url: &Url) -> bool {
        self.inner.contains_key(&canonical_url(url))
    }

    pub fn lookup(&self, url: &Url) -> Option<CachedMedia> {
        self.inner.get(&canonical_url(url))
    }

    /// Record a successful load. An already-known duration is never replaced
    /// by `None`.
    pub fn record(&self, url: &Url, duration: Option<f64>) {
        let key = canonical_url(url);
        let duration = duration.or_else(|| self.inner.get(&key).and_then(|m| m.duration));
        trace!(key, ?duration, "media cache record");
        self.inner.insert(key, CachedMedia { duration });
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
    }

    #[cfg(test)]
    pub(crate) fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}
