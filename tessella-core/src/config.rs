//! Configuration values consumed by the tiler core.
//!
//! Loading these from a file or the environment is the embedding
//! application's job; the core only defines the shapes and defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounds for the search-result cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached search results.
    pub max_entries: u64,
    /// How long a cached search result stays valid.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 512,
            ttl: Duration::from_secs(300),
        }
    }
}

/// Retry policy for the search transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum retry attempts after the initial request.
    pub retries: usize,
    /// Delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub min_delay: Duration,
    /// Multiplier applied to the delay after every retry.
    pub factor: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            min_delay: Duration::from_millis(100),
            factor: 2.0,
        }
    }
}

/// STAC-specific knobs for asset resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StacConfig {
    /// Name of an `alternate` asset entry to prefer over the primary href.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternate_url: Option<String>,
    /// URL prefixes whose assets require a signed URL before use.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub signed_endpoints: Vec<String>,
}

impl StacConfig {
    /// Whether `url` points at a provider that requires signing.
    #[must_use]
    pub fn requires_signing(&self, url: &str) -> bool {
        self.signed_endpoints
            .iter()
            .any(|prefix| url.starts_with(prefix.as_str()))
    }
}
