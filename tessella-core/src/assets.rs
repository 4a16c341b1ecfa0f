//! Per-asset descriptor resolution.
//!
//! Turns an `(item, asset name)` pair into everything a decoding
//! backend needs to open the asset: the resolved (possibly alternate,
//! possibly signed) URL, the media type, environment options and
//! statistics hints. Descriptors are recomputed on every access so
//! signed URLs stay fresh; they are never cached.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::warn;

use crate::config::StacConfig;
use crate::stac::Item;

/// Environment key telling a raster backend how many bytes to ingest at open.
///
/// Mirrors the `file:header_size` STAC extension value.
pub const INGESTED_BYTES_AT_OPEN: &str = "GDAL_INGESTED_BYTES_AT_OPEN";

/// Errors from asset descriptor resolution.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum AssetError {
    /// The requested asset name is not part of the item.
    #[error("'{asset}' is not valid, should be one of {valid:?}")]
    InvalidAssetName {
        /// The requested name.
        asset: String,
        /// The item's known asset names.
        valid: Vec<String>,
    },

    /// The configured alternate key is missing on this asset.
    #[error("Asset '{asset}' has no alternate href named '{alternate}'")]
    InvalidAlternateUrl {
        /// The asset name.
        asset: String,
        /// The configured alternate key.
        alternate: String,
    },

    /// The external signing transform failed.
    #[error("Failed to sign '{url}': {source}")]
    Signing {
        /// The URL that was being signed.
        url: String,
        /// The signer's error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// External URL-signing capability.
///
/// Implementations may hit the network or an internal token cache; the
/// resolver treats them as opaque. Signers must be idempotent: a URL
/// may pass through both the search-result signing pass and the
/// per-asset pass.
#[async_trait]
pub trait UrlSigner: Send + Sync + std::fmt::Debug {
    /// Returns a signed variant of `url`.
    async fn sign(&self, url: &str) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;
}

/// A resolved asset descriptor.
///
/// Ephemeral: valid for the single read that requested it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetInfo {
    /// Resolved URL, after alternate substitution and signing.
    pub url: String,
    /// Declared media type.
    pub media_type: Option<String>,
    /// Environment options for the decoding backend.
    pub env: HashMap<String, String>,
    /// Per-band `(minimum, maximum)`; present only when every band
    /// declares both values.
    pub dataset_statistics: Option<Vec<(f64, f64)>>,
    /// The asset's extension fields, passed through as metadata.
    pub metadata: Map<String, Value>,
}

/// Resolves asset descriptors for STAC items.
#[derive(Debug, Clone, Default)]
pub struct AssetResolver {
    config: StacConfig,
    signer: Option<Arc<dyn UrlSigner>>,
}

impl AssetResolver {
    /// Creates a resolver with the given STAC configuration.
    #[must_use]
    pub fn new(config: StacConfig) -> Self {
        Self {
            config,
            signer: None,
        }
    }

    /// Attaches the external signing capability.
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn UrlSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// The signer, if one is attached.
    #[must_use]
    pub fn signer(&self) -> Option<&Arc<dyn UrlSigner>> {
        self.signer.as_ref()
    }

    /// Whether `url` points at a provider requiring signed access.
    #[must_use]
    pub fn requires_signing(&self, url: &str) -> bool {
        self.config.requires_signing(url)
    }

    /// Validates `asset_name` against `item` and builds its descriptor.
    pub async fn resolve(&self, item: &Item, asset_name: &str) -> Result<AssetInfo, AssetError> {
        let Some(asset) = item.assets.get(asset_name) else {
            return Err(AssetError::InvalidAssetName {
                asset: asset_name.to_string(),
                valid: item.assets.keys().cloned().collect(),
            });
        };

        let mut url = asset.href.clone();
        if let Some(alternate) = &self.config.alternate_url {
            url = asset
                .alternate
                .as_ref()
                .and_then(|alternates| alternates.get(alternate))
                .map(|entry| entry.href.clone())
                .ok_or_else(|| AssetError::InvalidAlternateUrl {
                    asset: asset_name.to_string(),
                    alternate: alternate.clone(),
                })?;
        }

        let mut env = HashMap::new();
        if let Some(header_size) = asset.header_size {
            env.insert(INGESTED_BYTES_AT_OPEN.to_string(), header_size.to_string());
        }

        let dataset_statistics = asset.raster_bands.as_ref().and_then(|bands| {
            let stats: Vec<(f64, f64)> = bands
                .iter()
                .filter_map(|band| {
                    let statistics = band.statistics.as_ref()?;
                    Some((statistics.minimum?, statistics.maximum?))
                })
                .collect();
            // all-or-nothing: partial statistics are dropped entirely
            (!bands.is_empty() && stats.len() == bands.len()).then_some(stats)
        });

        if self.config.requires_signing(&url) {
            if let Some(signer) = &self.signer {
                url = signer
                    .sign(&url)
                    .await
                    .map_err(|source| AssetError::Signing {
                        url: url.clone(),
                        source,
                    })?;
            } else {
                warn!("Asset URL {url} matches a signed endpoint but no signer is configured");
            }
        }

        Ok(AssetInfo {
            url,
            media_type: asset.media_type.clone(),
            env,
            dataset_statistics,
            metadata: asset.extra_fields.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn item_with_asset(asset: Value) -> Item {
        serde_json::from_value(json!({
            "id": "scene-001",
            "bbox": [-10.0, -10.0, 10.0, 10.0],
            "assets": {"cog": asset}
        }))
        .expect("item should deserialize")
    }

    fn plain_asset() -> Value {
        json!({
            "href": "https://example.com/cog.tif",
            "type": "image/tiff; application=geotiff",
            "alternate": {"s3": {"href": "s3://bucket/cog.tif"}}
        })
    }

    #[derive(Debug)]
    struct SuffixSigner;

    #[async_trait]
    impl UrlSigner for SuffixSigner {
        async fn sign(
            &self,
            url: &str,
        ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
            if url.contains("?token=") {
                Ok(url.to_string())
            } else {
                Ok(format!("{url}?token=abc"))
            }
        }
    }

    #[tokio::test]
    async fn primary_href_is_the_default() {
        let resolver = AssetResolver::default();
        let info = resolver
            .resolve(&item_with_asset(plain_asset()), "cog")
            .await
            .expect("resolve");
        assert_eq!(info.url, "https://example.com/cog.tif");
        assert_eq!(
            info.media_type.as_deref(),
            Some("image/tiff; application=geotiff")
        );
        assert!(info.env.is_empty());
    }

    #[tokio::test]
    async fn alternate_key_substitutes_href() {
        let resolver = AssetResolver::new(StacConfig {
            alternate_url: Some("s3".to_string()),
            signed_endpoints: vec![],
        });
        let info = resolver
            .resolve(&item_with_asset(plain_asset()), "cog")
            .await
            .expect("resolve");
        assert_eq!(info.url, "s3://bucket/cog.tif");
    }

    #[tokio::test]
    async fn missing_alternate_key_is_an_error() {
        let resolver = AssetResolver::new(StacConfig {
            alternate_url: Some("azure".to_string()),
            signed_endpoints: vec![],
        });
        let err = resolver
            .resolve(&item_with_asset(plain_asset()), "cog")
            .await
            .expect_err("missing alternate");
        assert!(matches!(
            err,
            AssetError::InvalidAlternateUrl { asset, alternate }
                if asset == "cog" && alternate == "azure"
        ));
    }

    #[tokio::test]
    async fn unknown_asset_lists_the_valid_names() {
        let resolver = AssetResolver::default();
        let err = resolver
            .resolve(&item_with_asset(plain_asset()), "thumbnail")
            .await
            .expect_err("unknown asset");
        match err {
            AssetError::InvalidAssetName { asset, valid } => {
                assert_eq!(asset, "thumbnail");
                assert_eq!(valid, vec!["cog".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn header_size_lands_in_env() {
        let asset = json!({
            "href": "https://example.com/cog.tif",
            "file:header_size": 16384
        });
        let info = AssetResolver::default()
            .resolve(&item_with_asset(asset), "cog")
            .await
            .expect("resolve");
        assert_eq!(
            info.env.get(INGESTED_BYTES_AT_OPEN).map(String::as_str),
            Some("16384")
        );
    }

    #[tokio::test]
    async fn statistics_require_every_band() {
        let complete = json!({
            "href": "https://example.com/cog.tif",
            "raster:bands": [
                {"statistics": {"minimum": 0.0, "maximum": 255.0}},
                {"statistics": {"minimum": -1.0, "maximum": 1.0}}
            ]
        });
        let info = AssetResolver::default()
            .resolve(&item_with_asset(complete), "cog")
            .await
            .expect("resolve");
        assert_eq!(
            info.dataset_statistics,
            Some(vec![(0.0, 255.0), (-1.0, 1.0)])
        );

        let partial = json!({
            "href": "https://example.com/cog.tif",
            "raster:bands": [
                {"statistics": {"minimum": 0.0, "maximum": 255.0}},
                {"statistics": {"minimum": -1.0}}
            ]
        });
        let info = AssetResolver::default()
            .resolve(&item_with_asset(partial), "cog")
            .await
            .expect("resolve");
        assert_eq!(info.dataset_statistics, None);
    }

    #[tokio::test]
    async fn signing_applies_only_to_configured_endpoints() {
        let resolver = AssetResolver::new(StacConfig {
            alternate_url: None,
            signed_endpoints: vec!["https://secured.example.com/".to_string()],
        })
        .with_signer(Arc::new(SuffixSigner));

        let open = resolver
            .resolve(&item_with_asset(plain_asset()), "cog")
            .await
            .expect("resolve");
        assert_eq!(open.url, "https://example.com/cog.tif");

        let secured = json!({"href": "https://secured.example.com/cog.tif"});
        let signed = resolver
            .resolve(&item_with_asset(secured), "cog")
            .await
            .expect("resolve");
        assert_eq!(signed.url, "https://secured.example.com/cog.tif?token=abc");
    }
}
