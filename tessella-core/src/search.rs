//! STAC API item search with bounded retries and result caching.
//!
//! The client builds `POST {endpoint}/search` requests from a geometry,
//! a passthrough query mapping and a field projection, follows `next`
//! links, optionally signs returned asset hrefs, and memoizes whole
//! result lists in a [`SearchCache`].

use std::collections::BTreeMap;
use std::sync::Arc;

use backon::{ExponentialBuilder, Retryable};
use geojson::Geometry;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::assets::UrlSigner;
use crate::cache::{SearchCache, SearchCacheKey};
use crate::config::{RetryConfig, StacConfig};
use crate::stac::Item;

/// Field projection requested when the caller does not supply one.
pub const DEFAULT_FIELDS: &[&str] = &["assets", "id", "bbox", "collection"];

/// Upper bound on followed `next` links, as a loop guard.
const MAX_PAGES: usize = 100;

/// Errors from the STAC search transport.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum SearchError {
    /// The request could not be sent or the response not received.
    #[error("STAC search request to {url} failed: {source}")]
    Transport {
        /// The search URL.
        url: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The API answered with a non-success status.
    #[error("STAC search to {url} returned {status}")]
    Status {
        /// The search URL.
        url: String,
        /// The response status.
        status: reqwest::StatusCode,
    },

    /// The response body was not a valid item collection.
    #[error("Failed to decode STAC search response from {url}: {source}")]
    Decode {
        /// The search URL.
        url: String,
        /// The decoding error.
        #[source]
        source: reqwest::Error,
    },

    /// A request component could not be serialized.
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    /// Signing a returned asset href failed.
    #[error("Failed to sign '{url}': {source}")]
    Signing {
        /// The URL that was being signed.
        url: String,
        /// The signer's error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl SearchError {
    /// Whether retrying the request may help.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            Self::Status { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

/// One page of search results.
#[derive(Debug, Deserialize)]
struct ItemCollection {
    #[serde(default)]
    features: Vec<Item>,
    #[serde(default)]
    links: Vec<SearchLink>,
}

#[derive(Debug, Clone, Deserialize)]
struct SearchLink {
    rel: String,
    href: String,
    #[serde(default)]
    body: Option<Map<String, Value>>,
}

/// A caching search client for one STAC API endpoint.
#[derive(Debug, Clone)]
pub struct StacSearchClient {
    endpoint: String,
    headers: BTreeMap<String, String>,
    http: reqwest::Client,
    retry: RetryConfig,
    cache: SearchCache,
    stac: StacConfig,
    signer: Option<Arc<dyn UrlSigner>>,
}

impl StacSearchClient {
    /// Creates a client for `endpoint` (the catalog base URL, without
    /// the `/search` suffix).
    #[must_use]
    pub fn new(endpoint: impl Into<String>, cache: SearchCache, retry: RetryConfig) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            headers: BTreeMap::new(),
            http: reqwest::Client::new(),
            retry,
            cache,
            stac: StacConfig::default(),
            signer: None,
        }
    }

    /// Headers (auth and friends) sent with every search request.
    #[must_use]
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Enables the blanket signing pass over returned asset hrefs.
    ///
    /// Uses the same endpoint predicate as per-asset resolution; the
    /// signer must be idempotent because both passes may touch one URL.
    #[must_use]
    pub fn with_signing(mut self, signer: Arc<dyn UrlSigner>, stac: StacConfig) -> Self {
        self.signer = Some(signer);
        self.stac = stac;
        self
    }

    /// The catalog base URL this client searches.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Runs a geometry-bounded search.
    ///
    /// `query` is merged into the request as-is, except for a literal
    /// `bbox` key, which the geometry supersedes. Zero matches is a
    /// successful empty result, never an error. Identical calls within
    /// the cache TTL do not touch the network.
    pub async fn search(
        &self,
        geometry: &Geometry,
        query: Option<&Map<String, Value>>,
        fields: Option<&[&str]>,
    ) -> Result<Arc<Vec<Item>>, SearchError> {
        let key = SearchCacheKey {
            endpoint: self.endpoint.clone(),
            geometry: serde_json::to_string(geometry)?,
            query: serde_json::to_string(&query.cloned().unwrap_or_default())?,
            headers: serde_json::to_string(&self.headers)?,
        };
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let fields = fields.unwrap_or(DEFAULT_FIELDS);
        let mut body = query.cloned().unwrap_or_default();
        // geometry supersedes any literal bbox filter
        body.remove("bbox");
        body.insert("intersects".to_string(), serde_json::to_value(geometry)?);
        body.insert("fields".to_string(), json!({ "include": fields }));

        let mut items = self.fetch_all(body).await?;
        if let Some(signer) = &self.signer {
            sign_items(&mut items, signer, &self.stac).await?;
        }

        let items = Arc::new(items);
        self.cache.insert(key, Arc::clone(&items)).await;
        Ok(items)
    }

    /// Fetches every page of one search, following `next` links.
    async fn fetch_all(&self, body: Map<String, Value>) -> Result<Vec<Item>, SearchError> {
        let mut url = format!("{}/search", self.endpoint);
        let mut body = body;
        let mut items = Vec::new();
        for page in 0.. {
            if page == MAX_PAGES {
                warn!("Stopping STAC search pagination after {MAX_PAGES} pages of {url}");
                break;
            }
            let collection = self.fetch_page(&url, &body).await?;
            items.extend(collection.features);
            let Some(next) = collection.links.into_iter().find(|link| link.rel == "next") else {
                break;
            };
            url = next.href;
            if let Some(next_body) = next.body {
                body = next_body;
            }
        }
        debug!("STAC search of {} returned {} items", self.endpoint, items.len());
        Ok(items)
    }

    /// Fetches a single page, retrying transient failures with backoff.
    async fn fetch_page(
        &self,
        url: &str,
        body: &Map<String, Value>,
    ) -> Result<ItemCollection, SearchError> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.retry.min_delay)
            .with_factor(self.retry.factor)
            .with_max_times(self.retry.retries);
        (|| self.post_page(url, body))
            .retry(backoff)
            .when(SearchError::is_transient)
            .notify(|err, after| {
                warn!("Retrying STAC search in {after:?} after transient failure: {err}");
            })
            .await
    }

    async fn post_page(
        &self,
        url: &str,
        body: &Map<String, Value>,
    ) -> Result<ItemCollection, SearchError> {
        let mut request = self.http.post(url).json(body);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await.map_err(|source| SearchError::Transport {
            url: url.to_string(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status {
                url: url.to_string(),
                status,
            });
        }
        response
            .json()
            .await
            .map_err(|source| SearchError::Decode {
                url: url.to_string(),
                source,
            })
    }
}

/// Applies the blanket signing pass to every matching asset href.
async fn sign_items(
    items: &mut [Item],
    signer: &Arc<dyn UrlSigner>,
    stac: &StacConfig,
) -> Result<(), SearchError> {
    for item in items.iter_mut() {
        for asset in item.assets.values_mut() {
            if stac.requires_signing(&asset.href) {
                asset.href =
                    signer
                        .sign(&asset.href)
                        .await
                        .map_err(|source| SearchError::Signing {
                            url: asset.href.clone(),
                            source,
                        })?;
            }
        }
    }
    Ok(())
}
