//! Single-item tile compositing.
//!
//! An [`ItemTiler`] reads one or more named assets of a STAC item at a
//! tile coordinate, applies per-asset band selection and statistics,
//! labels bands, merges everything into one [`TileImage`] and
//! optionally derives band-math output from it.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tessella_tile_utils::{TileCoord, bbox_intersects, tile_bbox_wgs84};
use tracing::warn;

use crate::assets::{AssetError, AssetResolver};
use crate::expression::{ExpressionError, apply_expression, referenced_assets};
use crate::image::{ImageError, TileImage};
use crate::readers::{BackendError, ReadOptions, ReaderKind, TileBackend, reader_kind};
use crate::stac::Item;

/// Errors from single-item tile compositing.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum TilerError {
    /// The tile does not intersect the item's declared bounds.
    #[error("Tile {xyz:#} is outside bounds of item '{id}'")]
    TileOutsideBounds {
        /// The requested tile.
        xyz: TileCoord,
        /// The item whose bounds were violated.
        id: String,
    },

    /// Neither `assets` nor `expression` produced an asset to read.
    #[error("assets must be passed either via `expression` or `assets` options")]
    MissingAssets,

    /// `asset_as_band` was requested for a multi-band asset.
    #[error("Can't use `asset_as_band` for multi-band asset '{0}'")]
    AssetAsBand(String),

    /// The asset needs an array reader but none is configured.
    #[error("No array backend is configured for media type '{0}'")]
    UnsupportedAssetType(String),

    /// Descriptor resolution failed.
    #[error(transparent)]
    Asset(#[from] AssetError),

    /// Band-math parsing or evaluation failed.
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    /// Compositing failed.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// The decoding backend failed for one asset.
    #[error("Backend failed reading asset '{asset}': {source}")]
    Backend {
        /// The asset being read.
        asset: String,
        /// The backend's error.
        #[source]
        source: BackendError,
    },
}

/// What to read and how, for one composited tile.
#[derive(Debug, Clone, Default)]
pub struct TileRequest {
    /// Asset names to read, in output band order.
    pub assets: Vec<String>,
    /// Band-math expression; when set it overrides `assets`.
    pub expression: Option<String>,
    /// Per-asset band index overrides (1-based).
    pub asset_indexes: HashMap<String, Vec<usize>>,
    /// Label each asset's single band with the bare asset name.
    pub asset_as_band: bool,
    /// Options forwarded to the decoding backend; its `indexes` field
    /// acts as the global fallback when `asset_indexes` has no entry.
    pub read: ReadOptions,
}

/// Reads and composites tiles from one STAC item's assets.
#[derive(Debug, Clone)]
pub struct ItemTiler {
    item: Item,
    resolver: AssetResolver,
    raster: Arc<dyn TileBackend>,
    array: Option<Arc<dyn TileBackend>>,
}

impl ItemTiler {
    /// Creates a tiler for `item` reading rasters through `raster`.
    #[must_use]
    pub fn new(item: Item, resolver: AssetResolver, raster: Arc<dyn TileBackend>) -> Self {
        Self {
            item,
            resolver,
            raster,
            array: None,
        }
    }

    /// Wires an array backend so HDF/Zarr/NetCDF assets can be read.
    #[must_use]
    pub fn with_array_backend(mut self, array: Arc<dyn TileBackend>) -> Self {
        self.array = Some(array);
        self
    }

    /// The item this tiler reads from.
    #[must_use]
    pub fn item(&self) -> &Item {
        &self.item
    }

    /// Whether the tile intersects the item's declared bounds.
    ///
    /// Items without a bbox are treated as unbounded.
    #[must_use]
    pub fn tile_exists(&self, xyz: TileCoord) -> bool {
        match self.item.bounds() {
            Some(bounds) => bbox_intersects(&tile_bbox_wgs84(xyz), &bounds),
            None => true,
        }
    }

    /// Reads and merges the requested assets at `xyz`.
    pub async fn tile(&self, xyz: TileCoord, request: &TileRequest) -> Result<TileImage, TilerError> {
        if !self.tile_exists(xyz) {
            return Err(TilerError::TileOutsideBounds {
                xyz,
                id: self.item.id.clone(),
            });
        }

        let mut assets = request.assets.clone();
        if let Some(expression) = &request.expression {
            if !assets.is_empty() {
                warn!(
                    "Both expression and assets passed; expression overrides the assets parameter"
                );
            }
            let known = self.item.asset_names();
            assets = referenced_assets(expression, &known)?;
        }
        if assets.is_empty() {
            return Err(TilerError::MissingAssets);
        }

        // Reads are independent of each other; output band order follows
        // selection order, so running them sequentially keeps results
        // identical to any parallel schedule.
        let mut parts = Vec::with_capacity(assets.len());
        for asset in &assets {
            parts.push(self.read_asset(asset, xyz, request).await?);
        }
        let merged = TileImage::merge(parts)?;

        if let Some(expression) = &request.expression {
            return Ok(apply_expression(&merged, expression)?);
        }
        Ok(merged)
    }

    async fn read_asset(
        &self,
        asset: &str,
        xyz: TileCoord,
        request: &TileRequest,
    ) -> Result<TileImage, TilerError> {
        // explicit per-asset override beats the global indexes parameter
        let indexes = request
            .asset_indexes
            .get(asset)
            .cloned()
            .or_else(|| request.read.indexes.clone());

        let info = self.resolver.resolve(&self.item, asset).await?;
        let backend = match reader_kind(info.media_type.as_deref()) {
            ReaderKind::Raster => &self.raster,
            ReaderKind::Array => self.array.as_ref().ok_or_else(|| {
                TilerError::UnsupportedAssetType(info.media_type.clone().unwrap_or_default())
            })?,
        };

        let mut options = request.read.clone();
        options.indexes = indexes.clone();

        // the reader is dropped at the end of this scope, which closes
        // the backend handle on success and failure alike
        let reader = backend
            .open(&info.url, &info.env)
            .await
            .map_err(|source| TilerError::Backend {
                asset: asset.to_string(),
                source,
            })?;
        let mut data = reader
            .tile(xyz, &options)
            .await
            .map_err(|source| TilerError::Backend {
                asset: asset.to_string(),
                source,
            })?;

        data.dataset_statistics = subset_statistics(
            info.dataset_statistics.as_deref(),
            indexes.as_deref(),
            data.band_count(),
        );

        let mut metadata = std::mem::take(&mut data.metadata);
        for (key, value) in info.metadata {
            metadata.insert(key, value);
        }
        data.metadata
            .insert(asset.to_string(), Value::Object(metadata));

        if request.asset_as_band {
            if data.band_count() > 1 {
                return Err(TilerError::AssetAsBand(asset.to_string()));
            }
            data.rename_bands(vec![asset.to_string()])?;
        } else {
            let names = match &indexes {
                Some(indexes) if indexes.len() == data.band_count() => indexes
                    .iter()
                    .map(|index| format!("{asset}_{index}"))
                    .collect(),
                _ => (1..=data.band_count())
                    .map(|position| format!("{asset}_{position}"))
                    .collect(),
            };
            data.rename_bands(names)?;
        }

        Ok(data)
    }
}

/// Narrows declared per-band statistics to the bands actually read.
fn subset_statistics(
    statistics: Option<&[(f64, f64)]>,
    indexes: Option<&[usize]>,
    band_count: usize,
) -> Option<Vec<(f64, f64)>> {
    let statistics = statistics?;
    match indexes {
        Some(indexes) => indexes
            .iter()
            .map(|index| index.checked_sub(1).and_then(|i| statistics.get(i)).copied())
            .collect(),
        None => (statistics.len() == band_count).then(|| statistics.to_vec()),
    }
}
