//! Tile mosaics assembled from STAC API search results.
//!
//! For each requested tile the backend searches the catalog with the
//! tile's footprint, then composites candidate items first-come
//! first-served: the first successful read becomes the canvas and later
//! items only fill pixels that are still invalid. Per-item failures are
//! logged and skipped, never fatal.

use std::sync::Arc;
use std::time::Instant;

use geojson::{Geometry, Value as GeoValue};
use serde_json::{Map, Value, json};
use tessella_tile_utils::{Crs, TileCoord, tile_bbox_wgs84};
use tracing::{debug, warn};

use crate::assets::AssetResolver;
use crate::image::TileImage;
use crate::readers::TileBackend;
use crate::search::{SearchError, StacSearchClient};
use crate::stac::Item;
use crate::tiler::{ItemTiler, TileRequest, TilerError};

/// Errors from mosaic assembly.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum MosaicError {
    /// The search matched no items at all.
    #[error("No items found for tile {xyz:#}")]
    NoItemsFound {
        /// The requested tile.
        xyz: TileCoord,
    },

    /// Items matched but none produced usable pixels.
    #[error("No valid data produced for tile {xyz:#} from {candidates} candidate items")]
    EmptyMosaic {
        /// The requested tile.
        xyz: TileCoord,
        /// How many items the search returned.
        candidates: usize,
    },

    /// The operation is not available on this backend.
    #[error("{0} is not supported by the STAC API mosaic backend")]
    Unsupported(&'static str),

    /// The catalog search failed.
    #[error(transparent)]
    Search(#[from] SearchError),

    /// The request itself was invalid, before any item was read.
    #[error(transparent)]
    Tiler(#[from] TilerError),
}

/// A dynamic mosaic source backed by one STAC API endpoint.
#[derive(Debug, Clone)]
pub struct StacApiBackend {
    client: StacSearchClient,
    resolver: AssetResolver,
    raster: Arc<dyn TileBackend>,
    array: Option<Arc<dyn TileBackend>>,
}

impl StacApiBackend {
    /// Creates a backend searching through `client` and decoding
    /// rasters through `raster`.
    #[must_use]
    pub fn new(
        client: StacSearchClient,
        resolver: AssetResolver,
        raster: Arc<dyn TileBackend>,
    ) -> Self {
        Self {
            client,
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

    /// The search client in use.
    #[must_use]
    pub fn client(&self) -> &StacSearchClient {
        &self.client
    }

    /// Items intersecting the footprint of `xyz`.
    pub async fn items_for_tile(
        &self,
        xyz: TileCoord,
        query: Option<&Map<String, Value>>,
    ) -> Result<Arc<Vec<Item>>, MosaicError> {
        let geometry = bbox_geometry(tile_bbox_wgs84(xyz));
        Ok(self.client.search(&geometry, query, None).await?)
    }

    /// Items covering a single point, given in `crs`.
    pub async fn items_for_point(
        &self,
        x: f64,
        y: f64,
        crs: Crs,
        query: Option<&Map<String, Value>>,
    ) -> Result<Arc<Vec<Item>>, MosaicError> {
        let (lon, lat) = crs.to_wgs84(x, y);
        let geometry = Geometry::new(GeoValue::Point(vec![lon, lat]));
        Ok(self.client.search(&geometry, query, None).await?)
    }

    /// Items intersecting a bounding box, given in `crs`.
    pub async fn items_for_bbox(
        &self,
        bounds: [f64; 4],
        crs: Crs,
        query: Option<&Map<String, Value>>,
    ) -> Result<Arc<Vec<Item>>, MosaicError> {
        let geometry = bbox_geometry(crs.bounds_to_wgs84(bounds));
        Ok(self.client.search(&geometry, query, None).await?)
    }

    /// Assembles the mosaic tile at `xyz`.
    ///
    /// Returns the composited image and the ids of the items that were
    /// read into it, in search order. The image carries `timings`
    /// metadata with the search and mosaicking durations in
    /// milliseconds.
    pub async fn tile(
        &self,
        xyz: TileCoord,
        query: Option<&Map<String, Value>>,
        request: &TileRequest,
    ) -> Result<(TileImage, Vec<String>), MosaicError> {
        if request.assets.is_empty() && request.expression.is_none() {
            return Err(TilerError::MissingAssets.into());
        }

        let search_start = Instant::now();
        let items = self.items_for_tile(xyz, query).await?;
        let search_ms = search_start.elapsed().as_secs_f64() * 1000.0;
        if items.is_empty() {
            return Err(MosaicError::NoItemsFound { xyz });
        }

        let mosaic_start = Instant::now();
        let (mut image, used) = self.mosaic_first(&items, xyz, request).await?;
        let mosaic_ms = mosaic_start.elapsed().as_secs_f64() * 1000.0;

        image.metadata.insert(
            "timings".to_string(),
            json!([["search", search_ms], ["mosaicking", mosaic_ms]]),
        );
        Ok((image, used))
    }

    /// Point values are not available through this backend.
    pub async fn point(
        &self,
        _x: f64,
        _y: f64,
        _crs: Crs,
        _request: &TileRequest,
    ) -> Result<Vec<f64>, MosaicError> {
        Err(MosaicError::Unsupported("point"))
    }

    /// Arbitrary bbox reads are not available through this backend.
    pub async fn part(
        &self,
        _bounds: [f64; 4],
        _crs: Crs,
        _request: &TileRequest,
    ) -> Result<(TileImage, Vec<String>), MosaicError> {
        Err(MosaicError::Unsupported("part"))
    }

    /// Geometry-clipped reads are not available through this backend.
    pub async fn feature(
        &self,
        _geometry: &Geometry,
        _request: &TileRequest,
    ) -> Result<(TileImage, Vec<String>), MosaicError> {
        Err(MosaicError::Unsupported("feature"))
    }

    /// First-success compositing over the candidate items.
    ///
    /// Candidates are visited in search order. The first successful
    /// read becomes the canvas; later reads only fill still-invalid
    /// pixels. Stops as soon as the canvas is fully valid.
    async fn mosaic_first(
        &self,
        items: &[Item],
        xyz: TileCoord,
        request: &TileRequest,
    ) -> Result<(TileImage, Vec<String>), MosaicError> {
        let mut canvas: Option<TileImage> = None;
        let mut used = Vec::new();

        for item in items {
            let id = item.id.clone();
            let tiler = ItemTiler::new(item.clone(), self.resolver.clone(), Arc::clone(&self.raster));
            let tiler = match &self.array {
                Some(array) => tiler.with_array_backend(Arc::clone(array)),
                None => tiler,
            };
            if !tiler.tile_exists(xyz) {
                continue;
            }

            let part = match tiler.tile(xyz, request).await {
                Ok(part) => part,
                Err(err) => {
                    warn!("Skipping item '{id}' for tile {xyz:#}: {err}");
                    continue;
                }
            };

            match canvas.as_mut() {
                None => {
                    canvas = Some(part);
                    used.push(id);
                }
                Some(image) => match image.paste_missing(&part) {
                    Ok(filled) => {
                        debug!("Item '{id}' filled {filled} pixels of tile {xyz:#}");
                        used.push(id);
                    }
                    Err(err) => {
                        warn!("Skipping item '{id}' for tile {xyz:#}: {err}");
                        continue;
                    }
                },
            }

            if canvas.as_ref().is_some_and(TileImage::is_fully_valid) {
                break;
            }
        }

        match canvas {
            Some(image) => Ok((image, used)),
            None => Err(MosaicError::EmptyMosaic {
                xyz,
                candidates: items.len(),
            }),
        }
    }
}

/// A bounding box as a closed GeoJSON polygon ring.
fn bbox_geometry(bounds: [f64; 4]) -> Geometry {
    let [west, south, east, north] = bounds;
    Geometry::new(GeoValue::Polygon(vec![vec![
        vec![west, south],
        vec![east, south],
        vec![east, north],
        vec![west, north],
        vec![west, south],
    ]]))
}
