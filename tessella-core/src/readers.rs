//! Reader selection and the decoding-backend seam.
//!
//! The core never decodes raster or array formats itself. It classifies
//! each asset's media type into a [`ReaderKind`] and hands the URL plus
//! environment options to an injected [`TileBackend`]. Open readers are
//! plain values: dropping one releases whatever file or network handle
//! the backend holds.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tessella_tile_utils::TileCoord;

use crate::image::TileImage;

/// Media types that dispatch to the multidimensional-array reader.
///
/// Both Zarr spellings seen in the wild are accepted.
pub const ARRAY_MEDIA_TYPES: &[&str] = &[
    "application/x-hdf5",
    "application/x-hdf",
    "application/vnd.zarr",
    "application/vnd+zarr",
    "application/x-netcdf",
    "application/netcdf",
];

/// The capability class of decoding backend an asset needs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReaderKind {
    /// Conventional 2D raster formats (GeoTIFF, JPEG2000, ...).
    Raster,
    /// Multidimensional array formats (HDF5, Zarr, NetCDF, ...).
    Array,
}

/// Classifies a media type into a [`ReaderKind`].
///
/// Total: anything outside [`ARRAY_MEDIA_TYPES`], including an absent
/// type, is read as a conventional raster.
#[must_use]
pub fn reader_kind(media_type: Option<&str>) -> ReaderKind {
    match media_type {
        Some(media_type) if ARRAY_MEDIA_TYPES.contains(&media_type) => ReaderKind::Array,
        _ => ReaderKind::Raster,
    }
}

/// Resampling algorithm forwarded to the decoding backend.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    /// Nearest neighbor.
    #[default]
    Nearest,
    /// Bilinear interpolation.
    Bilinear,
    /// Cubic convolution.
    Cubic,
    /// Average of contributing pixels.
    Average,
}

/// Per-read options forwarded to the decoding backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOptions {
    /// 1-based band indexes to read; `None` reads all bands.
    pub indexes: Option<Vec<usize>>,
    /// Resampling algorithm.
    pub resampling: Resampling,
    /// Overrides the dataset's internal nodata value.
    pub nodata: Option<f64>,
    /// Output tile edge length in pixels.
    pub tile_size: u32,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            indexes: None,
            resampling: Resampling::default(),
            nodata: None,
            tile_size: 256,
        }
    }
}

/// An error produced by a decoding backend.
///
/// Backends are external collaborators, so their failures arrive as
/// opaque boxed errors.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct BackendError(Box<dyn std::error::Error + Send + Sync>);

impl BackendError {
    /// Wraps any error as a backend error.
    #[must_use]
    pub fn new(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self(source.into())
    }
}

/// A decoding backend that can open assets by URL.
#[async_trait]
pub trait TileBackend: Send + Sync + std::fmt::Debug {
    /// Opens the asset at `url` with the given environment options.
    ///
    /// The returned reader owns whatever handle the backend acquired;
    /// dropping it releases the handle on every exit path.
    async fn open(
        &self,
        url: &str,
        env: &HashMap<String, String>,
    ) -> Result<Box<dyn AssetReader>, BackendError>;
}

/// An open asset that can serve tile reads.
#[async_trait]
pub trait AssetReader: Send + Sync {
    /// Decodes the requested tile, returning pixel data plus validity mask.
    async fn tile(&self, xyz: TileCoord, options: &ReadOptions) -> Result<TileImage, BackendError>;
}
