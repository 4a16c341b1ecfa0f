//! Core engine for serving dynamic map tile mosaics from a STAC API.
//!
//! Instead of pre-rendering a mosaic, every tile request searches a
//! [STAC](https://stacspec.org/) catalog with the tile's footprint,
//! resolves the matching items' asset URLs, reads them through an
//! injected decoding backend and composites the results first-come
//! first-served into one image.
//!
//! The crate deliberately stops at two seams:
//!
//! * decoding raster and array formats is the job of a
//!   [`TileBackend`](readers::TileBackend) implementation,
//! * encoding the composited [`TileImage`](image::TileImage) to
//!   PNG/JPEG/WebP and the HTTP surface around it live in the serving
//!   layer.
//!
//! [`mosaic::StacApiBackend`] ties the pieces together; the modules
//! below it can also be used on their own.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod assets;
pub mod cache;
pub mod config;
mod errors;
pub mod expression;
pub mod image;
pub mod mosaic;
pub mod readers;
pub mod search;
pub mod stac;
pub mod tiler;

pub use errors::{TessellaCoreError, TessellaCoreResult};
