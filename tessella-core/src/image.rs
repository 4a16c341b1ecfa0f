//! In-memory tile images and the two compositing passes.
//!
//! A [`TileImage`] is the decoded form a backend hands back and the
//! form the compositors work on: band-major `f64` samples plus a single
//! validity mask. Encoding to PNG/JPEG/... happens outside this crate.

use serde_json::{Map, Value};

/// Errors from tile image construction and compositing.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    /// Band or mask buffer length does not match the image dimensions.
    #[error("Buffer of {got} samples does not match a {width}x{height} image")]
    BufferSizeMismatch {
        /// Actual buffer length.
        got: usize,
        /// Image width.
        width: u32,
        /// Image height.
        height: u32,
    },

    /// Band name count does not match band count.
    #[error("{names} band names given for {bands} bands")]
    BandNameCountMismatch {
        /// Number of names given.
        names: usize,
        /// Number of bands present.
        bands: usize,
    },

    /// Images being composited do not share a shape.
    #[error("Cannot composite a {0}x{1} image with a {2}x{3} image")]
    ShapeMismatch(u32, u32, u32, u32),

    /// Images being mosaicked carry different band counts.
    #[error("Cannot mosaic images with {0} and {1} bands")]
    BandCountMismatch(usize, usize),

    /// Nothing to merge.
    #[error("Cannot merge an empty list of images")]
    EmptyMerge,
}

/// A decoded, composited tile.
///
/// Mutable only while compositing; callers receive it as a final value.
#[derive(Debug, Clone)]
pub struct TileImage {
    width: u32,
    height: u32,
    /// Band-major samples, each band `width * height` long.
    bands: Vec<Vec<f64>>,
    /// Per-pixel validity, `true` = valid data.
    mask: Vec<bool>,
    /// One label per band.
    pub band_names: Vec<String>,
    /// Free-form metadata attached to the output (timings, asset info, ...).
    pub metadata: Map<String, Value>,
    /// Per-band `(minimum, maximum)` hints propagated from asset records.
    pub dataset_statistics: Option<Vec<(f64, f64)>>,
}

impl TileImage {
    /// Creates an image from raw buffers, validating their shapes.
    pub fn new(
        width: u32,
        height: u32,
        bands: Vec<Vec<f64>>,
        mask: Vec<bool>,
        band_names: Vec<String>,
    ) -> Result<Self, ImageError> {
        let pixels = width as usize * height as usize;
        for band in &bands {
            if band.len() != pixels {
                return Err(ImageError::BufferSizeMismatch {
                    got: band.len(),
                    width,
                    height,
                });
            }
        }
        if mask.len() != pixels {
            return Err(ImageError::BufferSizeMismatch {
                got: mask.len(),
                width,
                height,
            });
        }
        if band_names.len() != bands.len() {
            return Err(ImageError::BandNameCountMismatch {
                names: band_names.len(),
                bands: bands.len(),
            });
        }
        Ok(Self {
            width,
            height,
            bands,
            mask,
            band_names,
            metadata: Map::new(),
            dataset_statistics: None,
        })
    }

    /// Creates a fully valid image where every band holds one constant value.
    #[must_use]
    pub fn constant(width: u32, height: u32, values: &[f64]) -> Self {
        let pixels = width as usize * height as usize;
        Self {
            width,
            height,
            bands: values.iter().map(|v| vec![*v; pixels]).collect(),
            mask: vec![true; pixels],
            band_names: (1..=values.len()).map(|i| i.to_string()).collect(),
            metadata: Map::new(),
            dataset_statistics: None,
        }
    }

    /// Image width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of bands.
    #[must_use]
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Samples of the band at `index`, band-major.
    #[must_use]
    pub fn band(&self, index: usize) -> Option<&[f64]> {
        self.bands.get(index).map(Vec::as_slice)
    }

    /// Samples of the band labeled `name`.
    #[must_use]
    pub fn band_by_name(&self, name: &str) -> Option<&[f64]> {
        let index = self.band_names.iter().position(|n| n == name)?;
        self.band(index)
    }

    /// The validity mask, `true` = valid.
    #[must_use]
    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// Relabels all bands at once.
    pub fn rename_bands(&mut self, names: Vec<String>) -> Result<(), ImageError> {
        if names.len() != self.bands.len() {
            return Err(ImageError::BandNameCountMismatch {
                names: names.len(),
                bands: self.bands.len(),
            });
        }
        self.band_names = names;
        Ok(())
    }

    /// Marks the given pixels invalid.
    pub fn mask_out(&mut self, invalid: impl IntoIterator<Item = usize>) {
        for index in invalid {
            if let Some(slot) = self.mask.get_mut(index) {
                *slot = false;
            }
        }
    }

    /// Whether every pixel carries valid data.
    #[must_use]
    pub fn is_fully_valid(&self) -> bool {
        self.mask.iter().all(|valid| *valid)
    }

    /// Whether at least one pixel carries valid data.
    #[must_use]
    pub fn has_valid_pixels(&self) -> bool {
        self.mask.iter().any(|valid| *valid)
    }

    /// Merges per-asset images into one, preserving the given order.
    ///
    /// All parts must share one shape. Bands and names are appended in
    /// order; the merged mask keeps a pixel valid only where every part
    /// does; statistics survive only when every part carries them.
    pub fn merge(parts: Vec<Self>) -> Result<Self, ImageError> {
        let mut parts = parts.into_iter();
        let mut merged = parts.next().ok_or(ImageError::EmptyMerge)?;
        for part in parts {
            if (part.width, part.height) != (merged.width, merged.height) {
                return Err(ImageError::ShapeMismatch(
                    merged.width,
                    merged.height,
                    part.width,
                    part.height,
                ));
            }
            merged.bands.extend(part.bands);
            merged.band_names.extend(part.band_names);
            for (valid, other) in merged.mask.iter_mut().zip(&part.mask) {
                *valid = *valid && *other;
            }
            for (key, value) in part.metadata {
                merged.metadata.insert(key, value);
            }
            merged.dataset_statistics =
                match (merged.dataset_statistics.take(), part.dataset_statistics) {
                    (Some(mut left), Some(right)) => {
                        left.extend(right);
                        Some(left)
                    }
                    _ => None,
                };
        }
        Ok(merged)
    }

    /// Copies `other`'s valid pixels into this image where it has none.
    ///
    /// This is the mosaic fill step: existing valid pixels always win.
    /// Returns how many pixels were filled.
    pub fn paste_missing(&mut self, other: &Self) -> Result<usize, ImageError> {
        if (other.width, other.height) != (self.width, self.height) {
            return Err(ImageError::ShapeMismatch(
                self.width,
                self.height,
                other.width,
                other.height,
            ));
        }
        if other.bands.len() != self.bands.len() {
            return Err(ImageError::BandCountMismatch(
                self.bands.len(),
                other.bands.len(),
            ));
        }
        let mut filled = 0;
        for pixel in 0..self.mask.len() {
            if !self.mask[pixel] && other.mask[pixel] {
                for (band, source) in self.bands.iter_mut().zip(&other.bands) {
                    band[pixel] = source[pixel];
                }
                self.mask[pixel] = true;
                filled += 1;
            }
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(mut img: TileImage, names: &[&str]) -> TileImage {
        img.rename_bands(names.iter().map(ToString::to_string).collect())
            .expect("band name count");
        img
    }

    #[test]
    fn new_validates_buffer_shapes() {
        let err = TileImage::new(2, 2, vec![vec![0.0; 3]], vec![true; 4], vec!["1".into()]);
        assert!(matches!(
            err,
            Err(ImageError::BufferSizeMismatch { got: 3, .. })
        ));

        let err = TileImage::new(2, 2, vec![vec![0.0; 4]], vec![true; 4], vec![]);
        assert!(matches!(
            err,
            Err(ImageError::BandNameCountMismatch { names: 0, bands: 1 })
        ));
    }

    #[test]
    fn merge_preserves_selection_order() {
        let red = named(TileImage::constant(2, 2, &[1.0]), &["red_1"]);
        let nir = named(TileImage::constant(2, 2, &[9.0]), &["nir_1"]);
        let merged = TileImage::merge(vec![red, nir]).expect("merge");
        assert_eq!(merged.band_names, vec!["red_1", "nir_1"]);
        assert_eq!(merged.band_by_name("red_1").expect("red band")[0], 1.0);
        assert_eq!(merged.band_by_name("nir_1").expect("nir band")[0], 9.0);
    }

    #[test]
    fn merge_intersects_masks() {
        let mut a = TileImage::constant(2, 1, &[1.0]);
        a.mask_out([0]);
        let mut b = TileImage::constant(2, 1, &[2.0]);
        b.mask_out([1]);
        let merged = TileImage::merge(vec![a, b]).expect("merge");
        assert_eq!(merged.mask(), &[false, false]);
    }

    #[test]
    fn merge_statistics_are_all_or_nothing() {
        let mut a = TileImage::constant(1, 1, &[1.0]);
        a.dataset_statistics = Some(vec![(0.0, 255.0)]);
        let mut b = TileImage::constant(1, 1, &[2.0]);
        b.dataset_statistics = Some(vec![(-1.0, 1.0)]);
        let merged = TileImage::merge(vec![a.clone(), b]).expect("merge");
        assert_eq!(
            merged.dataset_statistics,
            Some(vec![(0.0, 255.0), (-1.0, 1.0)])
        );

        let bare = TileImage::constant(1, 1, &[2.0]);
        let merged = TileImage::merge(vec![a, bare]).expect("merge");
        assert_eq!(merged.dataset_statistics, None);
    }

    #[test]
    fn merge_rejects_shape_mismatch() {
        let a = TileImage::constant(2, 2, &[1.0]);
        let b = TileImage::constant(3, 2, &[1.0]);
        assert!(matches!(
            TileImage::merge(vec![a, b]),
            Err(ImageError::ShapeMismatch(2, 2, 3, 2))
        ));
    }

    #[test]
    fn paste_missing_only_fills_gaps() {
        let mut canvas = TileImage::constant(2, 1, &[1.0]);
        canvas.mask_out([1]);
        let other = TileImage::constant(2, 1, &[5.0]);

        let filled = canvas.paste_missing(&other).expect("paste");
        assert_eq!(filled, 1);
        assert_eq!(canvas.band(0).expect("band"), &[1.0, 5.0]);
        assert!(canvas.is_fully_valid());

        // a second paste has nothing left to fill
        assert_eq!(canvas.paste_missing(&other).expect("paste"), 0);
    }
}
