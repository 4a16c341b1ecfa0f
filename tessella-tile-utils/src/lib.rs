//! Tile-grid math shared by the tessella mosaic tiler.
//!
//! Everything here assumes the `WebMercatorQuad` tiling scheme: square
//! tiles addressed by `(z, x, y)` over the EPSG:3857 projection, with
//! geographic coordinates expressed in WGS84 degrees.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::fmt::{Display, Formatter};

/// WGS84 equatorial radius in meters.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Earth circumference at the equator in meters (EPSG:3857 world width).
pub const EARTH_CIRCUMFERENCE: f64 = 2.0 * std::f64::consts::PI * EARTH_RADIUS;

/// Maximum supported zoom level.
pub const MAX_ZOOM: u8 = 30;

/// A tile address in the `WebMercatorQuad` tiling scheme.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TileCoord {
    /// Zoom level.
    pub z: u8,
    /// Column index, `0..2^z`.
    pub x: u32,
    /// Row index, `0..2^z`, counted from the north.
    pub y: u32,
}

impl TileCoord {
    /// Creates a new tile coordinate.
    #[must_use]
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }
}

impl Display for TileCoord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            write!(f, "{}/{}/{}", self.z, self.x, self.y)
        } else {
            write!(f, "{},{},{}", self.z, self.x, self.y)
        }
    }
}

/// Converts a Web Mercator (EPSG:3857) point to WGS84 `(lon, lat)` degrees.
#[must_use]
pub fn webmercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lng = (x / EARTH_RADIUS).to_degrees();
    let lat = (y / EARTH_RADIUS).sinh().atan().to_degrees();
    (lng, lat)
}

/// Converts a WGS84 `(lon, lat)` degree point to Web Mercator (EPSG:3857).
#[must_use]
pub fn wgs84_to_webmercator(lon: f64, lat: f64) -> (f64, f64) {
    let x = lon.to_radians() * EARTH_RADIUS;
    let y = (lat.to_radians() / 2.0 + std::f64::consts::FRAC_PI_4)
        .tan()
        .ln()
        * EARTH_RADIUS;
    (x, y)
}

/// Bounding box of a tile in Web Mercator meters, `[min_x, min_y, max_x, max_y]`.
#[must_use]
pub fn tile_bbox_webmercator(xyz: TileCoord) -> [f64; 4] {
    let tile_span = EARTH_CIRCUMFERENCE / f64::from(1_u32 << xyz.z.min(MAX_ZOOM));
    let min_x = -EARTH_CIRCUMFERENCE / 2.0 + f64::from(xyz.x) * tile_span;
    let max_y = EARTH_CIRCUMFERENCE / 2.0 - f64::from(xyz.y) * tile_span;
    [min_x, max_y - tile_span, min_x + tile_span, max_y]
}

/// Bounding box of a tile in WGS84 degrees, `[west, south, east, north]`.
#[must_use]
pub fn tile_bbox_wgs84(xyz: TileCoord) -> [f64; 4] {
    let [min_x, min_y, max_x, max_y] = tile_bbox_webmercator(xyz);
    let (west, south) = webmercator_to_wgs84(min_x, min_y);
    let (east, north) = webmercator_to_wgs84(max_x, max_y);
    [west, south, east, north]
}

/// Whether two `[min_x, min_y, max_x, max_y]` boxes overlap (touching counts).
#[must_use]
pub fn bbox_intersects(a: &[f64; 4], b: &[f64; 4]) -> bool {
    a[0] <= b[2] && b[0] <= a[2] && a[1] <= b[3] && b[1] <= a[3]
}

/// The coordinate reference systems understood by the tiler.
///
/// STAC item geometries and bounding boxes are always WGS84; tile
/// addressing is Web Mercator. Anything else has to be reprojected by
/// the caller before it reaches this crate.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Crs {
    /// EPSG:4326, degrees.
    #[default]
    Wgs84,
    /// EPSG:3857, meters.
    WebMercator,
}

impl Crs {
    /// Transforms a point in this CRS to WGS84 `(lon, lat)`.
    #[must_use]
    pub fn to_wgs84(self, x: f64, y: f64) -> (f64, f64) {
        match self {
            Self::Wgs84 => (x, y),
            Self::WebMercator => webmercator_to_wgs84(x, y),
        }
    }

    /// Transforms `[min_x, min_y, max_x, max_y]` in this CRS to WGS84.
    #[must_use]
    pub fn bounds_to_wgs84(self, bounds: [f64; 4]) -> [f64; 4] {
        match self {
            Self::Wgs84 => bounds,
            Self::WebMercator => {
                let (west, south) = webmercator_to_wgs84(bounds[0], bounds[1]);
                let (east, north) = webmercator_to_wgs84(bounds[2], bounds[3]);
                [west, south, east, north]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn world_tile_covers_mercator_extent() {
        let bbox = tile_bbox_wgs84(TileCoord::new(0, 0, 0));
        assert_abs_diff_eq!(bbox[0], -180.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bbox[1], -85.051_128_779_806_6, epsilon = 1e-9);
        assert_abs_diff_eq!(bbox[2], 180.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bbox[3], 85.051_128_779_806_6, epsilon = 1e-9);
    }

    #[rstest]
    #[case(TileCoord::new(1, 0, 0), [-180.0, 0.0, 0.0, 85.051_128_779_806_6])]
    #[case(TileCoord::new(1, 1, 1), [0.0, -85.051_128_779_806_6, 180.0, 0.0])]
    #[case(TileCoord::new(2, 2, 1), [0.0, 0.0, 90.0, 66.513_260_443_111_86])]
    fn tile_bboxes_match_webmercatorquad(#[case] xyz: TileCoord, #[case] expected: [f64; 4]) {
        let bbox = tile_bbox_wgs84(xyz);
        for (got, want) in bbox.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(got, want, epsilon = 1e-8);
        }
    }

    #[rstest]
    #[case(0.0, 0.0)]
    #[case(-121.349_487, 41.971_743)]
    #[case(179.9, -84.9)]
    fn mercator_roundtrip(#[case] lon: f64, #[case] lat: f64) {
        let (x, y) = wgs84_to_webmercator(lon, lat);
        let (lon2, lat2) = webmercator_to_wgs84(x, y);
        assert_abs_diff_eq!(lon, lon2, epsilon = 1e-9);
        assert_abs_diff_eq!(lat, lat2, epsilon = 1e-9);
    }

    #[rstest]
    #[case([0.0, 0.0, 10.0, 10.0], [5.0, 5.0, 15.0, 15.0], true)]
    #[case([0.0, 0.0, 10.0, 10.0], [10.0, 10.0, 20.0, 20.0], true)]
    #[case([0.0, 0.0, 10.0, 10.0], [11.0, 0.0, 20.0, 10.0], false)]
    #[case([-180.0, -90.0, 180.0, 90.0], [12.0, -3.0, 13.0, -2.0], true)]
    fn bbox_intersection(#[case] a: [f64; 4], #[case] b: [f64; 4], #[case] expected: bool) {
        assert_eq!(bbox_intersects(&a, &b), expected);
        assert_eq!(bbox_intersects(&b, &a), expected);
    }

    #[test]
    fn crs_transforms_to_wgs84() {
        let (lon, lat) = Crs::WebMercator.to_wgs84(0.0, 0.0);
        assert_abs_diff_eq!(lon, 0.0);
        assert_abs_diff_eq!(lat, 0.0);

        let bounds =
            Crs::WebMercator.bounds_to_wgs84([-20_037_508.342_789_244, 0.0, 0.0, 7_087_636.0]);
        assert_abs_diff_eq!(bounds[0], -180.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bounds[1], 0.0, epsilon = 1e-9);

        let passthrough = Crs::Wgs84.bounds_to_wgs84([1.0, 2.0, 3.0, 4.0]);
        assert_eq!(passthrough, [1.0, 2.0, 3.0, 4.0]);
    }
}
