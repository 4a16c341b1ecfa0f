//! Minimal STAC record types.
//!
//! Only the parts of a STAC item the tiler actually touches are modeled
//! as fields; everything else is kept in `extra_fields` so records
//! round-trip through the search client without loss.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A STAC item as returned by a STAC API search.
///
/// Items are immutable once loaded; the tiler never writes them back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Item identifier.
    pub id: String,
    /// `[west, south, east, north]`, optionally with elevation, in WGS84.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    /// Parent collection identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Item footprint geometry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<geojson::Geometry>,
    /// Named data references attached to this item.
    #[serde(default)]
    pub assets: BTreeMap<String, Asset>,
    /// Any other item fields (`properties`, `links`, `stac_version`, ...).
    #[serde(flatten)]
    pub extra_fields: Map<String, Value>,
}

impl Item {
    /// The 2D bounds of this item, dropping elevation from 3D bboxes.
    #[must_use]
    pub fn bounds(&self) -> Option<[f64; 4]> {
        match self.bbox.as_deref() {
            Some([w, s, e, n]) => Some([*w, *s, *e, *n]),
            Some([w, s, _, e, n, _]) => Some([*w, *s, *e, *n]),
            _ => None,
        }
    }

    /// Asset names in their stored order.
    #[must_use]
    pub fn asset_names(&self) -> Vec<&str> {
        self.assets.keys().map(String::as_str).collect()
    }
}

/// A single named file/data reference of an [`Item`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Location of the asset data.
    pub href: String,
    /// Declared media type, e.g. `image/tiff; application=geotiff`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Alternate locations keyed by alternate name (`alternate-assets` extension).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate: Option<BTreeMap<String, AlternateAsset>>,
    /// Header size hint from the `file` extension, in bytes.
    #[serde(
        rename = "file:header_size",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub header_size: Option<u64>,
    /// Per-band descriptions from the `raster` extension.
    #[serde(
        rename = "raster:bands",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub raster_bands: Option<Vec<RasterBand>>,
    /// Any other asset fields; these become descriptor metadata.
    #[serde(flatten)]
    pub extra_fields: Map<String, Value>,
}

/// An alternate location entry of the `alternate-assets` extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternateAsset {
    /// Location of the alternate copy.
    pub href: String,
    /// Any other fields of the alternate entry.
    #[serde(flatten)]
    pub extra_fields: Map<String, Value>,
}

/// One band description of the `raster` extension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RasterBand {
    /// Declared band statistics, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<BandStatistics>,
    /// Any other band fields (data type, nodata, unit, ...).
    #[serde(flatten)]
    pub extra_fields: Map<String, Value>,
}

/// Declared statistics of a single band.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandStatistics {
    /// Smallest declared value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    /// Largest declared value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    /// Any other statistics fields (mean, stddev, ...).
    #[serde(flatten)]
    pub extra_fields: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample_item() -> Item {
        serde_json::from_value(json!({
            "type": "Feature",
            "stac_version": "1.0.0",
            "id": "scene-001",
            "collection": "naip",
            "bbox": [-121.349, 41.963, -121.343, 41.972],
            "geometry": {
                "type": "Polygon",
                "coordinates": [[
                    [-121.349, 41.963], [-121.343, 41.963], [-121.343, 41.972],
                    [-121.349, 41.972], [-121.349, 41.963]
                ]]
            },
            "assets": {
                "cog": {
                    "href": "https://example.com/scene-001/cog.tif",
                    "type": "image/tiff; application=geotiff",
                    "file:header_size": 16384,
                    "raster:bands": [
                        {"statistics": {"minimum": 0.0, "maximum": 255.0}}
                    ],
                    "alternate": {
                        "s3": {"href": "s3://bucket/scene-001/cog.tif"}
                    }
                }
            }
        }))
        .expect("sample item should deserialize")
    }

    #[test]
    fn item_roundtrips_with_extra_fields() {
        let item = sample_item();
        assert_eq!(item.id, "scene-001");
        assert_eq!(item.collection.as_deref(), Some("naip"));
        assert_eq!(item.extra_fields["stac_version"], "1.0.0");

        let value = serde_json::to_value(&item).expect("item should serialize");
        let back: Item = serde_json::from_value(value).expect("item should deserialize");
        assert_eq!(back, item);
    }

    #[test]
    fn bounds_drop_elevation() {
        let mut item = sample_item();
        assert_eq!(
            item.bounds(),
            Some([-121.349, 41.963, -121.343, 41.972])
        );

        item.bbox = Some(vec![-121.349, 41.963, 0.0, -121.343, 41.972, 100.0]);
        assert_eq!(
            item.bounds(),
            Some([-121.349, 41.963, -121.343, 41.972])
        );

        item.bbox = Some(vec![1.0, 2.0]);
        assert_eq!(item.bounds(), None);
    }

    #[test]
    fn asset_extension_fields_are_typed() {
        let item = sample_item();
        let cog = &item.assets["cog"];
        assert_eq!(cog.header_size, Some(16384));
        let bands = cog.raster_bands.as_ref().expect("raster:bands");
        let stats = bands[0].statistics.as_ref().expect("statistics");
        assert_eq!(stats.minimum, Some(0.0));
        assert_eq!(stats.maximum, Some(255.0));
        assert_eq!(
            cog.alternate.as_ref().expect("alternate")["s3"].href,
            "s3://bucket/scene-001/cog.tif"
        );
    }
}
