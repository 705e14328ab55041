//! Service configuration for the tile pipeline.
//!
//! Supplied as a plain structured object by the embedding service; this
//! crate performs no file loading or environment lookup.

use std::collections::HashMap;

use serde::Deserialize;

pub const DEFAULT_FEATURE_LIMIT: u64 = 100_000;
pub const DEFAULT_MAX_PER_KIND: u32 = 10_000;

/// An inclusive zoom-level range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MinMax {
    pub min: u8,
    pub max: u8,
}

/// A declarative value transformation for one property, applied in
/// configuration order during attribute encoding.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyTransformation {
    /// Drop the property from every feature.
    Remove,
    /// Render the value into a template; `{{value}}` is replaced by the
    /// stringified input.
    StringFormat { format: String },
}

impl MinMax {
    pub fn contains(&self, level: u8) -> bool {
        (self.min..=self.max).contains(&level)
    }
}

/// Recognized tile options.
///
/// All fields are optional; absent values fall back to the documented
/// defaults at the point of use.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TilesConfiguration {
    /// Upper bound on features fetched per collection query.
    pub limit: Option<u64>,
    pub max_points_per_tile: Option<u32>,
    pub max_lines_per_tile: Option<u32>,
    pub max_polygons_per_tile: Option<u32>,
    /// Zoom levels a tile may be requested at, per matrix set.
    pub zoom_levels: HashMap<String, MinMax>,
    /// Zoom levels whose tiles go to the persistent store.
    pub zoom_levels_cache: HashMap<String, MinMax>,
    /// Zoom levels pre-generated at startup, per matrix set.
    pub seeding: HashMap<String, MinMax>,
    /// Keep degenerate geometries instead of dropping them.
    pub ignore_invalid_geometries: bool,
    /// Per-property value transformation chains.
    pub transformations: HashMap<String, Vec<PropertyTransformation>>,
}

impl TilesConfiguration {
    pub fn feature_limit(&self) -> u64 {
        self.limit.unwrap_or(DEFAULT_FEATURE_LIMIT)
    }

    /// Whether `level` is inside the configured request bounds for the
    /// matrix set; unconfigured sets accept every level of the grid.
    pub fn level_allowed(&self, matrix_set: &str, level: u8) -> bool {
        self.zoom_levels
            .get(matrix_set)
            .map(|range| range.contains(level))
            .unwrap_or(true)
    }

    /// Whether a generated tile at `level` belongs in the persistent store.
    pub fn level_cached(&self, matrix_set: &str, level: u8) -> bool {
        self.zoom_levels_cache
            .get(matrix_set)
            .map(|range| range.contains(level))
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_camel_case() {
        let config: TilesConfiguration = serde_json::from_str(
            r#"{
                "limit": 5000,
                "maxPolygonsPerTile": 400,
                "zoomLevels": { "WebMercatorQuad": { "min": 4, "max": 14 } },
                "seeding": { "WebMercatorQuad": { "min": 4, "max": 8 } }
            }"#,
        )
        .unwrap();

        assert_eq!(config.limit, Some(5000));
        assert_eq!(config.max_polygons_per_tile, Some(400));
        assert_eq!(config.max_points_per_tile, None);
        assert!(config.level_allowed("WebMercatorQuad", 4));
        assert!(!config.level_allowed("WebMercatorQuad", 15));
        assert!(config.level_allowed("OtherGrid", 20));
    }

    #[test]
    fn deserializes_transformation_chains() {
        let config: TilesConfiguration = serde_json::from_str(
            r#"{
                "transformations": {
                    "internal_id": [ "remove" ],
                    "speed": [ { "stringFormat": { "format": "{{value}} km/h" } } ]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.transformations["internal_id"],
            vec![PropertyTransformation::Remove]
        );
        assert_eq!(
            config.transformations["speed"],
            vec![PropertyTransformation::StringFormat {
                format: "{{value}} km/h".into()
            }]
        );
    }

    #[test]
    fn defaults_are_permissive() {
        let config = TilesConfiguration::default();

        assert_eq!(config.feature_limit(), DEFAULT_FEATURE_LIMIT);
        assert!(config.level_allowed("WebMercatorQuad", 24));
        assert!(config.level_cached("WebMercatorQuad", 24));
    }
}
