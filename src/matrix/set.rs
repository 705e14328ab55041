//! Tile matrix set definitions and the registry handed to the pipeline.

use std::collections::HashMap;

use geo::{Coord, Rect};

use super::error::MatrixError;

/// Half the circumference of the WGS84 ellipsoid's authalic sphere, the
/// native extent of the Web-Mercator grid.
pub const WEB_MERCATOR_EXTENT: f64 = 20037508.342789244;

pub const WEB_MERCATOR_QUAD: &str = "WebMercatorQuad";
pub const EPSG_3857: &str = "EPSG:3857";
pub const CRS84: &str = "OGC:CRS84";

/// One zoom level of a matrix set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileMatrix {
    pub level: u8,
    pub matrix_width: u64,
    pub matrix_height: u64,
    pub tile_px: u32,
}

/// A named multi-resolution grid: per-level matrix dimensions over a fixed
/// native bounding box.
///
/// ```rust,ignore
/// use tessella::matrix::TileMatrixSet;
/// let quad = TileMatrixSet::web_mercator_quad();
/// assert_eq!(quad.matrix(3).unwrap().matrix_width, 8);
/// ```
#[derive(Debug, Clone)]
pub struct TileMatrixSet {
    id: String,
    crs: String,
    bbox: Rect<f64>,
    matrices: Vec<TileMatrix>,
}

impl TileMatrixSet {
    pub fn new(
        id: impl Into<String>,
        crs: impl Into<String>,
        bbox: Rect<f64>,
        matrices: Vec<TileMatrix>,
    ) -> Self {
        Self {
            id: id.into(),
            crs: crs.into(),
            bbox,
            matrices,
        }
    }

    /// The standard WebMercatorQuad quad-tree, levels 0 through 24.
    pub fn web_mercator_quad() -> Self {
        let matrices = (0..=24)
            .map(|level| TileMatrix {
                level,
                matrix_width: 1 << level,
                matrix_height: 1 << level,
                tile_px: 256,
            })
            .collect();

        Self::new(
            WEB_MERCATOR_QUAD,
            EPSG_3857,
            Rect::new(
                Coord {
                    x: -WEB_MERCATOR_EXTENT,
                    y: -WEB_MERCATOR_EXTENT,
                },
                Coord {
                    x: WEB_MERCATOR_EXTENT,
                    y: WEB_MERCATOR_EXTENT,
                },
            ),
            matrices,
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn crs(&self) -> &str {
        &self.crs
    }

    pub fn bbox(&self) -> Rect<f64> {
        self.bbox
    }

    pub fn min_level(&self) -> u8 {
        self.matrices.first().map(|m| m.level).unwrap_or_default()
    }

    pub fn max_level(&self) -> u8 {
        self.matrices.last().map(|m| m.level).unwrap_or_default()
    }

    pub fn matrix(&self, level: u8) -> Result<&TileMatrix, MatrixError> {
        self.matrices
            .iter()
            .find(|m| m.level == level)
            .ok_or_else(|| {
                MatrixError::OutOfRange(format!(
                    "level {} outside [{}, {}] of {}",
                    level,
                    self.min_level(),
                    self.max_level(),
                    self.id
                ))
            })
    }
}

/// Explicit table of matrix set definitions, passed at construction time.
#[derive(Debug, Default, Clone)]
pub struct MatrixSetRegistry {
    sets: HashMap<String, TileMatrixSet>,
}

impl MatrixSetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding only the WebMercatorQuad grid, the default for
    /// services that never declare a custom grid.
    pub fn standard() -> Self {
        Self::new().with(TileMatrixSet::web_mercator_quad())
    }

    pub fn with(mut self, set: TileMatrixSet) -> Self {
        self.sets.insert(set.id().to_string(), set);
        self
    }

    pub fn get(&self, id: &str) -> Result<&TileMatrixSet, MatrixError> {
        self.sets
            .get(id)
            .ok_or_else(|| MatrixError::UnknownMatrixSet(id.to_string()))
    }
}
