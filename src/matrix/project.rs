//! Grid arithmetic: tile address to native bounding box, bounds
//! validation, and the native-to-tile-pixel affine transform.

use std::collections::HashMap;
use std::f64::consts::PI;

use geo::{AffineTransform, Coord, Rect};

use super::error::MatrixError;
use super::set::{TileMatrixSet, CRS84, EPSG_3857};

/// Checks level, row and column against the matrix set's domain.
pub fn validate(set: &TileMatrixSet, level: u8, row: u64, col: u64) -> Result<(), MatrixError> {
    let matrix = set.matrix(level)?;

    if row >= matrix.matrix_height || col >= matrix.matrix_width {
        return Err(MatrixError::OutOfRange(format!(
            "tile {}/{}/{} outside {}x{} matrix of {}",
            level,
            row,
            col,
            matrix.matrix_height,
            matrix.matrix_width,
            set.id()
        )));
    }

    Ok(())
}

/// Native-CRS bounding box of a tile, closed-form from the grid origin and
/// per-level resolution. The grid origin is the top-left corner of the
/// set's bounding box; rows grow southward.
pub fn bounding_box(
    set: &TileMatrixSet,
    level: u8,
    row: u64,
    col: u64,
) -> Result<Rect<f64>, MatrixError> {
    validate(set, level, row, col)?;

    let matrix = set.matrix(level)?;
    let bbox = set.bbox();

    let span_x = bbox.width() / matrix.matrix_width as f64;
    let span_y = bbox.height() / matrix.matrix_height as f64;

    let min_x = bbox.min().x + col as f64 * span_x;
    let max_y = bbox.max().y - row as f64 * span_y;

    Ok(Rect::new(
        Coord {
            x: min_x,
            y: max_y - span_y,
        },
        Coord {
            x: min_x + span_x,
            y: max_y,
        },
    ))
}

/// Affine transform from native coordinates to tile-local pixel space.
///
/// The x-scale is `extent / width`; the y-axis is flipped because tile
/// space has its origin at the top-left while the native CRS grows
/// northward.
pub fn native_to_tile(bbox: Rect<f64>, extent: u32) -> AffineTransform<f64> {
    let sx = extent as f64 / bbox.width();
    let sy = extent as f64 / bbox.height();

    AffineTransform::new(sx, 0.0, -bbox.min().x * sx, 0.0, -sy, bbox.max().y * sy)
}

/// A coordinate-system transform for bounding boxes.
pub trait CrsTransform: Send + Sync {
    fn transform_bbox(&self, bbox: Rect<f64>) -> Rect<f64>;
}

/// Spherical-Mercator to geographic (longitude/latitude) unprojection.
pub struct MercatorToGeographic;

impl CrsTransform for MercatorToGeographic {
    fn transform_bbox(&self, bbox: Rect<f64>) -> Rect<f64> {
        let unproject = |c: Coord<f64>| Coord {
            x: (c.x / 6378137.0).to_degrees(),
            y: (2.0 * (c.y / 6378137.0).exp().atan() - PI / 2.0).to_degrees(),
        };

        Rect::new(unproject(bbox.min()), unproject(bbox.max()))
    }
}

/// Table of available CRS transforms, keyed by (source, target).
pub struct TransformerRegistry {
    transformers: HashMap<(String, String), Box<dyn CrsTransform>>,
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl TransformerRegistry {
    pub fn empty() -> Self {
        Self {
            transformers: HashMap::new(),
        }
    }

    /// The registry shipped by default: Web-Mercator to CRS84.
    pub fn standard() -> Self {
        Self::empty().with(EPSG_3857, CRS84, MercatorToGeographic)
    }

    pub fn with(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        transform: impl CrsTransform + 'static,
    ) -> Self {
        self.transformers
            .insert((source.into(), target.into()), Box::new(transform));
        self
    }

    pub fn get(&self, source: &str, target: &str) -> Option<&dyn CrsTransform> {
        self.transformers
            .get(&(source.to_string(), target.to_string()))
            .map(|t| t.as_ref())
    }
}

/// Tile bounding box reprojected to `target_crs`.
///
/// When no transformer is registered between the native and target CRS the
/// native box is returned unchanged. That is the documented fallback, not
/// an error.
pub fn reprojected_bounding_box(
    set: &TileMatrixSet,
    level: u8,
    row: u64,
    col: u64,
    target_crs: &str,
    transformers: &TransformerRegistry,
) -> Result<Rect<f64>, MatrixError> {
    let bbox = bounding_box(set, level, row, col)?;

    if set.crs() == target_crs {
        return Ok(bbox);
    }

    Ok(transformers
        .get(set.crs(), target_crs)
        .map(|t| t.transform_bbox(bbox))
        .unwrap_or(bbox))
}
