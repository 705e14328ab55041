//! Per-feature geometry processing: transform, simplify, clip, filter.
//!
//! The steps run in a fixed order. Simplifying before clipping avoids
//! clip artifacts from micro-segments; the small-feature filters run last
//! so they see true on-tile size.

use geo::{
    AffineOps, AffineTransform, Area, BoundingRect, Coord, Distance, Euclidean, Geometry,
    LineString, MultiLineString, MultiPoint, MultiPolygon, Polygon, Rect, SimplifyVwPreserve,
};
use log::{debug, warn};
use wkt::{ToWkt, TryFromWkt};

use crate::mvt::MVT_EXTENT;

pub const DEFAULT_SIMPLIFY_TOLERANCE: f64 = 0.1;
pub const DEFAULT_CLIP_BUFFER: f64 = 8.0;

/// Features smaller than one tile pixel (squared for areas) carry no
/// visual information and are dropped.
pub const MIN_POLYGON_AREA: f64 = 1.0;
pub const MIN_LINE_LENGTH: f64 = 1.0;

/// Geometry kind after processing; drives the per-kind feature caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    Point,
    Line,
    Polygon,
}

impl GeometryKind {
    pub fn of(geometry: &Geometry<f64>) -> Option<GeometryKind> {
        match geometry {
            Geometry::Point(_) | Geometry::MultiPoint(_) => Some(GeometryKind::Point),
            Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
                Some(GeometryKind::Line)
            }
            Geometry::Polygon(_)
            | Geometry::MultiPolygon(_)
            | Geometry::Rect(_)
            | Geometry::Triangle(_) => Some(GeometryKind::Polygon),
            Geometry::GeometryCollection(_) => None,
        }
    }
}

/// Clips and filters one feature's geometry into tile-pixel space.
pub struct GeometryProcessor {
    transform: AffineTransform<f64>,
    extent: u32,
    tolerance: f64,
    buffer: f64,
    keep_degenerate: bool,
}

impl GeometryProcessor {
    pub fn new(transform: AffineTransform<f64>) -> Self {
        Self {
            transform,
            extent: MVT_EXTENT,
            tolerance: DEFAULT_SIMPLIFY_TOLERANCE,
            buffer: DEFAULT_CLIP_BUFFER,
            keep_degenerate: false,
        }
    }

    pub fn with_extent(mut self, extent: u32) -> Self {
        self.extent = extent;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_buffer(mut self, buffer: f64) -> Self {
        self.buffer = buffer;
        self
    }

    /// Keep degenerate (sub-pixel) geometries instead of dropping them.
    pub fn keep_degenerate(mut self, keep: bool) -> Self {
        self.keep_degenerate = keep;
        self
    }

    /// Runs the full chain. `None` means the feature has no geometry left
    /// on this tile and is dropped before encoding.
    pub fn process(&self, geometry: &Geometry<f64>) -> Option<Geometry<f64>> {
        let transformed = geometry.affine_transform(&self.transform);
        let simplified = simplify(transformed, self.tolerance);
        let clipped = self.clip(&simplified)?;

        if self.keep_degenerate {
            Some(clipped)
        } else {
            filter_small(clipped)
        }
    }

    fn window(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: -self.buffer,
                y: -self.buffer,
            },
            Coord {
                x: self.extent as f64 + self.buffer,
                y: self.extent as f64 + self.buffer,
            },
        )
    }

    /// Clip to the buffered tile window.
    ///
    /// Three tiers: the direct intersection; on an erroneously empty
    /// result, the same intersection against a geometry re-derived through
    /// its WKT representation; finally the un-clipped geometry. The WKT
    /// round-trip shakes out coordinate noise that makes the boolean
    /// kernel miss a genuine overlap.
    fn clip(&self, geometry: &Geometry<f64>) -> Option<Geometry<f64>> {
        let window = self.window();
        let bbox = geometry.bounding_rect()?;

        if !overlaps(&bbox, &window) {
            return None;
        }

        if contains(&window, &bbox) {
            return Some(geometry.clone());
        }

        clip_direct(geometry, &window)
            .or_else(|| clip_via_wkt(geometry, &window))
            .or_else(|| {
                warn!(
                    "clip fallback exhausted for geometry overlapping the tile, keeping unclipped"
                );
                Some(geometry.clone())
            })
    }
}

fn overlaps(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.max().x >= b.min().x && a.min().x <= b.max().x && a.max().y >= b.min().y && a.min().y <= b.max().y
}

fn contains(outer: &Rect<f64>, inner: &Rect<f64>) -> bool {
    inner.min().x >= outer.min().x
        && inner.max().x <= outer.max().x
        && inner.min().y >= outer.min().y
        && inner.max().y <= outer.max().y
}

fn simplify(geometry: Geometry<f64>, tolerance: f64) -> Geometry<f64> {
    match geometry {
        Geometry::LineString(ls) => Geometry::LineString(ls.simplify_vw_preserve(&tolerance)),
        Geometry::MultiLineString(mls) => {
            Geometry::MultiLineString(mls.simplify_vw_preserve(&tolerance))
        }
        Geometry::Polygon(poly) => Geometry::Polygon(poly.simplify_vw_preserve(&tolerance)),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(mp.simplify_vw_preserve(&tolerance)),
        other => other,
    }
}

/// First tier: boolean intersection with the window.
pub(crate) fn clip_direct(geometry: &Geometry<f64>, window: &Rect<f64>) -> Option<Geometry<f64>> {
    use geo::BooleanOps;

    let window_poly = window.to_polygon();

    match geometry {
        Geometry::Point(point) => {
            let c = Coord::from(*point);
            (window.min().x <= c.x
                && c.x <= window.max().x
                && window.min().y <= c.y
                && c.y <= window.max().y)
                .then(|| Geometry::Point(*point))
        }
        Geometry::MultiPoint(MultiPoint(points)) => {
            let inside: Vec<_> = points
                .iter()
                .filter(|p| {
                    window.min().x <= p.x()
                        && p.x() <= window.max().x
                        && window.min().y <= p.y()
                        && p.y() <= window.max().y
                })
                .copied()
                .collect();

            (!inside.is_empty()).then(|| Geometry::MultiPoint(MultiPoint(inside)))
        }
        Geometry::LineString(ls) => {
            clip_lines(&MultiLineString(vec![ls.clone()]), &window_poly)
        }
        Geometry::MultiLineString(mls) => clip_lines(mls, &window_poly),
        Geometry::Line(line) => clip_lines(
            &MultiLineString(vec![LineString::from(*line)]),
            &window_poly,
        ),
        Geometry::Polygon(poly) => clip_polygons(&poly.intersection(&window_poly)),
        Geometry::MultiPolygon(mp) => clip_polygons(&mp.intersection(&window_poly)),
        Geometry::Rect(rect) => clip_polygons(&rect.to_polygon().intersection(&window_poly)),
        Geometry::Triangle(tri) => clip_polygons(&tri.to_polygon().intersection(&window_poly)),
        Geometry::GeometryCollection(_) => None,
    }
}

fn clip_lines(lines: &MultiLineString<f64>, window: &Polygon<f64>) -> Option<Geometry<f64>> {
    use geo::BooleanOps;

    let mut clipped = window.clip(lines, false);
    clipped.0.retain(|ls| ls.0.len() > 1);

    match clipped.0.len() {
        0 => None,
        1 => Some(Geometry::LineString(clipped.0.remove(0))),
        _ => Some(Geometry::MultiLineString(clipped)),
    }
}

fn clip_polygons(clipped: &MultiPolygon<f64>) -> Option<Geometry<f64>> {
    match clipped.0.len() {
        0 => None,
        1 => Some(Geometry::Polygon(clipped.0[0].clone())),
        _ => Some(Geometry::MultiPolygon(clipped.clone())),
    }
}

/// Second tier: re-derive the geometry through its WKT representation and
/// intersect again.
pub(crate) fn clip_via_wkt(geometry: &Geometry<f64>, window: &Rect<f64>) -> Option<Geometry<f64>> {
    let text = geometry.wkt_string();
    let rederived = match Geometry::<f64>::try_from_wkt_str(&text) {
        Ok(geometry) => geometry,
        Err(e) => {
            debug!("wkt re-derivation failed: {}", e);
            return None;
        }
    };

    clip_direct(&rederived, window)
}

fn line_length(ls: &LineString<f64>) -> f64 {
    ls.lines()
        .map(|l| Euclidean.distance(l.start_point(), l.end_point()))
        .sum()
}

fn ring_area(ring: &LineString<f64>) -> f64 {
    Polygon::new(ring.clone(), vec![]).unsigned_area()
}

fn filter_polygon(polygon: Polygon<f64>) -> Option<Polygon<f64>> {
    if polygon.unsigned_area() <= MIN_POLYGON_AREA {
        return None;
    }

    let (exterior, interiors) = polygon.into_inner();
    let interiors = interiors
        .into_iter()
        .filter(|hole| ring_area(hole) > MIN_POLYGON_AREA)
        .collect();

    Some(Polygon::new(exterior, interiors))
}

/// Kind-specific small-feature filters on post-clip geometry.
fn filter_small(geometry: Geometry<f64>) -> Option<Geometry<f64>> {
    match geometry {
        Geometry::Polygon(poly) => filter_polygon(poly).map(Geometry::Polygon),
        Geometry::MultiPolygon(MultiPolygon(polygons)) => {
            let surviving: Vec<_> = polygons.into_iter().filter_map(filter_polygon).collect();
            match surviving.len() {
                0 => None,
                1 => Some(Geometry::Polygon(surviving.into_iter().next().unwrap())),
                _ => Some(Geometry::MultiPolygon(MultiPolygon(surviving))),
            }
        }
        Geometry::LineString(ls) => {
            (line_length(&ls) > MIN_LINE_LENGTH).then(|| Geometry::LineString(ls))
        }
        Geometry::MultiLineString(mls) => {
            let total: f64 = mls.0.iter().map(line_length).sum();
            (total > MIN_LINE_LENGTH).then(|| Geometry::MultiLineString(mls))
        }
        // Points are never dropped by size.
        other => Some(other),
    }
}
