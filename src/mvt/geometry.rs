//! Command-stream geometry encoding.
//!
//! MVT geometries are a flat `Vec<u32>` of commands (MoveTo, LineTo,
//! ClosePath) with zigzag-encoded coordinate deltas. The cursor carries over
//! between paths of the same feature, so multi-part geometries stay compact.

use geo::algorithm::orient::{Direction, Orient};
use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Polygon};

use super::proto::GeomType;

const CMD_MOVE_TO: u32 = 1;
const CMD_LINE_TO: u32 = 2;
const CMD_CLOSE_PATH: u32 = 7;

fn command(id: u32, count: u32) -> u32 {
    (id & 0x7) | (count << 3)
}

fn zigzag(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Stateful builder for one feature's command stream.
///
/// The cursor (previous position) persists across `add_*` calls; this is the
/// delta baseline the format requires for multi-part geometries.
#[derive(Default)]
pub struct GeometryEncoder {
    buf: Vec<u32>,
    cursor: Coord<i32>,
}

impl GeometryEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_commands(self) -> Vec<u32> {
        self.buf
    }

    fn push_delta(&mut self, to: Coord<i32>) {
        self.buf.extend([
            zigzag(to.x - self.cursor.x),
            zigzag(to.y - self.cursor.y),
        ]);
        self.cursor = to;
    }

    /// One MoveTo with the full point count; empty input is a no-op.
    pub fn add_points<I>(&mut self, points: I)
    where
        I: IntoIterator<Item = Coord<i32>>,
    {
        let header = self.buf.len();
        self.buf.push(command(CMD_MOVE_TO, 0));

        let mut count = 0;
        for point in points {
            self.push_delta(point);
            count += 1;
        }

        if count == 0 {
            self.buf.truncate(header);
        } else {
            self.buf[header] = command(CMD_MOVE_TO, count);
        }
    }

    /// MoveTo + LineTo run. Zero-length segments are elided; a path that
    /// collapses below two distinct vertices is dropped entirely.
    pub fn add_linestring<I>(&mut self, line: I)
    where
        I: IntoIterator<Item = Coord<i32>>,
    {
        self.add_path(line, false);
    }

    /// MoveTo + LineTo run + ClosePath. The caller passes the ring without
    /// its closing vertex; rings that collapse below three distinct
    /// vertices are dropped.
    pub fn add_ring<I>(&mut self, ring: I)
    where
        I: IntoIterator<Item = Coord<i32>>,
    {
        self.add_path(ring, true);
    }

    fn add_path<I>(&mut self, path: I, close: bool)
    where
        I: IntoIterator<Item = Coord<i32>>,
    {
        let header = self.buf.len();
        let restore = self.cursor;

        let mut iter = path.into_iter();
        let Some(first) = iter.next() else {
            return;
        };

        self.buf.push(command(CMD_MOVE_TO, 1));
        self.push_delta(first);

        let lineto_header = self.buf.len();
        self.buf.push(command(CMD_LINE_TO, 0));

        let mut count = 0;
        for vertex in iter {
            // Collapsed segments happen frequently after rounding to the
            // integer grid at low zooms.
            if vertex == self.cursor {
                continue;
            }
            self.push_delta(vertex);
            count += 1;
        }

        let min_segments = if close { 2 } else { 1 };
        if count < min_segments {
            self.buf.truncate(header);
            self.cursor = restore;
            return;
        }

        self.buf[lineto_header] = command(CMD_LINE_TO, count);
        if close {
            self.buf.push(command(CMD_CLOSE_PATH, 1));
        }
    }
}

fn rounded(coords: &LineString<f64>) -> impl Iterator<Item = Coord<i32>> + '_ {
    coords.coords().map(|c| Coord {
        x: c.x.round() as i32,
        y: c.y.round() as i32,
    })
}

fn ring_vertices(ring: &LineString<f64>) -> Vec<Coord<i32>> {
    let mut vertices: Vec<Coord<i32>> = rounded(ring).collect();
    if vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    vertices
}

fn encode_polygon(encoder: &mut GeometryEncoder, polygon: &Polygon<f64>) {
    // Tile space is y-down, so OGC orientation (exterior CCW on the raw
    // numbers) renders clockwise on screen, which is what the format's
    // surveyor-formula winding rule expects.
    let oriented = polygon.orient(Direction::Default);
    encoder.add_ring(ring_vertices(oriented.exterior()));
    for interior in oriented.interiors() {
        encoder.add_ring(ring_vertices(interior));
    }
}

/// Encodes a tile-space geometry into `(GeomType, commands)`.
///
/// Coordinates are rounded to the integer pixel grid. Returns `None` when
/// every part collapses under rounding.
pub fn encode(geometry: &Geometry<f64>) -> Option<(GeomType, Vec<u32>)> {
    let mut encoder = GeometryEncoder::new();

    let kind = match geometry {
        Geometry::Point(point) => {
            encoder.add_points([Coord {
                x: point.x().round() as i32,
                y: point.y().round() as i32,
            }]);
            GeomType::Point
        }
        Geometry::MultiPoint(MultiPoint(points)) => {
            encoder.add_points(points.iter().map(|p| Coord {
                x: p.x().round() as i32,
                y: p.y().round() as i32,
            }));
            GeomType::Point
        }
        Geometry::LineString(line) => {
            encoder.add_linestring(rounded(line));
            GeomType::Linestring
        }
        Geometry::MultiLineString(MultiLineString(lines)) => {
            for line in lines {
                encoder.add_linestring(rounded(line));
            }
            GeomType::Linestring
        }
        Geometry::Polygon(polygon) => {
            encode_polygon(&mut encoder, polygon);
            GeomType::Polygon
        }
        Geometry::MultiPolygon(MultiPolygon(polygons)) => {
            for polygon in polygons {
                encode_polygon(&mut encoder, polygon);
            }
            GeomType::Polygon
        }
        Geometry::Rect(rect) => {
            encode_polygon(&mut encoder, &rect.to_polygon());
            GeomType::Polygon
        }
        Geometry::Triangle(triangle) => {
            encode_polygon(&mut encoder, &triangle.to_polygon());
            GeomType::Polygon
        }
        Geometry::Line(line) => {
            encoder.add_linestring([line.start, line.end].map(|c| Coord {
                x: c.x.round() as i32,
                y: c.y.round() as i32,
            }));
            GeomType::Linestring
        }
        Geometry::GeometryCollection(_) => return None,
    };

    let commands = encoder.into_commands();
    if commands.is_empty() {
        return None;
    }

    Some((kind, commands))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::wkt;

    #[test]
    fn single_point_commands() {
        let (kind, commands) = encode(&Geometry::Point(wkt! { POINT(25.0 17.0) })).unwrap();

        assert_eq!(kind, GeomType::Point);
        // Worked example from the format specification.
        assert_eq!(commands, vec![9, 50, 34]);
    }

    #[test]
    fn linestring_commands() {
        let line = wkt! { LINESTRING(2.0 2.0,2.0 10.0,10.0 10.0) };
        let (kind, commands) = encode(&Geometry::LineString(line)).unwrap();

        assert_eq!(kind, GeomType::Linestring);
        assert_eq!(commands, vec![9, 4, 4, 18, 0, 16, 16, 0]);
    }

    #[test]
    fn polygon_closes_ring() {
        let polygon = wkt! { POLYGON((3.0 6.0,8.0 12.0,20.0 34.0,3.0 6.0)) };
        let (kind, commands) = encode(&Geometry::Polygon(polygon)).unwrap();

        assert_eq!(kind, GeomType::Polygon);
        assert_eq!(*commands.last().unwrap(), 15);
        // MoveTo(1) header, then a LineTo pair count of 2.
        assert_eq!(commands[0], 9);
        assert_eq!(commands[3], command(CMD_LINE_TO, 2));
    }

    #[test]
    fn zero_length_segments_elided() {
        let line = wkt! { LINESTRING(0.0 0.0,0.2 0.1,5.0 0.0) };
        let (_, commands) = encode(&Geometry::LineString(line)).unwrap();

        // The middle vertex rounds onto the first and disappears.
        assert_eq!(commands, vec![9, 0, 0, 10, 10, 0]);
    }

    #[test]
    fn degenerate_line_dropped() {
        let line = wkt! { LINESTRING(1.0 1.0,1.1 1.2) };
        assert!(encode(&Geometry::LineString(line)).is_none());
    }

    #[test]
    fn degenerate_ring_dropped() {
        let polygon = wkt! { POLYGON((0.0 0.0,0.1 0.0,0.1 0.1,0.0 0.0)) };
        assert!(encode(&Geometry::Polygon(polygon)).is_none());
    }

    #[test]
    fn multipoint_single_moveto() {
        let points = wkt! { MULTIPOINT(5.0 7.0,3.0 2.0) };
        let (_, commands) = encode(&Geometry::MultiPoint(points)).unwrap();

        assert_eq!(commands, vec![17, 10, 14, 3, 9]);
    }

    #[test]
    fn cursor_carries_between_parts() {
        let lines = wkt! { MULTILINESTRING((0.0 0.0,4.0 0.0),(4.0 4.0,8.0 4.0)) };
        let (_, commands) = encode(&Geometry::MultiLineString(lines)).unwrap();

        // Second MoveTo is relative to (4,0), not to the origin.
        assert_eq!(
            commands,
            vec![9, 0, 0, 10, 8, 0, 9, 0, 8, 10, 8, 0]
        );
    }

    #[test]
    fn exterior_ring_rewound_for_screen_space() {
        // Visually counter-clockwise exterior (in y-down space) must be
        // re-wound before encoding.
        let polygon = wkt! { POLYGON((0.0 0.0,0.0 10.0,10.0 10.0,10.0 0.0,0.0 0.0)) };
        let (_, commands) = encode(&Geometry::Polygon(polygon.clone())).unwrap();

        let rewound = wkt! { POLYGON((0.0 0.0,10.0 0.0,10.0 10.0,0.0 10.0,0.0 0.0)) };
        let (_, expected) = encode(&Geometry::Polygon(rewound)).unwrap();
        assert_eq!(commands, expected);
    }
}
