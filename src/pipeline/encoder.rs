//! Single-layer tile encoding: drives a feature stream through the
//! geometry processor and attribute encoder into an accumulated layer.

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, trace};

use crate::config::{TilesConfiguration, DEFAULT_MAX_PER_KIND};
use crate::datasource::FeatureStream;
use crate::mvt::{self, LayerBuilder, Tile};

use super::attribute::AttributeEncoder;
use super::error::EncodeError;
use super::geometry::{GeometryKind, GeometryProcessor};

/// Per-kind feature caps for one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureLimits {
    pub max_points: u32,
    pub max_lines: u32,
    pub max_polygons: u32,
}

impl Default for FeatureLimits {
    fn default() -> Self {
        Self {
            max_points: DEFAULT_MAX_PER_KIND,
            max_lines: DEFAULT_MAX_PER_KIND,
            max_polygons: DEFAULT_MAX_PER_KIND,
        }
    }
}

impl From<&TilesConfiguration> for FeatureLimits {
    fn from(config: &TilesConfiguration) -> Self {
        Self {
            max_points: config.max_points_per_tile.unwrap_or(DEFAULT_MAX_PER_KIND),
            max_lines: config.max_lines_per_tile.unwrap_or(DEFAULT_MAX_PER_KIND),
            max_polygons: config.max_polygons_per_tile.unwrap_or(DEFAULT_MAX_PER_KIND),
        }
    }
}

/// Per-call counters enforcing [`FeatureLimits`] in stream order: the
/// first N of a kind survive, the rest are dropped.
struct KindBudget {
    limits: FeatureLimits,
    points: u32,
    lines: u32,
    polygons: u32,
}

impl KindBudget {
    fn new(limits: FeatureLimits) -> Self {
        Self {
            limits,
            points: 0,
            lines: 0,
            polygons: 0,
        }
    }

    fn admit(&mut self, kind: GeometryKind) -> bool {
        let (count, limit) = match kind {
            GeometryKind::Point => (&mut self.points, self.limits.max_points),
            GeometryKind::Line => (&mut self.lines, self.limits.max_lines),
            GeometryKind::Polygon => (&mut self.polygons, self.limits.max_polygons),
        };

        if *count >= limit {
            return false;
        }

        *count += 1;
        true
    }
}

/// An encoded tile payload. `complete` is false when one or more expected
/// layers could not be obtained within the combiner's retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTile {
    pub bytes: Bytes,
    pub complete: bool,
}

impl EncodedTile {
    pub fn complete(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            complete: true,
        }
    }
}

/// The capability a wire codec presents to the pipeline; keyed by media
/// type in an explicit table rather than discovered at runtime.
pub trait LayerEncoder: Send + Sync {
    fn media_type(&self) -> &'static str;
    fn file_extension(&self) -> &'static str;
    fn encode(&self, layers: Vec<mvt::Layer>) -> Result<Bytes, EncodeError>;
}

/// Mapbox Vector Tiles, the one codec shipped with the crate.
pub struct MvtEncoder;

impl LayerEncoder for MvtEncoder {
    fn media_type(&self) -> &'static str {
        "application/vnd.mapbox-vector-tile"
    }

    fn file_extension(&self) -> &'static str {
        "pbf"
    }

    fn encode(&self, layers: Vec<mvt::Layer>) -> Result<Bytes, EncodeError> {
        Ok(Bytes::from(Tile::from(layers).to_bytes()))
    }
}

/// Output codecs by media type, assembled at construction time.
pub struct EncoderRegistry {
    encoders: Vec<Arc<dyn LayerEncoder>>,
}

impl Default for EncoderRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl EncoderRegistry {
    /// The registry shipped by default, carrying only the MVT codec.
    pub fn standard() -> Self {
        Self {
            encoders: vec![Arc::new(MvtEncoder)],
        }
    }

    pub fn with(mut self, encoder: impl LayerEncoder + 'static) -> Self {
        self.encoders.push(Arc::new(encoder));
        self
    }

    pub fn get(&self, media_type: &str) -> Option<Arc<dyn LayerEncoder>> {
        self.encoders
            .iter()
            .find(|e| e.media_type() == media_type)
            .cloned()
    }

    /// The first registered codec, used when the caller does not select a
    /// media type.
    pub fn preferred(&self) -> Arc<dyn LayerEncoder> {
        Arc::clone(&self.encoders[0])
    }
}

/// Drives one feature stream into one named layer.
pub struct TileEncoder<'a> {
    processor: &'a GeometryProcessor,
    attributes: &'a AttributeEncoder,
    limits: FeatureLimits,
}

impl<'a> TileEncoder<'a> {
    pub fn new(
        processor: &'a GeometryProcessor,
        attributes: &'a AttributeEncoder,
        limits: FeatureLimits,
    ) -> Self {
        Self {
            processor,
            attributes,
            limits,
        }
    }

    /// Consumes the stream eagerly, feature by feature. Single-pass and
    /// non-restartable: a mid-stream error discards the partial layer.
    ///
    /// Zero surviving features still yield a valid (empty) layer.
    pub fn layer(
        &self,
        name: &str,
        stream: FeatureStream<'_>,
    ) -> Result<mvt::Layer, EncodeError> {
        let mut builder = LayerBuilder::new(name);
        let mut budget = KindBudget::new(self.limits);
        let mut dropped = 0usize;

        for record in stream {
            let record = record?;

            let Some(geometry) = record.geometry.as_ref() else {
                continue;
            };
            let Some(processed) = self.processor.process(geometry) else {
                continue;
            };
            let Some(kind) = GeometryKind::of(&processed) else {
                continue;
            };
            let Some((geom_type, commands)) = mvt::geometry::encode(&processed) else {
                continue;
            };
            if !budget.admit(kind) {
                dropped += 1;
                continue;
            }

            // Duplicate numeric ids are not deduplicated; the last write
            // wins within the layer.
            let id = record.id.as_deref().and_then(|raw| raw.parse::<u64>().ok());
            let attributes: Vec<_> = self.attributes.encode_all(record.properties.iter()).collect();

            builder.push(id, geom_type, commands, attributes);
        }

        if dropped > 0 {
            debug!(
                "layer '{}': dropped {} features past the per-kind caps",
                name, dropped
            );
        }
        trace!("layer '{}': {} features accumulated", name, builder.len());

        Ok(builder.build())
    }
}
