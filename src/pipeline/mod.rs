//! The tile generation pipeline.
//!
//! Resolves a tile address against the grid registry, consults the cache,
//! and on a miss streams features from the upstream engine through the
//! geometry processor and attribute encoder into encoded tile bytes.

pub mod attribute;
pub mod encoder;
pub mod geometry;

#[doc(hidden)]
pub mod error;

#[doc(inline)]
pub use attribute::{AttributeEncoder, PropertyTransformer, Transformed};
#[doc(inline)]
pub use encoder::{
    EncodedTile, EncoderRegistry, FeatureLimits, LayerEncoder, MvtEncoder, TileEncoder,
};
#[doc(inline)]
pub use error::EncodeError;
#[doc(inline)]
pub use geometry::{GeometryKind, GeometryProcessor};

use bytes::Bytes;
use geo::{Coord, Rect};
use indexmap::IndexMap;
use log::{debug, warn};

use crate::cache::TileCache;
use crate::combine::MultiLayerCombiner;
use crate::config::TilesConfiguration;
use crate::datasource::{FeatureQuery, FeatureSource, FieldSelection};
use crate::matrix::{self, MatrixError, MatrixSetRegistry, TileAddress, TileMatrixSet};
use crate::mvt::MVT_EXTENT;
use crate::Error;

use geometry::DEFAULT_CLIP_BUFFER;

/// Serves tiles: cache first, then the encode path, with per-collection
/// layers combined for multi-collection addresses.
pub struct TilePipeline<S> {
    registry: MatrixSetRegistry,
    source: S,
    cache: TileCache,
    config: TilesConfiguration,
    collections: Vec<String>,
    codec: std::sync::Arc<dyn LayerEncoder>,
}

impl<S: FeatureSource> TilePipeline<S> {
    /// `collections` is the ordered list of enabled collections, the
    /// expansion of an empty collection list in an address.
    pub fn new(
        registry: MatrixSetRegistry,
        source: S,
        cache: TileCache,
        config: TilesConfiguration,
        collections: Vec<String>,
    ) -> Self {
        Self {
            registry,
            source,
            cache,
            config,
            collections,
            codec: EncoderRegistry::standard().preferred(),
        }
    }

    /// Selects the output codec by media type from `encoders`; unknown
    /// media types keep the registry's preferred codec.
    pub fn with_media_type(mut self, encoders: &EncoderRegistry, media_type: &str) -> Self {
        self.codec = encoders.get(media_type).unwrap_or_else(|| encoders.preferred());
        self
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &TilesConfiguration {
        &self.config
    }

    pub fn collections(&self) -> &[String] {
        &self.collections
    }

    pub fn matrix_set(&self, id: &str) -> Result<&TileMatrixSet, MatrixError> {
        self.registry.get(id)
    }

    /// Serves one tile, generating and caching it on a miss.
    pub fn tile(&self, address: &TileAddress) -> Result<EncodedTile, Error> {
        let set = self.registry.get(&address.matrix_set)?;
        matrix::validate(set, address.level, address.row, address.col)?;

        if !self.config.level_allowed(&address.matrix_set, address.level) {
            return Err(MatrixError::OutOfRange(format!(
                "level {} outside configured bounds for {}",
                address.level, address.matrix_set
            ))
            .into());
        }

        let address = self.route(address);
        if address.is_multi_layer() {
            self.multi_layer(set, &address)
        } else {
            self.single_layer(set, &address)
        }
    }

    /// Routes tiles of levels excluded from the persistent store to the
    /// scratch area.
    fn route(&self, address: &TileAddress) -> TileAddress {
        if address.cacheable && !self.config.level_cached(&address.matrix_set, address.level) {
            address.clone().non_cacheable()
        } else {
            address.clone()
        }
    }

    fn single_layer(&self, set: &TileMatrixSet, address: &TileAddress) -> Result<EncodedTile, Error> {
        if let Some(bytes) = self.cache.read_valid(address)? {
            debug!("cache hit for {}", address);
            return Ok(EncodedTile::complete(bytes));
        }

        self.generate(set, address, &address.collections[0])
    }

    /// The live encode path: query, process, accumulate, serialize. The
    /// cache copy is best-effort; a write failure is logged and the
    /// response still succeeds.
    fn generate(
        &self,
        set: &TileMatrixSet,
        address: &TileAddress,
        collection: &str,
    ) -> Result<EncodedTile, Error> {
        let bbox = matrix::bounding_box(set, address.level, address.row, address.col)?;
        let transform = matrix::native_to_tile(bbox, MVT_EXTENT);

        let processor = GeometryProcessor::new(transform)
            .keep_degenerate(self.config.ignore_invalid_geometries);
        let attributes = AttributeEncoder::new(FieldSelection::Wildcard)
            .with_transformations(&self.config.transformations);
        let encoder = TileEncoder::new(&processor, &attributes, FeatureLimits::from(&self.config));

        let query = self.query(set, bbox, collection);
        let stream = self.source.query(&query)?;
        let layer = encoder.layer(collection, stream)?;

        // An empty layer persists as a zero-length entry: "known empty",
        // which is itself a valid minimal tile encoding.
        let bytes: Bytes = if layer.features.is_empty() {
            Bytes::new()
        } else {
            self.codec.encode(vec![layer])?
        };

        if let Err(e) = self.cache.write(address, &bytes) {
            warn!("cache write failed for {}: {}", address, e);
        }

        Ok(EncodedTile::complete(bytes))
    }

    /// The query window is the tile box expanded by the clip buffer so
    /// features just outside the tile still contribute edge geometry.
    fn query(&self, set: &TileMatrixSet, bbox: Rect<f64>, collection: &str) -> FeatureQuery {
        let margin = bbox.width() * DEFAULT_CLIP_BUFFER / MVT_EXTENT as f64;

        FeatureQuery {
            type_name: collection.to_string(),
            bbox: Rect::new(
                Coord {
                    x: bbox.min().x - margin,
                    y: bbox.min().y - margin,
                },
                Coord {
                    x: bbox.max().x + margin,
                    y: bbox.max().y + margin,
                },
            ),
            crs: set.crs().to_string(),
            filter: None,
            fields: FieldSelection::Wildcard,
            max_allowable_offset: bbox.width() / MVT_EXTENT as f64,
            limit: Some(self.config.feature_limit()),
            offset: None,
        }
    }

    fn multi_layer(&self, set: &TileMatrixSet, address: &TileAddress) -> Result<EncodedTile, Error> {
        if let Some(bytes) = self.cache.read_valid(address)? {
            debug!("cache hit for {}", address);
            return Ok(EncodedTile::complete(bytes));
        }

        let collections = if address.collections.is_empty() {
            self.collections.clone()
        } else {
            address.collections.clone()
        };

        // Single-layer tiles backing a combined tile always live in the
        // persistent store; the combiner polls them there.
        let mut singles = IndexMap::new();
        for collection in &collections {
            let single = TileAddress::new(
                address.matrix_set.clone(),
                address.level,
                address.row,
                address.col,
                vec![collection.clone()],
            );

            if !self.cache.exists(&single) {
                if let Err(e) = self.generate(set, &single, collection) {
                    warn!(
                        "layer '{}' generation failed for {}: {}",
                        collection, address, e
                    );
                }
            }
            singles.insert(collection.clone(), single);
        }

        let combined = MultiLayerCombiner::new(&self.cache).combine(&singles);

        // Incomplete assemblies are never persisted; the next request
        // retries the missing layers.
        if combined.complete {
            if let Err(e) = self.cache.write(address, &combined.bytes) {
                warn!("cache write failed for {}: {}", address, e);
            }
        }

        Ok(combined)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::datasource::{FeatureRecord, FeatureStream, SourceError, TypedValue};
    use crate::matrix::set::WEB_MERCATOR_QUAD;
    use crate::mvt::Tile;
    use geo::{Geometry, LineString, Polygon};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory feature engine counting its invocations.
    struct VecSource {
        features: Vec<FeatureRecord>,
        queries: AtomicUsize,
    }

    impl VecSource {
        fn new(features: Vec<FeatureRecord>) -> Self {
            Self {
                features,
                queries: AtomicUsize::new(0),
            }
        }

        fn query_count(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }
    }

    impl FeatureSource for VecSource {
        fn query(&self, _: &FeatureQuery) -> Result<FeatureStream<'_>, SourceError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(self.features.clone().into_iter().map(Ok)))
        }
    }

    /// A 200km square around the origin, comfortably above the sub-pixel
    /// threshold on the world tile.
    fn big_square() -> FeatureRecord {
        let half = 100_000.0;
        let shell = LineString::from(vec![
            (-half, -half),
            (half, -half),
            (half, half),
            (-half, half),
            (-half, -half),
        ]);

        let mut record = FeatureRecord {
            id: Some("7".into()),
            geometry: Some(Geometry::Polygon(Polygon::new(shell, vec![]))),
            ..FeatureRecord::default()
        };
        record
            .properties
            .insert("kind".into(), TypedValue::String("plaza".into()));
        record
    }

    fn pipeline(
        features: Vec<FeatureRecord>,
        collections: Vec<String>,
    ) -> (tempfile::TempDir, TilePipeline<VecSource>) {
        let dir = tempfile::tempdir().unwrap();
        let cache = TileCache::new(dir.path(), "demo", "pbf").unwrap();

        let pipeline = TilePipeline::new(
            MatrixSetRegistry::standard(),
            VecSource::new(features),
            cache,
            TilesConfiguration::default(),
            collections,
        );
        (dir, pipeline)
    }

    fn world(collections: Vec<String>) -> TileAddress {
        TileAddress::new(WEB_MERCATOR_QUAD, 0, 0, 0, collections)
    }

    #[test]
    fn unknown_matrix_set_rejected() {
        let (_dir, pipeline) = pipeline(vec![], vec!["roads".into()]);
        let address = TileAddress::new("NoSuchGrid", 0, 0, 0, vec!["roads".into()]);

        assert!(matches!(
            pipeline.tile(&address),
            Err(Error::Matrix(MatrixError::UnknownMatrixSet(_)))
        ));
    }

    #[test]
    fn out_of_range_rejected() {
        let (_dir, pipeline) = pipeline(vec![], vec!["roads".into()]);
        let address = TileAddress::new(WEB_MERCATOR_QUAD, 0, 0, 1, vec!["roads".into()]);

        assert!(matches!(
            pipeline.tile(&address),
            Err(Error::Matrix(MatrixError::OutOfRange(_)))
        ));
    }

    #[test]
    fn configured_bounds_rejected_as_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TileCache::new(dir.path(), "demo", "pbf").unwrap();

        let config: TilesConfiguration = serde_json::from_str(
            r#"{ "zoomLevels": { "WebMercatorQuad": { "min": 4, "max": 10 } } }"#,
        )
        .unwrap();

        let pipeline = TilePipeline::new(
            MatrixSetRegistry::standard(),
            VecSource::new(vec![]),
            cache,
            config,
            vec!["roads".into()],
        );

        let result = pipeline.tile(&world(vec!["roads".into()]));
        assert!(matches!(
            result,
            Err(Error::Matrix(MatrixError::OutOfRange(_)))
        ));
    }

    #[test_log::test]
    fn miss_generates_then_hit_serves_from_cache() {
        let (_dir, pipeline) = pipeline(vec![big_square()], vec!["roads".into()]);
        let address = world(vec!["roads".into()]);

        let first = pipeline.tile(&address).unwrap();
        assert!(first.complete);

        let tile = Tile::from_bytes(&first.bytes).unwrap();
        assert_eq!(tile.layers[0].name, "roads");
        assert_eq!(tile.layers[0].features.len(), 1);
        assert_eq!(tile.layers[0].features[0].id, Some(7));

        let second = pipeline.tile(&address).unwrap();
        assert_eq!(second.bytes, first.bytes);
        assert_eq!(pipeline.source().query_count(), 1);
    }

    #[test]
    fn empty_stream_produces_valid_empty_tile() {
        let (_dir, pipeline) = pipeline(vec![], vec!["roads".into()]);
        let address = world(vec!["roads".into()]);

        let encoded = pipeline.tile(&address).unwrap();
        assert!(encoded.complete);

        let tile = Tile::from_bytes(&encoded.bytes).unwrap();
        assert!(tile.layers.is_empty());

        // Repeated calls stay empty and identical.
        let again = pipeline.tile(&address).unwrap();
        assert_eq!(again.bytes, encoded.bytes);
    }

    #[test_log::test]
    fn corrupt_cache_entry_regenerated() {
        let (_dir, pipeline) = pipeline(vec![big_square()], vec!["roads".into()]);
        let address = world(vec!["roads".into()]);

        pipeline.tile(&address).unwrap();
        pipeline
            .cache()
            .write(&address, &[0xff, 0xff, 0xff, 0x01])
            .unwrap();

        let healed = pipeline.tile(&address).unwrap();
        assert!(Tile::from_bytes(&healed.bytes).is_ok());
        assert_eq!(pipeline.source().query_count(), 2);
    }

    #[test]
    fn empty_collection_list_combines_all_enabled() {
        let (_dir, pipeline) = pipeline(
            vec![big_square()],
            vec!["roads".into(), "parks".into()],
        );

        let combined = pipeline.tile(&world(vec![])).unwrap();
        assert!(combined.complete);

        let tile = Tile::from_bytes(&combined.bytes).unwrap();
        assert_eq!(
            tile.layers.iter().map(|l| l.name.as_str()).collect::<Vec<_>>(),
            vec!["roads", "parks"]
        );

        // Both per-collection tiles are now cached for later requests.
        assert!(pipeline.cache().exists(&world(vec!["roads".into()])));
        assert!(pipeline.cache().exists(&world(vec!["parks".into()])));
    }

    #[test]
    fn multi_layer_tile_cached_once_complete() {
        let (_dir, pipeline) = pipeline(
            vec![big_square()],
            vec!["roads".into(), "parks".into()],
        );
        let address = world(vec![]);

        pipeline.tile(&address).unwrap();
        let queries = pipeline.source().query_count();

        // Cache hit: no further upstream work.
        pipeline.tile(&address).unwrap();
        assert_eq!(pipeline.source().query_count(), queries);
    }
}
