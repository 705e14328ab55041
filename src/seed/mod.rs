//! Background tile seeding.
//!
//! A single dedicated worker walks the configured seeding ranges once per
//! service start and pre-populates the cache through the live encode
//! path. Seeding is deliberately sequential: it writes to the same cache
//! the request path reads from, and unordered concurrent writers would
//! duplicate work with no coordination benefit.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{info, warn};

use crate::config::{MinMax, TilesConfiguration};
use crate::datasource::FeatureSource;
use crate::matrix::TileAddress;
use crate::pipeline::TilePipeline;
use crate::Error;

/// One (collections × matrix set × zoom range) seeding entry.
#[derive(Debug, Clone)]
pub struct SeedRange {
    pub matrix_set: String,
    pub collections: Vec<String>,
    pub levels: MinMax,
}

/// The two-pass seeding work list: merged multi-collection tiles first,
/// since generating them opportunistically fills the single-layer cache
/// the second pass needs.
#[derive(Debug, Clone, Default)]
pub struct SeedingPlan {
    pub merged: Vec<SeedRange>,
    pub single: Vec<SeedRange>,
}

impl SeedingPlan {
    /// Derives the plan from configuration: per configured matrix set,
    /// one merged range over all enabled collections and one single-layer
    /// range per collection.
    pub fn from_config(config: &TilesConfiguration, collections: &[String]) -> Self {
        let mut plan = SeedingPlan::default();

        for (matrix_set, levels) in &config.seeding {
            plan.merged.push(SeedRange {
                matrix_set: matrix_set.clone(),
                collections: Vec::new(),
                levels: *levels,
            });

            for collection in collections {
                plan.single.push(SeedRange {
                    matrix_set: matrix_set.clone(),
                    collections: vec![collection.clone()],
                    levels: *levels,
                });
            }
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty() && self.single.is_empty()
    }
}

/// Handle to the running worker.
pub struct SeedingHandle {
    thread: JoinHandle<()>,
}

impl SeedingHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the worker. A panic inside the worker is contained here
    /// and logged; it never crosses into the hosting process.
    pub fn join(self) {
        if self.thread.join().is_err() {
            warn!("seeding worker panicked");
        }
    }
}

/// Starts at most one seeding run per service instance; consumed by
/// [`start`](SeedingScheduler::start) so a second run cannot be launched
/// from the same scheduler.
pub struct SeedingScheduler {
    plan: SeedingPlan,
}

impl SeedingScheduler {
    pub fn new(plan: SeedingPlan) -> Self {
        Self { plan }
    }

    /// Spawns the dedicated worker. Errors reach `on_error` and terminate
    /// the run; the hosting process is never taken down.
    pub fn start<S>(
        self,
        pipeline: Arc<TilePipeline<S>>,
        on_error: impl Fn(Error) + Send + 'static,
    ) -> io::Result<SeedingHandle>
    where
        S: FeatureSource + Send + Sync + 'static,
    {
        let thread = thread::Builder::new()
            .name("tile-seeder".to_string())
            .spawn(move || {
                if let Err(e) = run(&pipeline, &self.plan) {
                    on_error(e);
                }
            })?;

        Ok(SeedingHandle { thread })
    }
}

fn run<S: FeatureSource>(pipeline: &TilePipeline<S>, plan: &SeedingPlan) -> Result<(), Error> {
    for range in plan.merged.iter().chain(plan.single.iter()) {
        seed_range(pipeline, range)?;
    }

    info!("seeding run finished");
    Ok(())
}

fn seed_range<S: FeatureSource>(pipeline: &TilePipeline<S>, range: &SeedRange) -> Result<(), Error> {
    let set = pipeline.matrix_set(&range.matrix_set)?;
    let min = range.levels.min.max(set.min_level());
    let max = range.levels.max.min(set.max_level());

    let mut generated = 0u64;
    let mut skipped = 0u64;

    for level in min..=max {
        let matrix = set.matrix(level)?;

        for row in 0..matrix.matrix_height {
            for col in 0..matrix.matrix_width {
                let address = TileAddress::new(
                    range.matrix_set.clone(),
                    level,
                    row,
                    col,
                    range.collections.clone(),
                );

                // Existence only, no freshness check.
                if pipeline.cache().exists(&address) {
                    skipped += 1;
                    continue;
                }

                pipeline.tile(&address)?;
                generated += 1;
            }
        }
    }

    info!(
        "seeded {}[{}] levels {}..={}: {} generated, {} already cached",
        range.matrix_set,
        range.collections.join(","),
        min,
        max,
        generated,
        skipped
    );

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cache::TileCache;
    use crate::datasource::{FeatureQuery, FeatureRecord, FeatureStream, SourceError};
    use crate::matrix::set::EPSG_3857;
    use crate::matrix::{MatrixSetRegistry, TileMatrix, TileMatrixSet};
    use geo::{Coord, Rect};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Empty feature engine counting its invocations.
    struct CountingSource {
        queries: AtomicUsize,
    }

    impl FeatureSource for CountingSource {
        fn query(&self, _: &FeatureQuery) -> Result<FeatureStream<'_>, SourceError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(std::iter::empty::<Result<FeatureRecord, SourceError>>()))
        }
    }

    /// A grid that is 2x2 at level 0 and quadruples per level.
    fn small_grid() -> TileMatrixSet {
        let matrices = (0..=2u8)
            .map(|level| TileMatrix {
                level,
                matrix_width: 2 << level,
                matrix_height: 2 << level,
                tile_px: 256,
            })
            .collect();

        TileMatrixSet::new(
            "SmallGrid",
            EPSG_3857,
            Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 100.0, y: 100.0 }),
            matrices,
        )
    }

    fn pipeline(dir: &tempfile::TempDir) -> Arc<TilePipeline<CountingSource>> {
        let cache = TileCache::new(dir.path(), "demo", "pbf").unwrap();

        Arc::new(TilePipeline::new(
            MatrixSetRegistry::new().with(small_grid()),
            CountingSource {
                queries: AtomicUsize::new(0),
            },
            cache,
            TilesConfiguration::default(),
            vec!["roads".into()],
        ))
    }

    #[test_log::test]
    fn seeds_only_missing_tiles_across_levels() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir);

        // Two of the four level-0 tiles are already cached.
        for col in [0u64, 1] {
            let address = TileAddress::new("SmallGrid", 0, 0, col, vec!["roads".into()]);
            pipeline.cache().write(&address, &[]).unwrap();
        }

        let plan = SeedingPlan {
            merged: vec![],
            single: vec![SeedRange {
                matrix_set: "SmallGrid".into(),
                collections: vec!["roads".into()],
                levels: MinMax { min: 0, max: 2 },
            }],
        };

        SeedingScheduler::new(plan)
            .start(Arc::clone(&pipeline), |e| panic!("seeding failed: {}", e))
            .unwrap()
            .join();

        // 4 - 2 at level 0, then all of levels 1 and 2.
        let expected = (4 - 2) + 16 + 64;
        assert_eq!(pipeline.source().queries.load(Ordering::SeqCst), expected);

        // Every tile of the range is present afterwards.
        let address = TileAddress::new("SmallGrid", 2, 7, 7, vec!["roads".into()]);
        assert!(pipeline.cache().exists(&address));
    }

    #[test]
    fn merged_pass_runs_before_single_pass() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir);

        let plan = SeedingPlan {
            merged: vec![SeedRange {
                matrix_set: "SmallGrid".into(),
                collections: vec![],
                levels: MinMax { min: 0, max: 0 },
            }],
            single: vec![SeedRange {
                matrix_set: "SmallGrid".into(),
                collections: vec!["roads".into()],
                levels: MinMax { min: 0, max: 0 },
            }],
        };

        SeedingScheduler::new(plan)
            .start(Arc::clone(&pipeline), |e| panic!("seeding failed: {}", e))
            .unwrap()
            .join();

        // The merged pass generated each single-layer tile on the way, so
        // the single pass found all four already cached.
        assert_eq!(pipeline.source().queries.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn errors_reach_the_handler_not_the_host() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir);

        let plan = SeedingPlan {
            merged: vec![],
            single: vec![SeedRange {
                matrix_set: "NoSuchGrid".into(),
                collections: vec!["roads".into()],
                levels: MinMax { min: 0, max: 0 },
            }],
        };

        let failures = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&failures);

        SeedingScheduler::new(plan)
            .start(pipeline, move |_| {
                observed.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
            .join();

        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }
}
