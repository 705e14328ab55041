//! Merging per-collection tiles into one multi-layer payload.
//!
//! The single-layer tiles may still be mid-generation by a concurrent
//! request, so assembly polls with a bounded retry budget and never
//! blocks indefinitely.

use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, warn};

use crate::cache::TileCache;
use crate::matrix::TileAddress;
use crate::mvt::{Layer, Tile};
use crate::pipeline::EncodedTile;

/// Total attempts per combine call.
pub const MAX_ATTEMPTS: u32 = 4;
/// Pause between attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Injectable pause so tests drive the retry loop without real delays.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

enum Readiness {
    /// Decoded layers, or none for a known-empty tile.
    Done(Vec<Layer>),
    /// Not written yet, not decodable yet, or unreadable: try again.
    NotReady,
}

/// Assembles one multi-layer tile from already-encoded per-collection
/// tiles in the cache.
pub struct MultiLayerCombiner<'a> {
    cache: &'a TileCache,
    attempts: u32,
    sleeper: Box<dyn Sleeper>,
}

impl<'a> MultiLayerCombiner<'a> {
    pub fn new(cache: &'a TileCache) -> Self {
        Self {
            cache,
            attempts: MAX_ATTEMPTS,
            sleeper: Box::new(ThreadSleeper),
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    fn readiness(&self, collection: &str, address: &TileAddress) -> Readiness {
        let bytes = match self.cache.read(address) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Readiness::NotReady,
            Err(e) => {
                warn!("combine could not read layer '{}': {}", collection, e);
                return Readiness::NotReady;
            }
        };

        // A zero-length file is "known empty", a terminal state.
        if bytes.is_empty() {
            return Readiness::Done(Vec::new());
        }

        match Tile::from_bytes(&bytes) {
            Ok(tile) => Readiness::Done(tile.layers),
            Err(e) => {
                debug!(
                    "layer '{}' not decodable yet ({}), retrying",
                    collection, e
                );
                Readiness::NotReady
            }
        }
    }

    /// Merges the given per-collection tiles. After the attempt budget is
    /// exhausted the assembled subset is returned with
    /// `complete = (processed collections == requested collections)`.
    pub fn combine(&self, tiles: &IndexMap<String, TileAddress>) -> EncodedTile {
        let mut done: IndexMap<&str, Vec<Layer>> = IndexMap::new();
        let mut pending: Vec<(&String, &TileAddress)> = tiles.iter().collect();

        for attempt in 1..=self.attempts {
            pending.retain(|(collection, address)| {
                match self.readiness(collection, address) {
                    Readiness::Done(layers) => {
                        done.insert(collection.as_str(), layers);
                        false
                    }
                    Readiness::NotReady => true,
                }
            });

            if pending.is_empty() {
                break;
            }
            if attempt < self.attempts {
                self.sleeper.sleep(RETRY_DELAY);
            }
        }

        let complete = pending.is_empty();
        if !complete {
            warn!(
                "combine gave up on {} of {} layers after {} attempts",
                pending.len(),
                tiles.len(),
                self.attempts
            );
        }

        // Layers follow the requested collection order, not arrival order.
        let layers: Vec<Layer> = tiles
            .keys()
            .filter_map(|collection| done.shift_remove(collection.as_str()))
            .flatten()
            .collect();

        EncodedTile {
            bytes: Tile::from(layers).to_bytes().into(),
            complete,
        }
    }
}
