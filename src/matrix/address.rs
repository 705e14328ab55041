//! Tile addresses.

use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

use itertools::Itertools;

/// Identifies one logical tile: grid, level, row, column and the
/// collections contributing to it.
///
/// An empty collection list means "all enabled collections". `cacheable`
/// routes the entry between the persistent and temporary store and is
/// excluded from identity: two addresses differing only in `cacheable`
/// denote the same tile.
#[derive(Debug, Clone)]
pub struct TileAddress {
    pub matrix_set: String,
    pub level: u8,
    pub row: u64,
    pub col: u64,
    pub collections: Vec<String>,
    pub cacheable: bool,
}

impl TileAddress {
    pub fn new(
        matrix_set: impl Into<String>,
        level: u8,
        row: u64,
        col: u64,
        collections: Vec<String>,
    ) -> Self {
        Self {
            matrix_set: matrix_set.into(),
            level,
            row,
            col,
            collections,
            cacheable: true,
        }
    }

    pub fn non_cacheable(mut self) -> Self {
        self.cacheable = false;
        self
    }

    /// The same tile narrowed to a single collection's layer.
    pub fn for_collection(&self, collection: &str) -> Self {
        Self {
            collections: vec![collection.to_string()],
            ..self.clone()
        }
    }

    /// Whether the address names several collections (or all of them).
    pub fn is_multi_layer(&self) -> bool {
        self.collections.len() != 1
    }
}

impl PartialEq for TileAddress {
    fn eq(&self, other: &Self) -> bool {
        self.matrix_set == other.matrix_set
            && self.level == other.level
            && self.row == other.row
            && self.col == other.col
            && self.collections == other.collections
    }
}

impl Eq for TileAddress {}

impl Hash for TileAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.matrix_set.hash(state);
        self.level.hash(state);
        self.row.hash(state);
        self.col.hash(state);
        self.collections.hash(state);
    }
}

impl Display for TileAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{}]/{}/{}/{}",
            self.matrix_set,
            self.collections.iter().join(","),
            self.level,
            self.row,
            self.col
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cacheable_excluded_from_identity() {
        let a = TileAddress::new("WebMercatorQuad", 3, 1, 2, vec!["roads".into()]);
        let b = a.clone().non_cacheable();

        assert_eq!(a, b);

        let mut hasher_a = std::collections::hash_map::DefaultHasher::new();
        let mut hasher_b = std::collections::hash_map::DefaultHasher::new();
        a.hash(&mut hasher_a);
        b.hash(&mut hasher_b);
        assert_eq!(hasher_a.finish(), hasher_b.finish());
    }

    #[test]
    fn narrowing_to_collection() {
        let all = TileAddress::new("WebMercatorQuad", 0, 0, 0, vec![]);
        assert!(all.is_multi_layer());

        let roads = all.for_collection("roads");
        assert!(!roads.is_multi_layer());
        assert_eq!(roads.collections, vec!["roads"]);
        assert_ne!(all, roads);
    }
}
