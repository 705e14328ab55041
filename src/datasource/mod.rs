//! The upstream feature engine, seen purely as "a lazy, finite sequence of
//! features, each with optional geometry and typed properties".
//!
//! The engine itself (storage, filter language, CRS handling) lives outside
//! this crate; implementations plug in through [`FeatureSource`].

use std::fmt::{Debug, Formatter};

use chrono::{DateTime, Utc};
use geo::{Geometry, Rect};
use indexmap::IndexMap;

/// A property value as declared by the upstream schema.
///
/// `Object` and `Array` mark nested structures the caller did not flatten;
/// they survive into the record but cannot be reduced to the wire format's
/// scalar set.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Object,
    Array,
    Geometry,
}

/// One feature yielded by the engine.
#[derive(Debug, Clone, Default)]
pub struct FeatureRecord {
    pub id: Option<String>,
    pub geometry: Option<Geometry<f64>>,
    /// Property order is part of the record; insertion order is preserved.
    pub properties: IndexMap<String, TypedValue>,
}

/// Requested property names, or everything.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSelection {
    Wildcard,
    Fields(Vec<String>),
}

impl FieldSelection {
    /// Whether a (possibly flattened) property name is selected. Matching
    /// is by top-level name: `address.street` is covered by `address`.
    pub fn covers(&self, name: &str) -> bool {
        match self {
            FieldSelection::Wildcard => true,
            FieldSelection::Fields(fields) => {
                let top_level = name
                    .split(['.', '['])
                    .next()
                    .unwrap_or(name);
                fields.iter().any(|f| f == top_level)
            }
        }
    }
}

/// Query descriptor handed to the engine, derived from a tile's bounding
/// box and the service configuration.
#[derive(Debug, Clone)]
pub struct FeatureQuery {
    pub type_name: String,
    pub bbox: Rect<f64>,
    pub crs: String,
    pub filter: Option<String>,
    pub fields: FieldSelection,
    /// Simplification tolerance the engine may already apply server-side.
    pub max_allowable_offset: f64,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

pub enum SourceError {
    /// The engine rejected the query outright.
    Query(String),
    /// The stream failed mid-consumption.
    Stream(String),
}

impl Debug for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                SourceError::Query(e) => format!("Query: {}", e),
                SourceError::Stream(e) => format!("Stream: {}", e),
            }
        )
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl std::error::Error for SourceError {}

/// Lazy, finite, single-pass feature sequence. Not restartable: once an
/// element has errored the remainder is undefined.
pub type FeatureStream<'a> = Box<dyn Iterator<Item = Result<FeatureRecord, SourceError>> + 'a>;

/// The upstream feature-query engine.
pub trait FeatureSource: Send + Sync {
    fn query(&self, query: &FeatureQuery) -> Result<FeatureStream<'_>, SourceError>;
}
