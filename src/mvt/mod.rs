//! Mapbox Vector Tile wire codec.
//!
//! Hand-declared protobuf messages, the command-stream geometry encoder,
//! and a layer builder with key/value interning. Encoding and decoding go
//! through [`prost::Message`]; the payload is bit-compatible with the
//! MVT 2.1 wire format.

pub mod builder;
pub mod geometry;

#[doc(hidden)]
pub mod proto;

#[doc(inline)]
pub use builder::LayerBuilder;
#[doc(inline)]
pub use proto::{Feature, GeomType, Layer, Tile, Value};

use prost::Message;

pub const MVT_EXTENT: u32 = 4096;
pub const MVT_VERSION: u32 = 2;

impl From<Vec<Layer>> for Tile {
    fn from(value: Vec<Layer>) -> Self {
        Self { layers: value }
    }
}

impl From<Layer> for Tile {
    fn from(value: Layer) -> Self {
        Tile::from(vec![value])
    }
}

impl Tile {
    /// Serializes the tile to its wire representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Parses a tile from wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, prost::DecodeError> {
        Tile::decode(bytes)
    }
}

impl Value {
    pub fn from_bool(value: bool) -> Self {
        Self {
            bool_value: Some(value),
            ..Self::default()
        }
    }

    pub fn from_int(value: i64) -> Self {
        Self {
            int_value: Some(value),
            ..Self::default()
        }
    }

    pub fn from_uint(value: u64) -> Self {
        Self {
            uint_value: Some(value),
            ..Self::default()
        }
    }

    pub fn from_double(value: f64) -> Self {
        Self {
            double_value: Some(value),
            ..Self::default()
        }
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self {
            string_value: Some(value.into()),
            ..Self::default()
        }
    }
}
