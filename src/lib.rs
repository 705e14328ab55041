#![doc = include_str!("../README.md")]

pub mod cache;
pub mod combine;
pub mod config;
pub mod datasource;
pub mod matrix;
pub mod mvt;
pub mod pipeline;
pub mod seed;

#[doc(hidden)]
pub mod error;

#[doc(inline)]
pub use config::TilesConfiguration;
#[doc(inline)]
pub use error::Error;
#[doc(inline)]
pub use matrix::{MatrixSetRegistry, TileAddress, TileMatrixSet};
#[doc(inline)]
pub use pipeline::{EncodedTile, TilePipeline};
