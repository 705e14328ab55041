use std::fmt::{Debug, Formatter};

use crate::datasource::SourceError;

pub enum EncodeError {
    /// The feature stream failed mid-consumption; the partial layer is
    /// discarded and nothing reaches the cache.
    Upstream(SourceError),
    /// The wire codec rejected the accumulated layer. A programming-level
    /// defect, logged with full context by the caller.
    Codec(String),
}

impl Debug for EncodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                EncodeError::Upstream(e) => format!("Upstream: {}", e),
                EncodeError::Codec(e) => format!("Codec: {}", e),
            }
        )
    }
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl std::error::Error for EncodeError {}

impl From<SourceError> for EncodeError {
    fn from(value: SourceError) -> Self {
        EncodeError::Upstream(value)
    }
}
