use std::fmt::{Debug, Formatter};

pub enum MatrixError {
    /// Zoom level, row or column outside the matrix set's valid domain,
    /// or outside configured zoom bounds. Surfaced as "tile not found".
    OutOfRange(String),
    /// The referenced matrix set has no registered definition.
    UnknownMatrixSet(String),
}

impl Debug for MatrixError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                MatrixError::OutOfRange(detail) => format!("OutOfRange: {}", detail),
                MatrixError::UnknownMatrixSet(id) => format!("UnknownMatrixSet: {}", id),
            }
        )
    }
}

impl std::fmt::Display for MatrixError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl std::error::Error for MatrixError {}
