use std::fmt::{Debug, Display, Formatter};

use crate::cache::CacheError;
use crate::datasource::SourceError;
use crate::matrix::MatrixError;
use crate::pipeline::EncodeError;

/// Converts errors from their error type (of the submodule) to that of
/// a tessella::Error variant.
///
/// ```rust,ignore
/// use tessella::matrix::MatrixError;
/// tessella::impl_err!(MatrixError, Matrix);
/// ```
pub mod err_macro {
    #[macro_export]
    macro_rules! impl_err {
        ($from:ty, $variant:ident) => {
            impl From<$from> for $crate::Error {
                fn from(value: $from) -> Self {
                    $crate::Error::$variant(value)
                }
            }
        };
    }

    pub use impl_err;
}

#[derive(Debug)]
pub enum Error {
    Matrix(MatrixError),
    Source(SourceError),
    Encode(EncodeError),
    Cache(CacheError),
}

impl Error {
    /// Whether the error maps to "tile not found" rather than a server
    /// fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Matrix(_))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Matrix(e) => write!(f, "{}", e),
            Error::Source(e) => write!(f, "{}", e),
            Error::Encode(e) => write!(f, "{}", e),
            Error::Cache(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

crate::impl_err!(MatrixError, Matrix);
crate::impl_err!(SourceError, Source);
crate::impl_err!(EncodeError, Encode);
crate::impl_err!(CacheError, Cache);
