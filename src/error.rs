use crate::cache::CacheError;

/// Application-level errors for tools built on top of the segment cache.
///
/// The cache itself reports [`CacheError`]; this enum wraps it together
/// with the error types that can occur during startup and runtime of a
/// consuming binary.
pub enum ApplicationError {
    /// I/O error (e.g., file system).
    Io(std::io::Error),
    /// Segment cache error.
    Cache(CacheError),
    /// Internal application error with description.
    Internal(String),
}

impl std::error::Error for ApplicationError {}

impl std::fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            ApplicationError::Io(io_error) => write!(f, "IO error: {io_error:?}"),
            ApplicationError::Cache(cache_error) => write!(f, "Cache error: {cache_error}"),
            Self::Internal(message) => write!(f, "Internal error: {message}"),
        }
    }
}

impl std::fmt::Debug for ApplicationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self, f)
    }
}

impl From<std::io::Error> for ApplicationError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<CacheError> for ApplicationError {
    fn from(value: CacheError) -> Self {
        Self::Cache(value)
    }
}
