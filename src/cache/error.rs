/// Errors the segment cache can throw.
///
/// Capacity exhaustion is deliberately absent: a failed reservation is an
/// expected outcome reported as `false`, never as an error. Everything
/// here is either an I/O failure to propagate or a call-site invariant
/// violation carrying a diagnostic snapshot of the segment involved.
pub enum CacheError {
    /// The stored segment layout for a key is inconsistent (overlapping
    /// entries discovered during lookup).
    CorruptLayout { detail: String },
    /// Operation on a segment that was detached from the cache.
    Detached { info: String },
    /// Operation requires the downloader role, which the caller does not hold.
    NotDownloader { info: String },
    /// The caller already holds the downloader role it tried to claim.
    AlreadyDownloader { info: String },
    /// Write offset does not continue the downloaded prefix.
    NonSequentialWrite {
        expected: u64,
        actual: u64,
        info: String,
    },
    /// Write larger than the remaining reserved space.
    ReservationExceeded {
        requested: u64,
        available: u64,
        info: String,
    },
    /// Preconditions of the requested operation do not hold
    /// (zero-sized request, bad completion state, removal of a busy segment).
    InvalidOperation { detail: String, info: String },
    /// The owning cache was torn down while the segment was still in use.
    CacheShutDown,
    /// Local or remote I/O failure.
    Io(std::io::Error),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CorruptLayout { detail } => {
                write!(f, "Corrupt cache layout: {detail}")
            }
            Self::Detached { info } => {
                write!(f, "Operation on detached segment: {info}")
            }
            Self::NotDownloader { info } => {
                write!(f, "Caller is not the downloader: {info}")
            }
            Self::AlreadyDownloader { info } => {
                write!(f, "Downloader role claimed twice by the same caller: {info}")
            }
            Self::NonSequentialWrite {
                expected,
                actual,
                info,
            } => write!(
                f,
                "Non-sequential write: expected offset {expected}, got {actual}: {info}"
            ),
            Self::ReservationExceeded {
                requested,
                available,
                info,
            } => write!(
                f,
                "Write of {requested} bytes exceeds reserved space ({available} available): {info}"
            ),
            Self::InvalidOperation { detail, info } => {
                write!(f, "Invalid cache operation: {detail}: {info}")
            }
            Self::CacheShutDown => write!(f, "Cache was shut down"),
            Self::Io(io_error) => write!(f, "IO error: {io_error}"),
        }
    }
}

impl std::fmt::Debug for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for CacheError {}

impl From<std::io::Error> for CacheError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
