pub use cache::{
    CacheError, CacheKey, CacheStatistics, CachedFileReader, DownloaderClaim, DownloaderId,
    FileCache, FileSegment, FileSegmentsHolder, Range, RemoteFileReader, State,
};
pub use config::Config;
pub use error::ApplicationError;

pub mod cache;
mod config;
mod error;
pub mod metrics_writer;
pub mod telemetry;

pub type Result<T> = std::result::Result<T, ApplicationError>;

pub(crate) static CARGO_CRATE_NAME: &str = env!("CARGO_CRATE_NAME");
