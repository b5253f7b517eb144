use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use bytes::Bytes;

/// Reads arbitrary byte ranges from a remote/object store.
///
/// The cache never retries through this trait; retry policy belongs to the
/// implementation or to the calling query engine. One reader instance can
/// be parked on a segment (see `FileSegment::set_remote_reader`) so that
/// sequential reads of the same remote file reuse it.
pub trait RemoteFileReader: Send + Sync {
    /// Reads exactly `len` bytes starting at `offset`, or fails.
    fn read(&self, offset: u64, len: usize) -> io::Result<Bytes>;
}

/// Append-only writer for one segment's local cache file.
///
/// Opened lazily on the first write so segments that never download
/// anything leave no file behind. Reopening an existing file appends,
/// which is what a resumed download needs.
pub(crate) struct LocalCacheWriter {
    writer: BufWriter<File>,
}

impl LocalCacheWriter {
    pub(crate) fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub(crate) fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)
    }

    /// Flushes buffered bytes so concurrent readers of the cache file see
    /// the full downloaded prefix.
    pub(crate) fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
