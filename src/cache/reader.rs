use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use super::{
    CacheError, CacheKey, DownloaderClaim, FileCache, FileSegment, Range, RemoteFileReader, State,
};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Cache-through reader for one remote file.
///
/// Implements the per-segment read protocol on top of [`FileCache`]: the
/// downloaded prefix of each segment is read from the local cache file;
/// for the undownloaded suffix the caller either becomes the downloader,
/// waits for the current one, or reads directly from the remote source
/// when caching is not possible.
pub struct CachedFileReader {
    cache: Arc<FileCache>,
    key: CacheKey,
    remote: Arc<dyn RemoteFileReader>,
    chunk_size: usize,
}

impl CachedFileReader {
    pub fn new(cache: Arc<FileCache>, key: CacheKey, remote: Arc<dyn RemoteFileReader>) -> Self {
        Self {
            cache,
            key,
            remote,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Download chunk granularity; each chunk is reserved before it is
    /// written, so this is also the reservation increment.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk_size must be greater than 0");
        self.chunk_size = chunk_size;
        self
    }

    /// Reads `[offset, offset + size)`, serving bytes from the cache where
    /// possible and populating it along the way.
    pub fn read(&self, offset: u64, size: u64) -> Result<Bytes, CacheError> {
        let want = Range::from_offset_size(offset, size);
        let holder = self.cache.get_or_set(self.key, offset, size)?;

        let mut out = BytesMut::with_capacity(size as usize);
        for segment in holder.iter() {
            let seg_range = segment.range();
            let target = Range::new(
                seg_range.left.max(want.left),
                seg_range.right.min(want.right),
            );
            self.read_segment(segment, target, &mut out)?;
        }

        Ok(out.freeze())
    }

    fn read_segment(
        &self,
        segment: &FileSegment,
        target: Range,
        out: &mut BytesMut,
    ) -> Result<(), CacheError> {
        loop {
            if segment.is_downloaded() {
                return read_local(segment, target, out);
            }

            match segment.get_or_set_downloader() {
                Ok(DownloaderClaim::Claimed(_)) => {
                    return self.download_and_read(segment, target, out);
                }
                Ok(DownloaderClaim::HeldBy(_)) => {
                    if segment.wait() == State::Downloading {
                        // Timed out: consume the prefix and fetch the rest
                        // ourselves instead of waiting longer.
                        return self.read_mixed(segment, target, out);
                    }
                }
                Ok(DownloaderClaim::NothingToDownload(_)) => {
                    return self.read_mixed(segment, target, out);
                }
                Err(CacheError::Detached { .. }) => {
                    // Evicted under us; downloaded bytes are still readable.
                    return self.read_mixed(segment, target, out);
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Downloader path: fetch and cache the whole remaining segment, then
    /// serve the target span from the cache file.
    fn download_and_read(
        &self,
        segment: &FileSegment,
        target: Range,
        out: &mut BytesMut,
    ) -> Result<(), CacheError> {
        let seg_range = segment.range();

        if segment.remote_reader().is_none() {
            segment.set_remote_reader(self.remote.clone());
        }

        loop {
            let pos = segment.downloaded_size();
            if pos == seg_range.size() {
                segment.complete_with(State::Downloaded)?;
                return read_local(segment, target, out);
            }

            let chunk = (seg_range.size() - pos).min(self.chunk_size as u64) as usize;
            let data = match self.remote.read(seg_range.left + pos, chunk) {
                Ok(data) => data,
                Err(io_error) => {
                    // Release the role as resumable and surface the failure.
                    let _ = segment.complete_with(State::PartiallyDownloaded);
                    return Err(CacheError::Io(io_error));
                }
            };

            if !segment.reserve(data.len() as u64)? {
                let state = if segment.downloaded_size() > 0 {
                    State::PartiallyDownloadedNoContinuation
                } else {
                    State::SkipCache
                };
                debug!(segment = %segment.info_for_log(), "reservation failed, degrading to {state}");
                segment.complete_with(state)?;
                return self.read_mixed(segment, target, out);
            }

            segment.write(&data, seg_range.left + pos)?;
        }
    }

    /// Serves the target span from the downloaded prefix plus a direct
    /// remote read for the remainder, without caching anything.
    fn read_mixed(
        &self,
        segment: &FileSegment,
        target: Range,
        out: &mut BytesMut,
    ) -> Result<(), CacheError> {
        let seg_range = segment.range();
        // Absolute exclusive end of the bytes present on disk.
        let downloaded_end = seg_range.left + segment.downloaded_size();

        if target.left < downloaded_end {
            let local_right = target.right.min(downloaded_end - 1);
            read_local(segment, Range::new(target.left, local_right), out)?;
        }

        if target.right >= downloaded_end {
            let remote_left = target.left.max(downloaded_end);
            let len = (target.right - remote_left + 1) as usize;
            let data = self.remote.read(remote_left, len)?;
            out.extend_from_slice(&data);
        }

        Ok(())
    }
}

/// Reads an absolute range out of the segment's local cache file.
fn read_local(segment: &FileSegment, target: Range, out: &mut BytesMut) -> Result<(), CacheError> {
    let relative = target.left - segment.range().left;

    let mut file = File::open(segment.local_path())?;
    file.seek(SeekFrom::Start(relative))?;

    let mut buf = vec![0u8; target.size() as usize];
    file.read_exact(&mut buf)?;
    out.extend_from_slice(&buf);

    Ok(())
}
