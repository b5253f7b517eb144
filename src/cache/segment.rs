use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::io::{LocalCacheWriter, RemoteFileReader};
use super::{CacheError, CacheKey, FileCache, Range};

/// Download state of a [`FileSegment`].
///
/// Transitions are monotone: a segment never re-enters `Empty`. The only
/// state a new downloader can be claimed from besides `Empty` is
/// `PartiallyDownloaded`, which resumes writing after the existing prefix.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum State {
    /// Freshly created on a cache miss; nothing claimed, nothing on disk.
    Empty,
    /// A downloader holds the segment and is writing it sequentially.
    Downloading,
    /// The full range is on disk and byte-identical to the remote range.
    Downloaded,
    /// Download stopped mid-way but may be resumed by a later caller.
    PartiallyDownloaded,
    /// Space reservation failed after some bytes were written; the tail is
    /// never cached and callers read it from the remote source directly.
    PartiallyDownloadedNoContinuation,
    /// The very first reservation attempt failed; nothing was ever written.
    SkipCache,
}

impl State {
    /// Terminal states admit no further downloader claims.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            State::Downloaded | State::PartiallyDownloadedNoContinuation | State::SkipCache
        )
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::Empty => "EMPTY",
            State::Downloading => "DOWNLOADING",
            State::Downloaded => "DOWNLOADED",
            State::PartiallyDownloaded => "PARTIALLY_DOWNLOADED",
            State::PartiallyDownloadedNoContinuation => "PARTIALLY_DOWNLOADED_NO_CONTINUATION",
            State::SkipCache => "SKIP_CACHE",
        };
        f.write_str(name)
    }
}

/// Opaque execution-context token identifying a downloader.
///
/// Compared by equality only; derived from the current thread but not tied
/// to any particular thread-identification scheme.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DownloaderId(Arc<str>);

impl std::fmt::Display for DownloaderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for DownloaderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DownloaderId({})", self.0)
    }
}

/// Outcome of [`FileSegment::get_or_set_downloader`].
#[derive(Clone, Debug)]
pub enum DownloaderClaim {
    /// The caller now holds the downloader role.
    Claimed(DownloaderId),
    /// Another context holds the role; wait for it or read the remote
    /// source directly.
    HeldBy(DownloaderId),
    /// The segment is in a terminal state; there is nothing to download.
    NothingToDownload(State),
}

/// Fields guarded by the segment lock.
pub(super) struct SegmentMeta {
    pub(super) state: State,
    pub(super) downloader: Option<DownloaderId>,
    pub(super) reserved_size: u64,
    pub(super) detached: bool,
}

/// One contiguous, non-overlapping byte range of one remote file.
///
/// Lock order, outermost first: cache lock, segment lock (`meta`), write
/// lock (`write_state`). No method of this type acquires the cache lock
/// while holding either segment-level lock; operations that need both
/// (reservation, completion) go through [`FileCache`], which takes the
/// cache lock first.
pub struct FileSegment {
    key: CacheKey,
    range: Range,
    cache: Weak<FileCache>,
    cache_path: PathBuf,
    wait_timeout: Duration,

    pub(super) meta: Mutex<SegmentMeta>,
    cv: Condvar,

    /// Guards the local writer. Held only during actual file I/O so that
    /// metadata reads (state, hit counts) are never blocked behind a write.
    write_state: Mutex<Option<LocalCacheWriter>>,

    /// Advanced only by the downloader, after the bytes are on disk.
    downloaded_size: AtomicU64,
    hits_count: AtomicU64,
    pub(super) ref_count: AtomicU64,

    remote_reader: Mutex<Option<Arc<dyn RemoteFileReader>>>,
}

impl FileSegment {
    pub(super) fn new(
        key: CacheKey,
        range: Range,
        state: State,
        cache: Weak<FileCache>,
        cache_path: PathBuf,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            key,
            range,
            cache,
            cache_path,
            wait_timeout,
            meta: Mutex::new(SegmentMeta {
                state,
                downloader: None,
                reserved_size: 0,
                detached: false,
            }),
            cv: Condvar::new(),
            write_state: Mutex::new(None),
            downloaded_size: AtomicU64::new(0),
            hits_count: AtomicU64::new(0),
            ref_count: AtomicU64::new(0),
            remote_reader: Mutex::new(None),
        }
    }

    /// Token identifying the calling execution context.
    pub fn caller_id() -> DownloaderId {
        thread_local! {
            static CALLER: DownloaderId = DownloaderId(Arc::from(
                format!("{:?}", std::thread::current().id()).as_str(),
            ));
        }
        CALLER.with(Clone::clone)
    }

    pub fn key(&self) -> CacheKey {
        self.key
    }

    pub fn range(&self) -> Range {
        self.range
    }

    /// Absolute offset of the segment's first byte within the remote file.
    pub fn offset(&self) -> u64 {
        self.range.left
    }

    pub fn state(&self) -> State {
        self.meta.lock().state
    }

    pub fn downloaded_size(&self) -> u64 {
        self.downloaded_size.load(Ordering::Acquire)
    }

    /// Absolute offset the next sequential [`write`](Self::write) must use.
    pub fn download_offset(&self) -> u64 {
        self.range.left + self.downloaded_size()
    }

    pub fn reserved_size(&self) -> u64 {
        self.meta.lock().reserved_size
    }

    pub fn hits(&self) -> u64 {
        self.hits_count.load(Ordering::Relaxed)
    }

    pub fn ref_count(&self) -> u64 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn is_detached(&self) -> bool {
        self.meta.lock().detached
    }

    pub fn is_downloaded(&self) -> bool {
        self.state() == State::Downloaded
    }

    pub fn downloader(&self) -> Option<DownloaderId> {
        self.meta.lock().downloader.clone()
    }

    pub fn is_downloader(&self) -> bool {
        self.meta.lock().downloader.as_ref() == Some(&Self::caller_id())
    }

    /// Path of the segment's local cache file. Callers read the downloaded
    /// prefix from it; the file exists once the first write succeeded.
    pub fn local_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn remote_reader(&self) -> Option<Arc<dyn RemoteFileReader>> {
        self.remote_reader.lock().clone()
    }

    pub fn set_remote_reader(&self, reader: Arc<dyn RemoteFileReader>) {
        *self.remote_reader.lock() = Some(reader);
    }

    pub fn take_remote_reader(&self) -> Option<Arc<dyn RemoteFileReader>> {
        self.remote_reader.lock().take()
    }

    /// Claims the downloader role, or reports who holds it.
    ///
    /// At most one context can observe `Claimed` for a given download
    /// attempt; everybody else sees `HeldBy` with the winner's token.
    /// Claiming a role the caller already holds is an invariant violation.
    pub fn get_or_set_downloader(&self) -> Result<DownloaderClaim, CacheError> {
        let caller = Self::caller_id();
        let mut meta = self.meta.lock();

        if meta.detached {
            return Err(CacheError::Detached {
                info: self.info_locked(&meta),
            });
        }

        if let Some(current) = &meta.downloader {
            if *current == caller {
                return Err(CacheError::AlreadyDownloader {
                    info: self.info_locked(&meta),
                });
            }
            return Ok(DownloaderClaim::HeldBy(current.clone()));
        }

        match meta.state {
            State::Empty | State::PartiallyDownloaded => {
                meta.downloader = Some(caller.clone());
                meta.state = State::Downloading;
                Ok(DownloaderClaim::Claimed(caller))
            }
            state => Ok(DownloaderClaim::NothingToDownload(state)),
        }
    }

    /// Releases the downloader role without an explicit completion state.
    ///
    /// A fully written segment becomes `Downloaded`; anything else becomes
    /// `PartiallyDownloaded` so a later caller can resume.
    pub fn reset_downloader(&self) -> Result<(), CacheError> {
        let caller = Self::caller_id();
        let mut meta = self.meta.lock();

        if meta.detached {
            return Err(CacheError::Detached {
                info: self.info_locked(&meta),
            });
        }
        if meta.downloader.as_ref() != Some(&caller) {
            return Err(CacheError::NotDownloader {
                info: self.info_locked(&meta),
            });
        }

        meta.downloader = None;
        if meta.state == State::Downloading {
            meta.state = if self.downloaded_size() == self.range.size() {
                State::Downloaded
            } else {
                State::PartiallyDownloaded
            };
        }
        self.cv.notify_all();

        Ok(())
    }

    /// Blocks while the segment is being downloaded, up to the configured
    /// timeout. On timeout or in any other state it returns immediately;
    /// the caller then consumes the downloaded prefix and fetches the
    /// remainder from the remote source itself.
    pub fn wait(&self) -> State {
        let mut meta = self.meta.lock();
        if meta.state == State::Downloading {
            let _ = self.cv.wait_for(&mut meta, self.wait_timeout);
        }
        meta.state
    }

    /// Reserves cache space for `size` more bytes of this segment.
    ///
    /// Downloader-only and all-or-nothing. Only the delta beyond the
    /// still-unconsumed part of the current reservation is charged against
    /// the cache capacity. Returns `false` when the cache cannot free
    /// enough space; the caller must then degrade the segment via
    /// [`complete_with`](Self::complete_with) (`SkipCache` if nothing was
    /// written yet, `PartiallyDownloadedNoContinuation` otherwise).
    pub fn reserve(&self, size: u64) -> Result<bool, CacheError> {
        let caller = Self::caller_id();
        let delta = {
            let meta = self.meta.lock();

            if meta.detached {
                return Err(CacheError::Detached {
                    info: self.info_locked(&meta),
                });
            }
            if meta.downloader.as_ref() != Some(&caller) {
                return Err(CacheError::NotDownloader {
                    info: self.info_locked(&meta),
                });
            }
            if size == 0 {
                return Err(CacheError::InvalidOperation {
                    detail: "zero-sized reservation".to_string(),
                    info: self.info_locked(&meta),
                });
            }

            let downloaded = self.downloaded_size();
            if downloaded + size > self.range.size() {
                return Err(CacheError::InvalidOperation {
                    detail: format!(
                        "reservation of {size} bytes exceeds the segment range"
                    ),
                    info: self.info_locked(&meta),
                });
            }

            let unconsumed = meta.reserved_size - downloaded;
            if size <= unconsumed {
                return Ok(true);
            }
            size - unconsumed
        };

        // Segment lock released; the cache takes its own lock first and the
        // segment lock again inside, preserving the cache-before-segment order.
        let cache = self.cache.upgrade().ok_or(CacheError::CacheShutDown)?;
        Ok(cache.try_reserve(self, delta))
    }

    /// Appends `data` at absolute offset `offset`, which must equal
    /// [`download_offset`](Self::download_offset): writes are strictly
    /// sequential. Downloader-only, and bounded by the current reservation.
    ///
    /// The buffer is flushed after every append so waiters reading the
    /// cache file always see the full downloaded prefix.
    pub fn write(&self, data: &[u8], offset: u64) -> Result<(), CacheError> {
        let caller = Self::caller_id();
        {
            let meta = self.meta.lock();

            if meta.detached {
                return Err(CacheError::Detached {
                    info: self.info_locked(&meta),
                });
            }
            if meta.downloader.as_ref() != Some(&caller) {
                return Err(CacheError::NotDownloader {
                    info: self.info_locked(&meta),
                });
            }
            if data.is_empty() {
                return Err(CacheError::InvalidOperation {
                    detail: "zero-sized write".to_string(),
                    info: self.info_locked(&meta),
                });
            }

            let downloaded = self.downloaded_size();
            let expected = self.range.left + downloaded;
            if offset != expected {
                return Err(CacheError::NonSequentialWrite {
                    expected,
                    actual: offset,
                    info: self.info_locked(&meta),
                });
            }

            let available = meta.reserved_size - downloaded;
            if data.len() as u64 > available {
                return Err(CacheError::ReservationExceeded {
                    requested: data.len() as u64,
                    available,
                    info: self.info_locked(&meta),
                });
            }
        }

        // Segment lock released before I/O; the checks above stay valid
        // because only the downloader advances the download.
        let mut writer = self.write_state.lock();
        match append_all(&mut writer, &self.cache_path, data) {
            Ok(()) => {
                self.downloaded_size
                    .fetch_add(data.len() as u64, Ordering::AcqRel);
                Ok(())
            }
            Err(io_error) => {
                *writer = None;
                drop(writer);
                self.set_download_failed();
                Err(CacheError::Io(io_error))
            }
        }
    }

    /// Moves the segment to a terminal or partial state, releases the
    /// downloader role and wakes all waiters. Runs under the cache lock
    /// followed by the segment lock so the manager's eviction structures
    /// stay consistent with the new state.
    pub fn complete_with(&self, state: State) -> Result<(), CacheError> {
        let cache = self.cache.upgrade().ok_or(CacheError::CacheShutDown)?;
        cache.complete_segment(self, state)
    }

    /// Diagnostic snapshot for logs and error messages.
    pub fn info_for_log(&self) -> String {
        let meta = self.meta.lock();
        self.info_locked(&meta)
    }

    /// Checks the size invariant chain; for debug assertions and tests.
    pub fn assert_correctness(&self) {
        let meta = self.meta.lock();
        let downloaded = self.downloaded_size();
        assert!(
            downloaded <= meta.reserved_size,
            "downloaded {downloaded} > reserved {}: {}",
            meta.reserved_size,
            self.info_locked(&meta)
        );
        assert!(
            meta.reserved_size <= self.range.size(),
            "reserved {} > range size {}: {}",
            meta.reserved_size,
            self.range.size(),
            self.info_locked(&meta)
        );
    }

    // ---- internals shared with the cache manager ----

    pub(super) fn info_locked(&self, meta: &SegmentMeta) -> String {
        let downloader = match &meta.downloader {
            Some(id) => id.to_string(),
            None => "None".to_string(),
        };
        format!(
            "File segment: {}, key: {}, state: {}, downloaded: {}, reserved: {}, \
             downloader: {}, refs: {}, hits: {}, detached: {}",
            self.range,
            self.key,
            meta.state,
            self.downloaded_size(),
            meta.reserved_size,
            downloader,
            self.ref_count(),
            self.hits(),
            meta.detached,
        )
    }

    pub(super) fn increment_hits(&self) {
        self.hits_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn lock_meta(&self) -> MutexGuard<'_, SegmentMeta> {
        self.meta.lock()
    }

    pub(super) fn notify_waiters(&self) {
        self.cv.notify_all();
    }

    /// Marks the segment unreachable from cache lookups. Callers must hold
    /// the cache lock and pass the held segment guard.
    pub(super) fn detach_locked(&self, meta: &mut SegmentMeta) {
        meta.detached = true;
        self.cv.notify_all();
    }

    /// Flushes and drops the local writer; used on completion.
    pub(super) fn finalize_writer(&self) -> io::Result<()> {
        let mut writer = self.write_state.lock();
        if let Some(w) = writer.as_mut() {
            w.flush()?;
        }
        *writer = None;
        Ok(())
    }

    pub(super) fn cache_handle(&self) -> Option<Arc<FileCache>> {
        self.cache.upgrade()
    }

    fn set_download_failed(&self) {
        let mut meta = self.meta.lock();
        if meta.state == State::Downloading {
            meta.state = State::PartiallyDownloaded;
        }
        meta.downloader = None;
        self.cv.notify_all();
    }
}

impl std::fmt::Debug for FileSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.info_for_log())
    }
}

fn append_all(
    slot: &mut Option<LocalCacheWriter>,
    path: &Path,
    data: &[u8],
) -> io::Result<()> {
    if slot.is_none() {
        *slot = Some(LocalCacheWriter::open(path)?);
    }
    if let Some(writer) = slot.as_mut() {
        writer.append(data)?;
        writer.flush()?;
    }
    Ok(())
}
