use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

pub use self::error::CacheError;
pub use self::holder::FileSegmentsHolder;
pub use self::io::RemoteFileReader;
pub use self::key::CacheKey;
pub use self::range::Range;
pub use self::reader::CachedFileReader;
pub use self::segment::{DownloaderClaim, DownloaderId, FileSegment, State};

mod error;
mod holder;
mod io;
mod key;
mod range;
mod reader;
mod segment;

use crate::config::Config;
use crate::telemetry;

/// Utilization snapshot for [`FileCache`].
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct CacheStatistics {
    pub used_size: u64,
    pub capacity: u64,
    pub segments: usize,
    pub queued: usize,
}

struct FileSegmentCell {
    segment: Arc<FileSegment>,
    /// Whether the cell sits in the LRU queue (set at first reservation).
    queued: bool,
}

/// Fields guarded by the cache-wide lock.
struct CacheGuts {
    /// Per key, offset-ordered non-overlapping segments.
    files: HashMap<CacheKey, BTreeMap<u64, FileSegmentCell>>,
    /// LRU over segments holding reservations; front is the eviction candidate.
    queue: VecDeque<(CacheKey, u64)>,
    /// Sum of `reserved_size` across all live segments.
    used_size: u64,
    segment_count: usize,
}

/// Local-disk cache of byte ranges of immutable remote files.
///
/// One cache-wide lock serializes structural mutations (segment insertion,
/// splitting, eviction, the capacity counter); each segment carries its own
/// narrower lock. Lock order is always cache before segment — no code path
/// acquires the cache lock while holding a segment lock.
///
/// Constructed explicitly from a [`Config`] and passed around as
/// `Arc<FileCache>`; dropping the last handle is the teardown. Segments
/// hold only a `Weak` back-reference, so they never extend the cache's
/// lifetime.
pub struct FileCache {
    base_path: PathBuf,
    capacity: u64,
    max_segments: usize,
    max_segment_size: u64,
    wait_timeout: Duration,
    guts: Mutex<CacheGuts>,
}

impl FileCache {
    pub fn new(config: &Config) -> Result<Arc<Self>, CacheError> {
        std::fs::create_dir_all(&config.cache_dir)?;

        Ok(Arc::new(Self {
            base_path: PathBuf::from(&config.cache_dir),
            capacity: config.cache_capacity_bytes,
            max_segments: config.cache_max_segments,
            max_segment_size: config.segment_max_size_bytes,
            wait_timeout: Duration::from_millis(config.download_wait_timeout_ms),
            guts: Mutex::new(CacheGuts {
                files: HashMap::new(),
                queue: VecDeque::new(),
                used_size: 0,
                segment_count: 0,
            }),
        }))
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn used_size(&self) -> u64 {
        self.guts.lock().used_size
    }

    pub fn statistics(&self) -> CacheStatistics {
        let guts = self.guts.lock();
        CacheStatistics {
            used_size: guts.used_size,
            capacity: self.capacity,
            segments: guts.segment_count,
            queued: guts.queue.len(),
        }
    }

    /// Returns the segments covering exactly `[offset, offset + size)` for
    /// `key`, reusing existing segments and creating `Empty` ones for the
    /// gaps, split precisely at existing segment boundaries.
    ///
    /// The returned tiling has no overlap and no gap within the requested
    /// span; segments at the boundaries may extend beyond it when they
    /// pre-existed with a wider range. Fails with
    /// [`CacheError::CorruptLayout`] if the stored layout for the key has
    /// overlapping entries.
    pub fn get_or_set(
        self: &Arc<Self>,
        key: CacheKey,
        offset: u64,
        size: u64,
    ) -> Result<FileSegmentsHolder, CacheError> {
        if size == 0 {
            return Err(CacheError::InvalidOperation {
                detail: "zero-sized read request".to_string(),
                info: format!("key: {key}, offset: {offset}"),
            });
        }
        if offset.checked_add(size).is_none() {
            return Err(CacheError::InvalidOperation {
                detail: "read request overflows the file offset space".to_string(),
                info: format!("key: {key}, offset: {offset}, size: {size}"),
            });
        }
        let range = Range::from_offset_size(offset, size);

        let mut guts = self.guts.lock();
        let guts = &mut *guts;

        let existing = Self::intersecting_segments(guts, key, range)?;

        let mut segments: Vec<Arc<FileSegment>> = Vec::new();
        let mut cursor = range.left;

        for segment in existing {
            let seg_range = segment.range();
            if seg_range.left > cursor {
                self.add_empty_segments(
                    guts,
                    key,
                    Range::new(cursor, seg_range.left - 1),
                    &mut segments,
                );
            }

            segment.increment_hits();
            telemetry::record_cache_hit();
            Self::touch(guts, key, seg_range.left);
            cursor = seg_range.right + 1;
            segments.push(segment);

            if cursor > range.right {
                break;
            }
        }

        if cursor <= range.right {
            self.add_empty_segments(guts, key, Range::new(cursor, range.right), &mut segments);
        }

        for segment in &segments {
            segment.ref_count.fetch_add(1, Ordering::AcqRel);
        }

        trace!(%key, %range, segments = segments.len(), "tiled read request");

        Ok(FileSegmentsHolder::new(segments))
    }

    /// Whether the full `[offset, offset + size)` span of `key` is covered
    /// by fully downloaded segments.
    pub fn contains(&self, key: CacheKey, offset: u64, size: u64) -> bool {
        if size == 0 || offset.checked_add(size).is_none() {
            return false;
        }
        let range = Range::from_offset_size(offset, size);

        let guts = self.guts.lock();
        let Ok(existing) = Self::intersecting_segments(&guts, key, range) else {
            return false;
        };

        let mut cursor = range.left;
        for segment in existing {
            if segment.range().left > cursor || !segment.is_downloaded() {
                return false;
            }
            cursor = segment.range().right + 1;
            if cursor > range.right {
                break;
            }
        }
        cursor > range.right
    }

    /// Attempts to grow global usage by `delta` bytes on behalf of
    /// `segment`, evicting LRU candidates if needed. Candidates with an
    /// active downloader, a nonzero reference count or a state other than
    /// `Downloaded` are skipped. Returns `false`, not an error, when the
    /// space cannot be freed.
    pub(crate) fn try_reserve(&self, segment: &FileSegment, delta: u64) -> bool {
        let key = segment.key();
        let offset = segment.offset();

        let mut guts = self.guts.lock();
        let guts = &mut *guts;

        // The cell may have been force-removed while the downloader was
        // between its segment-side checks and this call.
        if guts
            .files
            .get(&key)
            .and_then(|file| file.get(&offset))
            .is_none()
        {
            debug!(%key, offset, "reservation for a segment no longer owned by the cache");
            telemetry::record_reservation_failure();
            return false;
        }

        if guts.used_size + delta > self.capacity {
            self.evict_until_fits(guts, delta);
        }

        if guts.used_size + delta > self.capacity {
            debug!(
                delta,
                used = guts.used_size,
                capacity = self.capacity,
                segment = %segment.info_for_log(),
                "reservation failed, capacity exhausted"
            );
            telemetry::record_reservation_failure();
            return false;
        }

        let Some(cell) = guts.files.get_mut(&key).and_then(|file| file.get_mut(&offset)) else {
            return false;
        };

        if !cell.queued {
            if guts.queue.len() >= self.max_segments {
                // Element-count pressure: free one LRU slot if possible.
                let mut idx = 0;
                while idx < guts.queue.len() && guts.queue.len() >= self.max_segments {
                    let (qkey, qoffset) = guts.queue[idx];
                    if !Self::try_evict_cell(guts, qkey, qoffset) {
                        idx += 1;
                    }
                }
            }
            let Some(cell) = guts.files.get_mut(&key).and_then(|file| file.get_mut(&offset))
            else {
                return false;
            };
            if guts.queue.len() >= self.max_segments {
                telemetry::record_reservation_failure();
                return false;
            }
            cell.queued = true;
            guts.queue.push_back((key, offset));
        }

        guts.used_size += delta;
        {
            let mut meta = segment.lock_meta();
            meta.reserved_size += delta;
        }
        telemetry::record_cache_stats(guts.used_size, guts.segment_count);

        true
    }

    /// Explicitly removes one unreferenced, non-downloading segment and
    /// deletes its cache file. Fails with an invariant error otherwise.
    pub fn remove(&self, key: CacheKey, offset: u64) -> Result<(), CacheError> {
        let mut guts = self.guts.lock();
        let guts = &mut *guts;

        let Some(cell) = guts.files.get(&key).and_then(|file| file.get(&offset)) else {
            return Err(CacheError::InvalidOperation {
                detail: "removal of an unknown segment".to_string(),
                info: format!("key: {key}, offset: {offset}"),
            });
        };
        let segment = cell.segment.clone();

        {
            let meta = segment.lock_meta();
            if meta.downloader.is_some() {
                return Err(CacheError::InvalidOperation {
                    detail: "removal of a segment with an active downloader".to_string(),
                    info: segment.info_locked(&meta),
                });
            }
            if segment.ref_count() != 0 {
                return Err(CacheError::InvalidOperation {
                    detail: "removal of a referenced segment".to_string(),
                    info: segment.info_locked(&meta),
                });
            }
        }

        Self::remove_cell(guts, key, offset, true);
        Ok(())
    }

    /// Force-removes every segment of `key` from the lookup structures.
    ///
    /// Segments still referenced by live holders (or mid-download) are
    /// detached instead of destroyed: their holders keep reading the
    /// already-downloaded bytes, and the last holder deletes the cache
    /// file. Returns the number of segments removed or detached.
    pub fn remove_file(&self, key: CacheKey) -> usize {
        let mut guts = self.guts.lock();
        let guts = &mut *guts;

        let offsets: Vec<u64> = guts
            .files
            .get(&key)
            .map(|file| file.keys().copied().collect())
            .unwrap_or_default();

        let mut removed = 0;
        for offset in offsets {
            let busy = guts
                .files
                .get(&key)
                .and_then(|file| file.get(&offset))
                .is_some_and(|cell| {
                    cell.segment.ref_count() != 0
                        || cell.segment.lock_meta().downloader.is_some()
                });

            if busy {
                telemetry::record_detach();
            }
            Self::remove_cell(guts, key, offset, !busy);
            removed += 1;
        }

        if removed > 0 {
            debug!(%key, removed, "removed file from cache");
        }
        removed
    }

    /// One line per segment of `key`, for the diagnostics sink.
    pub fn dump_structure(&self, key: CacheKey) -> String {
        let guts = self.guts.lock();
        let mut out = String::new();
        if let Some(file) = guts.files.get(&key) {
            for cell in file.values() {
                out.push_str(&cell.segment.info_for_log());
                out.push('\n');
            }
        }
        out
    }

    // ---- completion and release (cache lock, then segment lock) ----

    /// Applies an explicit completion requested by the downloader.
    pub(crate) fn complete_segment(
        &self,
        segment: &FileSegment,
        new_state: State,
    ) -> Result<(), CacheError> {
        let mut guts = self.guts.lock();
        let guts = &mut *guts;
        let caller = FileSegment::caller_id();

        {
            let meta = segment.lock_meta();
            if meta.detached {
                return Err(CacheError::Detached {
                    info: segment.info_locked(&meta),
                });
            }
            if meta.downloader.as_ref() != Some(&caller) {
                return Err(CacheError::NotDownloader {
                    info: segment.info_locked(&meta),
                });
            }

            let downloaded = segment.downloaded_size();
            match new_state {
                State::Downloaded if downloaded != segment.range().size() => {
                    return Err(CacheError::InvalidOperation {
                        detail: format!(
                            "completion as DOWNLOADED with only {downloaded} of {} bytes",
                            segment.range().size()
                        ),
                        info: segment.info_locked(&meta),
                    });
                }
                State::SkipCache if downloaded != 0 => {
                    return Err(CacheError::InvalidOperation {
                        detail: "completion as SKIP_CACHE with downloaded bytes".to_string(),
                        info: segment.info_locked(&meta),
                    });
                }
                State::Downloaded
                | State::PartiallyDownloaded
                | State::PartiallyDownloadedNoContinuation
                | State::SkipCache => {}
                other => {
                    return Err(CacheError::InvalidOperation {
                        detail: format!("{other} is not a completion state"),
                        info: segment.info_locked(&meta),
                    });
                }
            }
        }

        self.apply_completion(guts, segment, new_state);
        Ok(())
    }

    /// Holder release: drops one reference and completes the segment when
    /// the releasing context abandoned its own download, or when the last
    /// reference leaves a non-terminal segment with no downloader.
    pub(crate) fn release(&self, segment: &Arc<FileSegment>) {
        let mut guts = self.guts.lock();
        let guts = &mut *guts;

        let refs = segment.ref_count.fetch_sub(1, Ordering::AcqRel) - 1;
        let caller = FileSegment::caller_id();

        let (is_downloader, state, detached) = {
            let meta = segment.lock_meta();
            (
                meta.downloader.as_ref() == Some(&caller),
                meta.state,
                meta.detached,
            )
        };

        if detached {
            if is_downloader {
                let mut meta = segment.lock_meta();
                meta.downloader = None;
                segment.notify_waiters();
            }
            if refs == 0 {
                // The last holder of a detached segment owns the file cleanup.
                let path = segment.local_path();
                if path.exists() {
                    if let Err(error) = std::fs::remove_file(path) {
                        warn!(path = %path.display(), "failed to delete detached cache file: {error}");
                    }
                }
            }
            return;
        }

        if is_downloader {
            let mut meta = segment.lock_meta();
            meta.downloader = None;
            segment.notify_waiters();
        }

        let abandoned = is_downloader
            || (refs == 0 && !state.is_terminal() && segment.downloader().is_none());

        if abandoned {
            let downloaded = segment.downloaded_size();
            let outcome = if downloaded == segment.range().size() {
                State::Downloaded
            } else {
                State::PartiallyDownloaded
            };
            debug!(segment = %segment.info_for_log(), "download abandoned by holder release");
            self.apply_completion(guts, segment, outcome);
        }
    }

    // ---- internals, all under the cache lock ----

    fn intersecting_segments(
        guts: &CacheGuts,
        key: CacheKey,
        range: Range,
    ) -> Result<Vec<Arc<FileSegment>>, CacheError> {
        let mut existing: Vec<Arc<FileSegment>> = Vec::new();

        if let Some(file) = guts.files.get(&key) {
            if let Some((_, cell)) = file.range(..=range.left).next_back() {
                if cell.segment.range().intersects(&range) {
                    existing.push(cell.segment.clone());
                }
            }
            let after = (Bound::Excluded(range.left), Bound::Included(range.right));
            for (_, cell) in file.range(after) {
                existing.push(cell.segment.clone());
            }
        }

        let mut last_right: Option<u64> = None;
        for segment in &existing {
            if let Some(previous_right) = last_right {
                if segment.range().left <= previous_right {
                    return Err(CacheError::CorruptLayout {
                        detail: format!(
                            "segment {} for key {key} overlaps the previous segment ending at {previous_right}",
                            segment.range()
                        ),
                    });
                }
            }
            last_right = Some(segment.range().right);
        }

        Ok(existing)
    }

    fn add_empty_segments(
        self: &Arc<Self>,
        guts: &mut CacheGuts,
        key: CacheKey,
        gap: Range,
        out: &mut Vec<Arc<FileSegment>>,
    ) {
        let mut left = gap.left;
        while left <= gap.right {
            let right = std::cmp::min(gap.right, left + self.max_segment_size - 1);
            let range = Range::new(left, right);

            let segment = Arc::new(FileSegment::new(
                key,
                range,
                State::Empty,
                Arc::downgrade(self),
                self.cache_path_for(key, left),
                self.wait_timeout,
            ));

            guts.files.entry(key).or_default().insert(
                left,
                FileSegmentCell {
                    segment: segment.clone(),
                    queued: false,
                },
            );
            guts.segment_count += 1;
            telemetry::record_cache_miss();

            out.push(segment);
            left = right + 1;
        }
    }

    fn touch(guts: &mut CacheGuts, key: CacheKey, offset: u64) {
        if let Some(pos) = guts.queue.iter().position(|entry| *entry == (key, offset)) {
            if let Some(entry) = guts.queue.remove(pos) {
                guts.queue.push_back(entry);
            }
        }
    }

    fn evict_until_fits(&self, guts: &mut CacheGuts, delta: u64) {
        let mut idx = 0;
        while guts.used_size + delta > self.capacity && idx < guts.queue.len() {
            let (key, offset) = guts.queue[idx];
            if !Self::try_evict_cell(guts, key, offset) {
                idx += 1;
            }
        }
    }

    /// Evicts one LRU queue entry if its segment is evictable: fully
    /// downloaded, unreferenced, with no downloader. Reference counts only
    /// change under the cache lock (held here), so the check is stable.
    fn try_evict_cell(guts: &mut CacheGuts, key: CacheKey, offset: u64) -> bool {
        let evictable = {
            let Some(cell) = guts.files.get(&key).and_then(|file| file.get(&offset)) else {
                return false;
            };
            if cell.segment.ref_count() != 0 {
                return false;
            }
            let meta = cell.segment.lock_meta();
            meta.downloader.is_none() && meta.state == State::Downloaded && !meta.detached
        };

        if !evictable {
            return false;
        }

        if let Some(segment) = Self::remove_cell(guts, key, offset, true) {
            debug!(segment = %segment.info_for_log(), "evicted segment");
            telemetry::record_eviction();
        }
        true
    }

    /// Unlinks a cell from the lookup map and LRU queue, returns its
    /// reservation to the capacity counter and detaches the segment.
    /// Deletes the cache file only when `delete_file` is set; for detached
    /// segments with live holders deletion is deferred to the last holder.
    fn remove_cell(
        guts: &mut CacheGuts,
        key: CacheKey,
        offset: u64,
        delete_file: bool,
    ) -> Option<Arc<FileSegment>> {
        let cell = guts.files.get_mut(&key)?.remove(&offset)?;
        if guts.files.get(&key).is_some_and(BTreeMap::is_empty) {
            guts.files.remove(&key);
        }
        guts.segment_count -= 1;

        if cell.queued {
            if let Some(pos) = guts.queue.iter().position(|entry| *entry == (key, offset)) {
                guts.queue.remove(pos);
            }
        }

        let segment = cell.segment;
        {
            let mut meta = segment.lock_meta();
            guts.used_size = guts.used_size.saturating_sub(meta.reserved_size);
            meta.reserved_size = segment.downloaded_size();
            segment.detach_locked(&mut meta);
        }

        if delete_file {
            let path = segment.local_path();
            if path.exists() {
                if let Err(error) = std::fs::remove_file(path) {
                    warn!(path = %path.display(), "failed to delete cache file: {error}");
                }
            }
        }

        telemetry::record_cache_stats(guts.used_size, guts.segment_count);
        Some(segment)
    }

    /// Shared tail of explicit completion and holder-release completion.
    /// Assumes the cache lock is held and the transition was validated.
    fn apply_completion(&self, guts: &mut CacheGuts, segment: &FileSegment, new_state: State) {
        let key = segment.key();
        let offset = segment.offset();
        let downloaded = segment.downloaded_size();

        if let Err(error) = segment.finalize_writer() {
            warn!(segment = %segment.info_for_log(), "failed to finalize cache writer: {error}");
        }

        match new_state {
            State::PartiallyDownloaded | State::PartiallyDownloadedNoContinuation
                if downloaded == 0 =>
            {
                // Nothing on disk: drop the cell so a later request starts
                // from a fresh EMPTY segment.
                {
                    let mut meta = segment.lock_meta();
                    meta.downloader = None;
                    segment.notify_waiters();
                }
                Self::remove_cell(guts, key, offset, false);
            }
            State::SkipCache => {
                {
                    let mut meta = segment.lock_meta();
                    meta.state = State::SkipCache;
                    meta.downloader = None;
                    segment.notify_waiters();
                }
                Self::remove_cell(guts, key, offset, false);
            }
            State::Downloaded
            | State::PartiallyDownloaded
            | State::PartiallyDownloadedNoContinuation => {
                let mut meta = segment.lock_meta();
                let excess = meta.reserved_size.saturating_sub(downloaded);
                if excess > 0 {
                    meta.reserved_size = downloaded;
                    guts.used_size -= excess;
                }
                meta.state = new_state;
                meta.downloader = None;
                segment.notify_waiters();
                drop(meta);
                telemetry::record_cache_stats(guts.used_size, guts.segment_count);
            }
            State::Empty | State::Downloading => {
                // Unreachable: completion states are validated by callers.
            }
        }

        debug!(segment = %segment.info_for_log(), "segment completed");
    }

    fn cache_path_for(&self, key: CacheKey, offset: u64) -> PathBuf {
        self.base_path.join(key.to_hex()).join(offset.to_string())
    }
}
