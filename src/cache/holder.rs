use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::FileSegment;

/// The segments satisfying one read request, in offset order.
///
/// Owns no data, only reference-count entries into the segments it carries.
/// Dropping the holder releases each reference under the cache lock; a
/// segment whose download was abandoned (its downloader released without
/// completing, or the last reference left a non-terminal segment) is
/// completed so the cache can evict it or a future caller can resume it.
pub struct FileSegmentsHolder {
    segments: Vec<Arc<FileSegment>>,
}

impl FileSegmentsHolder {
    pub(super) fn new(segments: Vec<Arc<FileSegment>>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Arc<FileSegment>] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<FileSegment>> {
        self.segments.iter()
    }
}

impl Drop for FileSegmentsHolder {
    fn drop(&mut self) {
        for segment in &self.segments {
            match segment.cache_handle() {
                Some(cache) => cache.release(segment),
                // Cache already torn down; only the count needs fixing.
                None => {
                    segment.ref_count.fetch_sub(1, Ordering::AcqRel);
                }
            }
        }
    }
}

impl std::fmt::Display for FileSegmentsHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&segment.info_for_log())?;
        }
        Ok(())
    }
}
