use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tempfile::TempDir;

use segment_cache::{Config, FileCache, RemoteFileReader};

/// In-memory remote file with deterministic contents and read accounting.
pub struct MockRemote {
    data: Vec<u8>,
    read_count: AtomicU64,
    bytes_read: AtomicU64,
    /// Number of upcoming reads that fail before the remote "recovers".
    fail_budget: AtomicU64,
}

impl MockRemote {
    pub fn new(size: usize) -> Self {
        Self {
            data: (0..size).map(|i| (i % 251) as u8).collect(),
            read_count: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            fail_budget: AtomicU64::new(0),
        }
    }

    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::Relaxed)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn fail_next_reads(&self, count: u64) {
        self.fail_budget.store(count, Ordering::Relaxed);
    }

    pub fn expected(&self, offset: u64, len: usize) -> &[u8] {
        &self.data[offset as usize..offset as usize + len]
    }
}

impl RemoteFileReader for MockRemote {
    fn read(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        if self
            .fail_budget
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "simulated remote failure",
            ));
        }

        let end = offset as usize + len;
        if end > self.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read past end of remote file: {end} > {}", self.data.len()),
            ));
        }

        self.read_count.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(len as u64, Ordering::Relaxed);

        Ok(Bytes::copy_from_slice(&self.data[offset as usize..end]))
    }
}

pub fn test_cache(dir: &TempDir, capacity: u64, max_segment: u64) -> Arc<FileCache> {
    let config = Config {
        cache_dir: dir.path().to_string_lossy().into_owned(),
        cache_capacity_bytes: capacity,
        cache_max_segments: 4096,
        segment_max_size_bytes: max_segment,
        download_wait_timeout_ms: 10_000,
        worker_threads: 4,
        prometheus_textfile_dir: None,
    };
    FileCache::new(&config).expect("failed to create cache")
}
