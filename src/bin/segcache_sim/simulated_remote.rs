use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;

use segment_cache::RemoteFileReader;

/// One simulated remote file with deterministic contents.
///
/// The byte at each absolute offset is a pure function of the file seed and
/// the offset, so any range read can be verified without storing the file.
pub struct SimulatedRemote {
    file_seed: u64,
    file_size: u64,
    base_latency: Duration,
    throughput_bps: u64,
    read_count: AtomicU64,
    bytes_read: AtomicU64,
}

impl SimulatedRemote {
    pub fn new(
        file_seed: u64,
        file_size: u64,
        base_latency: Duration,
        throughput_bps: u64,
    ) -> Self {
        Self {
            file_seed,
            file_size,
            base_latency,
            throughput_bps,
            read_count: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
        }
    }

    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::Relaxed)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// The expected contents of `[offset, offset + len)`, for verification.
    pub fn expected_bytes(&self, offset: u64, len: usize) -> Vec<u8> {
        (0..len as u64)
            .map(|i| byte_at(self.file_seed, offset + i))
            .collect()
    }

    fn simulate_latency(&self, body_len: usize) {
        let transfer_delay = if self.throughput_bps > 0 {
            Duration::from_secs_f64(body_len as f64 / self.throughput_bps as f64)
        } else {
            Duration::ZERO
        };
        let total = self.base_latency + transfer_delay;
        if !total.is_zero() {
            std::thread::sleep(total);
        }
    }
}

impl RemoteFileReader for SimulatedRemote {
    fn read(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        if offset + len as u64 > self.file_size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "read of [{offset}, {}) beyond file size {}",
                    offset + len as u64,
                    self.file_size
                ),
            ));
        }

        self.read_count.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(len as u64, Ordering::Relaxed);

        self.simulate_latency(len);

        Ok(Bytes::from(self.expected_bytes(offset, len)))
    }
}

fn byte_at(seed: u64, offset: u64) -> u8 {
    (seed
        .wrapping_add(offset)
        .wrapping_mul(0x9e37_79b9_7f4a_7c15)
        >> 56) as u8
}
