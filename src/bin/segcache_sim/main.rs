mod simulated_remote;
mod workload;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;

use segment_cache::{CacheKey, CachedFileReader, Config, FileCache, RemoteFileReader, telemetry};

use simulated_remote::SimulatedRemote;
use workload::{Pattern, ReadOp};

#[derive(Parser, Debug)]
#[command(name = "segcache_sim", about = "Remote-file segment cache simulator")]
struct Args {
    /// Number of simulated remote files
    #[arg(long, default_value_t = 100)]
    num_files: usize,

    /// Size of each remote file in bytes
    #[arg(long, default_value_t = 4_194_304)]
    file_size: u64,

    /// Minimum read size in bytes
    #[arg(long, default_value_t = 4096)]
    min_read_size: u64,

    /// Maximum read size in bytes
    #[arg(long, default_value_t = 262_144)]
    max_read_size: u64,

    /// Base round-trip latency per remote read (ms)
    #[arg(long, default_value_t = 5)]
    latency_ms: u64,

    /// Remote bandwidth limit in bytes/sec (0 = unlimited)
    #[arg(long, default_value_t = 100_000_000)]
    throughput_bytes_per_sec: u64,

    /// Cache directory (recreated from scratch on startup)
    #[arg(long, default_value = "/tmp/segcache_sim")]
    cache_dir: String,

    /// Cache byte limit
    #[arg(long, default_value_t = 100_000_000)]
    cache_capacity: u64,

    /// Cache segment limit
    #[arg(long, default_value_t = 100_000)]
    cache_max_segments: usize,

    /// Maximum segment size in bytes
    #[arg(long, default_value_t = 1_048_576)]
    segment_size: u64,

    /// Download wait timeout (ms)
    #[arg(long, default_value_t = 10_000)]
    wait_timeout_ms: u64,

    /// Access pattern
    #[arg(long, value_enum, default_value_t = Pattern::Zipf)]
    pattern: Pattern,

    /// Zipf skew parameter
    #[arg(long, default_value_t = 1.0)]
    zipf_exponent: f64,

    /// Total range reads to issue
    #[arg(long, default_value_t = 100_000)]
    num_requests: usize,

    /// Parallel reader threads
    #[arg(long, default_value_t = 16)]
    concurrency: usize,

    /// Print progress every N requests (0 = off)
    #[arg(long, default_value_t = 10_000)]
    progress_interval: usize,

    /// Disable caching (reads go directly to the remote)
    #[arg(long, default_value_t = false)]
    no_cache: bool,

    /// Write Prometheus metrics to this textfile collector directory
    #[arg(long)]
    metrics_dir: Option<String>,

    /// RNG seed for reproducibility
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> segment_cache::Result<()> {
    let args = Args::parse();
    telemetry::init_tracing();

    // Every run starts from a cold cache.
    let _ = std::fs::remove_dir_all(&args.cache_dir);

    let config = Config {
        cache_dir: args.cache_dir.clone(),
        cache_capacity_bytes: args.cache_capacity,
        cache_max_segments: args.cache_max_segments,
        segment_max_size_bytes: args.segment_size,
        download_wait_timeout_ms: args.wait_timeout_ms,
        worker_threads: args.concurrency,
        prometheus_textfile_dir: args.metrics_dir.clone(),
    };

    let cache = FileCache::new(&config)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let metrics_handle = config.prometheus_textfile_dir.clone().map(|dir| {
        segment_cache::metrics_writer::spawn_metrics_writer(
            dir,
            Duration::from_secs(1),
            shutdown.clone(),
        )
    });

    let remotes: Vec<Arc<SimulatedRemote>> = (0..args.num_files)
        .map(|idx| {
            Arc::new(SimulatedRemote::new(
                args.seed.wrapping_add(idx as u64),
                args.file_size,
                Duration::from_millis(args.latency_ms),
                args.throughput_bytes_per_sec,
            ))
        })
        .collect();

    let readers: Vec<Arc<CachedFileReader>> = remotes
        .iter()
        .enumerate()
        .map(|(idx, remote)| {
            let key = CacheKey::from_path(&format!("sim/file-{idx}"));
            Arc::new(CachedFileReader::new(
                cache.clone(),
                key,
                remote.clone() as Arc<dyn RemoteFileReader>,
            ))
        })
        .collect();

    let requests = workload::generate_workload(
        args.pattern,
        args.num_files,
        args.file_size,
        args.min_read_size,
        args.max_read_size,
        args.num_requests,
        args.zipf_exponent,
        args.seed,
    );

    eprintln!("=== Segment Cache Simulation ===");
    eprintln!(
        "Files: {} x {} bytes, reads: {}B - {}B",
        args.num_files, args.file_size, args.min_read_size, args.max_read_size
    );
    if args.no_cache {
        eprintln!("Cache: disabled (--no-cache)");
    } else {
        eprintln!(
            "Cache: {} bytes, {} segments max, segment size {}",
            args.cache_capacity, args.cache_max_segments, args.segment_size
        );
    }
    eprintln!(
        "Workload: {:?} (s={}), {} requests, concurrency={}",
        args.pattern, args.zipf_exponent, args.num_requests, args.concurrency
    );
    eprintln!(
        "Remote: latency={}ms, throughput={} B/s",
        args.latency_ms, args.throughput_bytes_per_sec
    );
    eprintln!();

    let chunk_size = requests.len().div_ceil(args.concurrency);
    let chunks: Vec<Vec<ReadOp>> = requests.chunks(chunk_size).map(|c| c.to_vec()).collect();

    let completed = Arc::new(AtomicU64::new(0));
    let errors = Arc::new(AtomicU64::new(0));
    let corruptions = Arc::new(AtomicU64::new(0));
    let progress_interval = args.progress_interval;
    let total_requests = args.num_requests;
    let no_cache = args.no_cache;

    let start = Instant::now();

    let mut handles = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let remotes = remotes.clone();
        let readers = readers.clone();
        let completed = completed.clone();
        let errors = errors.clone();
        let corruptions = corruptions.clone();

        handles.push(std::thread::spawn(move || {
            let mut latencies = Vec::with_capacity(chunk.len());

            for op in chunk {
                let remote = &remotes[op.file];

                let op_start = Instant::now();
                let result = if no_cache {
                    remote.read(op.offset, op.len as usize).map_err(|e| e.into())
                } else {
                    readers[op.file].read(op.offset, op.len)
                };
                latencies.push(op_start.elapsed());

                match result {
                    Ok(data) => {
                        if data != remote.expected_bytes(op.offset, op.len as usize) {
                            corruptions.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(_) => {
                        errors.fetch_add(1, Ordering::Relaxed);
                    }
                }

                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                if progress_interval > 0 && done % (progress_interval as u64) == 0 {
                    let wall = start.elapsed().as_secs_f64();
                    let rps = done as f64 / wall;
                    eprintln!("[{wall:.1}s] {done}/{total_requests} requests ({rps:.0} req/s)");
                }
            }

            latencies
        }));
    }

    let mut all_latencies: Vec<Duration> = Vec::with_capacity(total_requests);
    for handle in handles {
        all_latencies.extend(handle.join().expect("reader thread panicked"));
    }

    let total_duration = start.elapsed();
    let total_errors = errors.load(Ordering::Relaxed);
    let total_corruptions = corruptions.load(Ordering::Relaxed);

    let remote_reads: u64 = remotes.iter().map(|r| r.read_count()).sum();
    let remote_bytes: u64 = remotes.iter().map(|r| r.bytes_read()).sum();
    let requested_bytes: u64 = requests.iter().map(|op| op.len).sum();
    let cached_fraction = if requested_bytes > 0 {
        100.0 * (1.0 - remote_bytes as f64 / requested_bytes as f64)
    } else {
        0.0
    };

    all_latencies.sort();
    let p50 = percentile(&all_latencies, 50.0);
    let p99 = percentile(&all_latencies, 99.0);
    let mean = if all_latencies.is_empty() {
        Duration::ZERO
    } else {
        all_latencies.iter().sum::<Duration>() / all_latencies.len() as u32
    };

    let throughput = if total_duration.as_secs_f64() > 0.0 {
        all_latencies.len() as f64 / total_duration.as_secs_f64()
    } else {
        0.0
    };

    let stats = cache.statistics();

    eprintln!();
    eprintln!("=== Results ===");
    eprintln!("Total requests:  {}", all_latencies.len());
    eprintln!("Remote reads:    {remote_reads}");
    eprintln!(
        "Remote bytes:    {remote_bytes} of {requested_bytes} requested ({cached_fraction:.1}% served from cache)"
    );
    eprintln!("Errors:          {total_errors}");
    eprintln!("Corruptions:     {total_corruptions}");
    eprintln!("Duration:        {:.2}s", total_duration.as_secs_f64());
    eprintln!("Throughput:      {throughput:.0} req/s");
    eprintln!("Latency p50:     {:.2}ms", p50.as_secs_f64() * 1000.0);
    eprintln!("Latency p99:     {:.2}ms", p99.as_secs_f64() * 1000.0);
    eprintln!("Latency mean:    {:.2}ms", mean.as_secs_f64() * 1000.0);
    eprintln!();
    eprintln!(
        "Cache: {} / {} bytes used, {} segments",
        stats.used_size, stats.capacity, stats.segments
    );

    if let Some(handle) = metrics_handle {
        shutdown.store(true, Ordering::Relaxed);
        let _ = handle.join();
    }

    Ok(())
}

fn percentile(sorted: &[Duration], pct: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((pct / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
