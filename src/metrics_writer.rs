use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use prometheus::{Encoder, TextEncoder};
use tracing::{debug, error, info};

use crate::{CARGO_CRATE_NAME, telemetry};

/// Starts the Prometheus metrics writer background thread.
///
/// Periodically writes the crate's registry to a text file in Prometheus
/// format, which node_exporter's textfile collector can pick up. Writes
/// are atomic (write to `.tmp`, then rename) so the collector never reads
/// a partial file. The thread exits when `shutdown` is set.
pub fn spawn_metrics_writer(
    textfile_dir: String,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let tmp_path = format!("{textfile_dir}/{CARGO_CRATE_NAME}.prom.tmp");
        let final_path = format!("{textfile_dir}/{CARGO_CRATE_NAME}.prom");

        info!("Prometheus metrics writer started, writing to {final_path}");

        while !shutdown.load(Ordering::Relaxed) {
            let metric_families = telemetry::PROMETHEUS_REGISTRY.gather();

            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();

            if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
                error!("Failed to encode Prometheus metrics: {e}");
            } else {
                match write_metrics_atomic(&tmp_path, &final_path, &buffer) {
                    Ok(()) => {
                        debug!("Wrote {} bytes to {final_path}", buffer.len());
                    }
                    Err(e) => {
                        error!("Failed to write metrics file: {e}");
                    }
                }
            }

            std::thread::sleep(interval);
        }
    })
}

/// Write metrics to file atomically using write-to-temp + rename.
fn write_metrics_atomic(tmp_path: &str, final_path: &str, data: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;

    std::fs::rename(tmp_path, final_path)?;

    Ok(())
}
