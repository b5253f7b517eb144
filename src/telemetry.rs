use std::sync::{LazyLock, Once};

use prometheus::{IntCounter, IntGauge, Registry};
use tracing_subscriber::EnvFilter;

// Prometheus registry and metrics

pub(crate) static PROMETHEUS_REGISTRY: LazyLock<Registry> = LazyLock::new(|| {
    Registry::new_custom(Some("segment_cache".to_string()), None)
        .expect("Failed to create Prometheus registry")
});

static PROM_CACHE_HIT: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "segment_hit_total",
        "Number of reused segments across lookups",
    )
    .unwrap();
    PROMETHEUS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

static PROM_CACHE_MISS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "segment_miss_total",
        "Number of empty segments created on cache misses",
    )
    .unwrap();
    PROMETHEUS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

static PROM_EVICTION: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new("eviction_total", "Number of evicted segments").unwrap();
    PROMETHEUS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

static PROM_RESERVATION_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "reservation_failed_total",
        "Number of space reservations denied under capacity pressure",
    )
    .unwrap();
    PROMETHEUS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

static PROM_DETACH: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "detached_total",
        "Number of segments detached while still referenced",
    )
    .unwrap();
    PROMETHEUS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

static PROM_USED_BYTES: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new("used_bytes", "Current reserved cache size in bytes").unwrap();
    PROMETHEUS_REGISTRY
        .register(Box::new(gauge.clone()))
        .unwrap();
    gauge
});

static PROM_SEGMENT_COUNT: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new("segment_count", "Current number of live segments").unwrap();
    PROMETHEUS_REGISTRY
        .register(Box::new(gauge.clone()))
        .unwrap();
    gauge
});

/// Initializes the tracing subscriber. Safe to call more than once; only
/// the first call installs the subscriber.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    });
}

pub(crate) fn record_cache_hit() {
    PROM_CACHE_HIT.inc();
}

pub(crate) fn record_cache_miss() {
    PROM_CACHE_MISS.inc();
}

pub(crate) fn record_eviction() {
    PROM_EVICTION.inc();
}

pub(crate) fn record_reservation_failure() {
    PROM_RESERVATION_FAILED.inc();
}

pub(crate) fn record_detach() {
    PROM_DETACH.inc();
}

pub(crate) fn record_cache_stats(used_bytes: u64, segment_count: usize) {
    PROM_USED_BYTES.set(used_bytes as i64);
    PROM_SEGMENT_COUNT.set(segment_count as i64);
}
