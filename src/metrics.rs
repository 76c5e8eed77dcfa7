//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Federation Metrics
    pub static ref ACTIVITIES_RECEIVED: IntCounterVec = IntCounterVec::new(
        Opts::new("fedhost_activities_received_total", "Total number of inbound activities dispatched"),
        &["activity_type", "route"]
    ).expect("metric can be created");
    pub static ref ACTIVITIES_FAILED: IntCounterVec = IntCounterVec::new(
        Opts::new("fedhost_activities_failed_total", "Total number of inbound activities whose handler failed"),
        &["activity_type", "kind"]
    ).expect("metric can be created");
    pub static ref ACTIVITIES_SENT: IntCounterVec = IntCounterVec::new(
        Opts::new("fedhost_activities_sent_total", "Total number of outbound activities delivered"),
        &["activity_type", "status"]
    ).expect("metric can be created");
    pub static ref REMOTE_FETCH_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "fedhost_remote_fetch_duration_seconds",
            "Remote document fetch duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["status"]
    ).expect("metric can be created");

    // Cache Metrics
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedhost_cache_hits_total", "Total number of cache hits"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedhost_cache_misses_total", "Total number of cache misses"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_SIZE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("fedhost_cache_size", "Current number of items in cache"),
        &["cache_name"]
    ).expect("metric can be created");

    // Lock Metrics
    pub static ref RESOURCE_LOCKS: IntGauge = IntGauge::new(
        "fedhost_resource_locks",
        "Current number of tracked per-resource locks"
    ).expect("metric can be created");

    // Tenant Metrics
    pub static ref TENANTS_ACTIVE: IntGauge = IntGauge::new(
        "fedhost_tenants_active",
        "Number of tenants currently served"
    ).expect("metric can be created");
    pub static ref CONFIG_RELOADS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedhost_config_reloads_total", "Configuration snapshots applied"),
        &["status"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedhost_errors_total", "Total number of errors returned over HTTP"),
        &["kind"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(ACTIVITIES_RECEIVED.clone()))
        .expect("ACTIVITIES_RECEIVED can be registered");
    REGISTRY
        .register(Box::new(ACTIVITIES_FAILED.clone()))
        .expect("ACTIVITIES_FAILED can be registered");
    REGISTRY
        .register(Box::new(ACTIVITIES_SENT.clone()))
        .expect("ACTIVITIES_SENT can be registered");
    REGISTRY
        .register(Box::new(REMOTE_FETCH_DURATION_SECONDS.clone()))
        .expect("REMOTE_FETCH_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(CACHE_HITS_TOTAL.clone()))
        .expect("CACHE_HITS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_MISSES_TOTAL.clone()))
        .expect("CACHE_MISSES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_SIZE.clone()))
        .expect("CACHE_SIZE can be registered");
    REGISTRY
        .register(Box::new(RESOURCE_LOCKS.clone()))
        .expect("RESOURCE_LOCKS can be registered");
    REGISTRY
        .register(Box::new(TENANTS_ACTIVE.clone()))
        .expect("TENANTS_ACTIVE can be registered");
    REGISTRY
        .register(Box::new(CONFIG_RELOADS_TOTAL.clone()))
        .expect("CONFIG_RELOADS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}

/// Render all registered metrics in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
