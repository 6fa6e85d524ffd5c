//! Lightweight in-memory metrics, served by `GET /metrics`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::Serialize;

#[derive(Default)]
struct FederationMetrics {
    total: AtomicU64,
    failed: AtomicU64,
    fallbacks: AtomicU64,
    cleanup_failures: AtomicU64,
    duration_total_ms: AtomicU64,
    duration_max_ms: AtomicU64,
}

static FEDERATION_METRICS: OnceLock<FederationMetrics> = OnceLock::new();

fn metrics() -> &'static FederationMetrics {
    FEDERATION_METRICS.get_or_init(FederationMetrics::default)
}

pub fn record_query(duration_ms: f64, success: bool) {
    let duration_ms = duration_ms.max(0.0) as u64;
    let metrics = metrics();
    metrics.total.fetch_add(1, Ordering::Relaxed);
    if !success {
        metrics.failed.fetch_add(1, Ordering::Relaxed);
    }
    metrics
        .duration_total_ms
        .fetch_add(duration_ms, Ordering::Relaxed);
    metrics
        .duration_max_ms
        .fetch_max(duration_ms, Ordering::Relaxed);
}

/// A multi-table query left the optimized path.
pub fn record_fallback() {
    metrics().fallbacks.fetch_add(1, Ordering::Relaxed);
}

/// A temp table could not be dropped.
pub fn record_cleanup_failure() {
    metrics().cleanup_failures.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Serialize)]
pub struct FederationMetricsSnapshot {
    pub total: u64,
    pub failed: u64,
    pub fallbacks: u64,
    pub cleanup_failures: u64,
    pub avg_ms: Option<f64>,
    pub max_ms: Option<u64>,
}

pub fn snapshot() -> FederationMetricsSnapshot {
    let metrics = metrics();
    let total = metrics.total.load(Ordering::Relaxed);
    let duration_total = metrics.duration_total_ms.load(Ordering::Relaxed);
    let max_ms = metrics.duration_max_ms.load(Ordering::Relaxed);

    let avg_ms = if total > 0 {
        Some(duration_total as f64 / total as f64)
    } else {
        None
    };

    FederationMetricsSnapshot {
        total,
        failed: metrics.failed.load(Ordering::Relaxed),
        fallbacks: metrics.fallbacks.load(Ordering::Relaxed),
        cleanup_failures: metrics.cleanup_failures.load(Ordering::Relaxed),
        avg_ms,
        max_ms: if max_ms > 0 { Some(max_ms) } else { None },
    }
}
