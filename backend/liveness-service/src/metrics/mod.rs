//! Liveness reconciler metrics
//!
//! Prometheus metrics for the expiration handler and the scheduled sweep

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use std::time::Duration;

static EXPIRATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "liveness_expirations_total",
        "Expired liveness keys handled, by outcome",
        &["outcome"]
    )
    .expect("Failed to register liveness expirations metric")
});

static SWEEP_RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "liveness_sweep_runs_total",
        "Scheduled liveness sweeps (success/error)",
        &["backend", "status"]
    )
    .expect("Failed to register liveness sweep runs metric")
});

static SWEEP_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "liveness_sweep_duration_seconds",
        "Duration of scheduled liveness sweeps",
        &["backend"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .expect("Failed to register liveness sweep duration metric")
});

static PROBES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "liveness_probes_total",
        "Playback health probes after retries, by result",
        &["backend", "result"]
    )
    .expect("Failed to register liveness probes metric")
});

static TEARDOWNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "liveness_teardowns_total",
        "Sessions removed by teardown, by remark",
        &["remark"]
    )
    .expect("Failed to register liveness teardowns metric")
});

/// Record how an expired key was handled (ignored/corrupt/rearmed/torn_down)
pub fn record_expiration(outcome: &str) {
    EXPIRATIONS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record sweep result and duration for one backend
pub fn record_sweep(backend: &str, status: &str, duration: Duration) {
    SWEEP_RUNS_TOTAL.with_label_values(&[backend, status]).inc();
    SWEEP_DURATION_SECONDS
        .with_label_values(&[backend])
        .observe(duration.as_secs_f64());
}

pub fn record_probe(backend: &str, healthy: bool) {
    let result = if healthy { "healthy" } else { "unhealthy" };
    PROBES_TOTAL.with_label_values(&[backend, result]).inc();
}

pub fn record_teardown(remark: &str, count: u64) {
    TEARDOWNS_TOTAL.with_label_values(&[remark]).inc_by(count);
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
