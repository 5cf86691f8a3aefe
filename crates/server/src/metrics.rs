//! Prometheus metrics for the larder server.
//!
//! The `/metrics` endpoint is not subject to client scoping. Mount counts and
//! response totals are aggregate values, but the endpoint should still be
//! restricted to the scraper at the network level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{self, Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static HTTP_RESPONSES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "larder_http_responses_total",
            "Total HTTP responses by status class",
        ),
        &["status"],
    )
    .expect("metric creation failed")
});

pub static SCOPE_REJECTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "larder_scope_rejections_total",
            "Requests rejected by client scoping, by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

pub static PACKAGE_MOUNTS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "larder_package_mounts",
        "Number of directories served as package repositories",
    )
    .expect("metric creation failed")
});

pub static PACKAGES_INDEXED: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "larder_packages_indexed",
        "Number of packages across all repositories",
    )
    .expect("metric creation failed")
});

pub static PACKAGES_FAILED: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "larder_packages_failed",
        "Number of package archives that could not be parsed",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so tests and embedders may call it repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(HTTP_RESPONSES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SCOPE_REJECTIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PACKAGE_MOUNTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PACKAGES_INDEXED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PACKAGES_FAILED.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Count a response by its status class (`2xx`, `4xx`, ...).
pub fn record_response(status: StatusCode) {
    let class = match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    };
    HTTP_RESPONSES.with_label_values(&[class]).inc();
}

/// Count a request rejected by client scoping.
pub fn record_scope_rejection(reason: &str) {
    SCOPE_REJECTIONS.with_label_values(&[reason]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        // panics if any metric creation failed
        register_metrics();
        register_metrics();
    }

    #[test]
    fn test_record_response_by_class() {
        let before = HTTP_RESPONSES.with_label_values(&["4xx"]).get();
        record_response(StatusCode::NOT_FOUND);
        assert!(HTTP_RESPONSES.with_label_values(&["4xx"]).get() > before);
    }
}
