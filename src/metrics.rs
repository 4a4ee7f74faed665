//! Prometheus metrics for Filegate.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides a middleware for HTTP RED
//! metrics, and exposes the `/metrics` endpoint handler.  Domain counters
//! (uploads, downloads, logins) are recorded through the small helpers at
//! the bottom so call sites stay one line.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "filegate_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "filegate_http_request_duration_seconds";

/// Completed uploads (counter). Labels: strategy.
pub const UPLOADS_TOTAL: &str = "filegate_uploads_total";

/// Bytes accepted by completed uploads (counter).
pub const BYTES_UPLOADED_TOTAL: &str = "filegate_bytes_uploaded_total";

/// Downloads that began streaming (counter).
pub const DOWNLOADS_TOTAL: &str = "filegate_downloads_total";

/// Login attempts (counter). Labels: outcome.
pub const LOGINS_TOTAL: &str = "filegate_logins_total";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent.
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(UPLOADS_TOTAL, "Completed uploads by transfer strategy");
    describe_counter!(BYTES_UPLOADED_TOTAL, "Total bytes uploaded");
    describe_counter!(DOWNLOADS_TOTAL, "Downloads that began streaming");
    describe_counter!(LOGINS_TOTAL, "Login attempts by outcome");
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// `/metrics` itself is not instrumented.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "path" => path,
        "status" => status
    )
    .increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

/// Map a request path to a bounded label set.
fn normalize_path(path: &str) -> &'static str {
    const ROUTES: &[&str] = &[
        "/ping",
        "/health",
        "/openapi.json",
        "/auth/username",
        "/auth/register",
        "/auth/login",
        "/auth/logout",
        "/auth/me",
        "/auth/users",
        "/auth/sessions",
        "/auth/reset",
        "/storage/upload",
        "/storage/download",
        "/storage/list",
        "/anonymous/upload",
        "/anonymous/download",
        "/anonymous/list",
    ];
    ROUTES
        .iter()
        .find(|route| **route == path)
        .copied()
        .unwrap_or("/{other}")
}

// -- Domain counters ----------------------------------------------------------

/// Record a completed upload.
pub fn record_upload(strategy: &'static str, bytes: u64) {
    counter!(UPLOADS_TOTAL, "strategy" => strategy).increment(1);
    counter!(BYTES_UPLOADED_TOTAL).increment(bytes);
}

pub fn record_download() {
    counter!(DOWNLOADS_TOTAL).increment(1);
}

/// Record a login attempt outcome (`ok`, `not_found`, `invalid`, `error`).
pub fn record_login(outcome: &'static str) {
    counter!(LOGINS_TOTAL, "outcome" => outcome).increment(1);
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics disabled").into_response(),
    }
}
