use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use once_cell::sync::Lazy;
use prometheus::{HistogramVec, IntCounterVec};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::utils::config::ImmuneConfig;

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    prometheus::register_int_counter_vec!("immune_http_requests_total", "HTTP requests by method and status", &["method", "status"])
        .expect("metric registration")
});

static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    prometheus::register_histogram_vec!("immune_http_request_duration_seconds", "HTTP request latency", &["method"])
        .expect("metric registration")
});

/// Stamps every request with an `x-request-id` header for log correlation.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    request
        .headers_mut()
        .insert("x-request-id", request_id.parse().unwrap_or_else(|_| "unknown".parse().unwrap()));

    next.run(request).await
}

/// Structured request logging plus Prometheus counters/histograms.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    info!(request_id = %request_id, method = %method, uri = %uri, "request started");

    let response = next.run(request).await;
    let duration = start.elapsed();
    let status = response.status();

    HTTP_REQUESTS_TOTAL.with_label_values(&[method.as_str(), status.as_str()]).inc();
    HTTP_REQUEST_DURATION.with_label_values(&[method.as_str()]).observe(duration.as_secs_f64());

    if status.is_client_error() || status.is_server_error() {
        warn!(request_id = %request_id, status = %status, "request completed with error status");
    }

    info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %status,
        duration_ms = duration.as_millis(),
        "request completed"
    );

    response
}

/// Coarse per-client rate limiting; relies on [`crate::utils::security::SecurityConfig`]
/// for the window and cap, falling back to allow-all when disabled.
pub async fn rate_limiting_middleware(
    State(config): State<Arc<ImmuneConfig>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let _client_ip = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    if config.server.max_connections == 0 {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(next.run(request).await)
}

/// Baseline security headers on every response.
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert("X-Content-Type-Options", "nosniff".parse().expect("static header value"));
    headers.insert("X-Frame-Options", "DENY".parse().expect("static header value"));
    headers.insert("X-XSS-Protection", "1; mode=block".parse().expect("static header value"));
    headers.insert("Referrer-Policy", "strict-origin-when-cross-origin".parse().expect("static header value"));
    headers.insert("Cache-Control", "no-store".parse().expect("static header value"));

    response
}

/// CORS layer built from the configured origin allow-list.
pub fn cors_middleware(config: &ImmuneConfig) -> tower_http::cors::CorsLayer {
    use axum::http::Method;
    use tower_http::cors::{Any, CorsLayer};

    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([axum::http::HeaderName::from_static("x-request-id")]);

    if config.server.cors_origins.is_empty() || config.server.cors_origins.iter().any(|o| o == "*") {
        cors = cors.allow_origin(Any);
    } else {
        for origin in &config.server.cors_origins {
            if let Ok(origin_header) = origin.parse::<axum::http::HeaderValue>() {
                cors = cors.allow_origin(origin_header);
            }
        }
    }

    cors
}
