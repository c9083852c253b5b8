//! HTTP middleware for request tracking and metrics.

use crate::core::logging::{generate_request_id, REQUEST_ID, REQUEST_ID_HEADER};
use crate::core::metrics::get_metrics;
use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;

/// Longest request ID accepted from a client before a fresh one is generated.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Resolve the identity a request is rate limited under.
///
/// The peer address is used unless `trust_forwarded_for` is set and the
/// request carries an `X-Forwarded-For` header, in which case its first hop
/// wins.
pub fn client_identity(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded_for: bool,
) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(addr) = forwarded {
            return addr.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn inbound_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
}

/// Assign a request ID, run the request inside its scope and echo it back.
pub async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id = inbound_request_id(request.headers()).unwrap_or_else(generate_request_id);

    let mut response = REQUEST_ID
        .scope(request_id.clone(), next.run(request))
        .await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

/// Metrics middleware for tracking request statistics.
pub struct MetricsMiddleware;

impl MetricsMiddleware {
    /// Track request metrics: active requests, duration and status codes.
    pub async fn track_metrics(request: Request, next: Next) -> Response {
        let endpoint = request.uri().path().to_string();
        let method = request.method().to_string();

        // Skip metrics endpoint itself to avoid recursion
        if endpoint == "/metrics" {
            return next.run(request).await;
        }

        let metrics = get_metrics();
        metrics
            .active_requests
            .with_label_values(&[&endpoint])
            .inc();

        let start = Instant::now();
        let response = next.run(request).await;
        let duration = start.elapsed().as_secs_f64();
        let status_code = response.status().as_u16().to_string();

        metrics
            .request_count
            .with_label_values(&[&method, &endpoint, &status_code])
            .inc();
        metrics
            .request_duration
            .with_label_values(&[&method, &endpoint])
            .observe(duration);
        metrics
            .active_requests
            .with_label_values(&[&endpoint])
            .dec();

        tracing::debug!(
            method = %method,
            endpoint = %endpoint,
            status = %status_code,
            duration_secs = format!("{:.3}", duration),
            "Request completed"
        );

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::init_metrics;
    use crate::core::logging::get_request_id;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn peer() -> Option<SocketAddr> {
        Some("192.168.1.7:51234".parse().unwrap())
    }

    #[test]
    fn test_client_identity_uses_peer_ip() {
        let headers = HeaderMap::new();
        assert_eq!(client_identity(&headers, peer(), false), "192.168.1.7");
    }

    #[test]
    fn test_client_identity_ignores_forwarded_when_untrusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
        assert_eq!(client_identity(&headers, peer(), false), "192.168.1.7");
    }

    #[test]
    fn test_client_identity_uses_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.9, 10.0.0.1".parse().unwrap(),
        );
        assert_eq!(client_identity(&headers, peer(), true), "203.0.113.9");
    }

    #[test]
    fn test_client_identity_without_peer() {
        assert_eq!(client_identity(&HeaderMap::new(), None, true), "unknown");
    }

    #[tokio::test]
    async fn test_request_id_generated_and_echoed() {
        async fn handler() -> String {
            get_request_id()
        }

        let app = Router::new()
            .route("/", get(handler))
            .layer(middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let header = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(header.len(), 36);
        assert_eq!(String::from_utf8(body.to_vec()).unwrap(), header);
    }

    #[tokio::test]
    async fn test_request_id_reused_from_client() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/")
                    .header(REQUEST_ID_HEADER, "client-id-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            "client-id-1"
        );
    }

    #[tokio::test]
    async fn test_metrics_middleware_passes_response_through() {
        init_metrics();

        let app = Router::new()
            .route("/test", get(|| async { "test" }))
            .layer(middleware::from_fn(MetricsMiddleware::track_metrics));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
