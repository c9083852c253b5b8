//! Mock-based tests for the relay endpoints.
//!
//! These tests use wiremock to simulate the provider and drive requests
//! through the full router, middleware included.

use autoreply_proxy::{
    api::{build_http_client, build_router, AppState},
    core::{init_metrics, AppConfig},
};
use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::{
    matchers::{body_partial_json, body_string_contains, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Config pointing at the mock provider, with instant retries.
fn mock_config(mock_server: &MockServer) -> AppConfig {
    let mut config = AppConfig::default();
    config.openai_api_key = Some("sk-test".to_string());
    config.api_base = mock_server.uri();
    config.request_timeout_secs = 5;
    config.retry.backoff_base_secs = 0.0;
    config
}

fn create_test_app(config: AppConfig) -> Router {
    init_metrics();
    let http_client =
        build_http_client(config.request_timeout()).expect("Failed to build HTTP client");
    let state = Arc::new(AppState::new(config, http_client));
    build_router(state).layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 1], 40000))))
}

async fn post_json(
    app: &Router,
    uri: &str,
    body: Value,
    headers: &[(&str, &str)],
) -> (StatusCode, HeaderMap, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, body)
}

#[tokio::test]
async fn test_generate_normalizes_mixed_choices() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "max_tokens": 400,
            "n": 2
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "A"}},
                {"index": 1, "text": "B"}
            ]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_test_app(mock_config(&mock_server));
    let (status, _, body) = post_json(
        &app,
        "/generate",
        json!({"emailContent": "Hi", "multiple": true}),
        &[],
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "A");
    assert_eq!(body["replies"], json!(["A", "B"]));
    assert_eq!(body["raw"]["id"], "chatcmpl-1");
}

#[tokio::test]
async fn test_generate_synthesizes_message_from_email() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [{
                "role": "user",
                "content": "Write a concise reply for this email:\n\nAre we still on for Friday?"
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "Yes, see you then."}}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_test_app(mock_config(&mock_server));
    let (status, _, body) = post_json(
        &app,
        "/generate",
        json!({"emailContent": "Are we still on for Friday?"}),
        &[],
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "Yes, see you then.");
}

#[tokio::test]
async fn test_generate_forwards_explicit_messages() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "model": "gpt-4o",
            "max_tokens": 64,
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "Hello"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "Hi."}}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_test_app(mock_config(&mock_server));
    let (status, _, body) = post_json(
        &app,
        "/generate",
        json!({
            "model": "gpt-4o",
            "max_tokens": 64,
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "Hello"}
            ]
        }),
        &[],
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["replies"], json!(["Hi."]));
}

#[tokio::test]
async fn test_generate_empty_choices_is_success() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&mock_server)
        .await;

    let app = create_test_app(mock_config(&mock_server));
    let (status, _, body) = post_json(&app, "/generate", json!({"emailContent": "x"}), &[]).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], Value::Null);
    assert_eq!(body["replies"], json!([]));
}

#[tokio::test]
async fn test_generate_retries_rate_limited_upstream() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "0")
                .set_body_json(json!({"error": {"message": "Rate limit reached"}})),
        )
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "finally"}}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_test_app(mock_config(&mock_server));
    let (status, _, body) = post_json(&app, "/generate", json!({"emailContent": "x"}), &[]).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "finally");
}

/// Mount one rate-limited answer carrying `retry_after`, then a success.
async fn mount_rate_limited_then_ok(mock_server: &MockServer, retry_after: &str) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", retry_after)
                .set_body_json(json!({"error": {"message": "Rate limit reached"}})),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "after backoff"}}]
        })))
        .expect(1)
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn test_generate_http_date_retry_after_uses_backoff() {
    let mock_server = MockServer::start().await;
    mount_rate_limited_then_ok(&mock_server, "Wed, 21 Oct 2015 07:28:00 GMT").await;

    let app = create_test_app(mock_config(&mock_server));
    let (status, _, body) = post_json(&app, "/generate", json!({"emailContent": "x"}), &[]).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "after backoff");
}

#[tokio::test]
async fn test_generate_oversized_retry_after_uses_backoff() {
    let mock_server = MockServer::start().await;
    mount_rate_limited_then_ok(&mock_server, "1e20").await;

    let app = create_test_app(mock_config(&mock_server));
    let (status, _, body) = post_json(&app, "/generate", json!({"emailContent": "x"}), &[]).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "after backoff");
}

#[tokio::test]
async fn test_generate_persistent_rate_limit_forwards_last_response() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "0")
                .set_body_json(json!({"error": {"message": "Rate limit reached"}})),
        )
        .expect(3)
        .mount(&mock_server)
        .await;

    let app = create_test_app(mock_config(&mock_server));
    let (status, _, body) = post_json(&app, "/generate", json!({"emailContent": "x"}), &[]).await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "openai_error");
    assert_eq!(body["details"]["error"]["message"], "Rate limit reached");
}

#[tokio::test]
async fn test_generate_forwards_upstream_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "The model `nope` does not exist", "type": "invalid_request_error"}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_test_app(mock_config(&mock_server));
    let (status, _, body) =
        post_json(&app, "/generate", json!({"emailContent": "x", "model": "nope"}), &[]).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "openai_error");
    assert_eq!(body["details"]["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_generate_non_json_upstream_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_test_app(mock_config(&mock_server));
    let (status, _, body) = post_json(&app, "/generate", json!({"emailContent": "x"}), &[]).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["details"]["error"], "non-json-response");
    assert_eq!(body["details"]["status_text"], "Service Unavailable");
}

#[tokio::test]
async fn test_generate_is_not_deduplicated() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "ok"}}]
        })))
        .expect(2)
        .mount(&mock_server)
        .await;

    let app = create_test_app(mock_config(&mock_server));
    for _ in 0..2 {
        let (status, _, _) =
            post_json(&app, "/generate", json!({"emailContent": "same"}), &[]).await;
        assert_eq!(status, StatusCode::OK);
    }
}

#[tokio::test]
async fn test_secret_required_when_configured() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "ok"}}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = mock_config(&mock_server);
    config.proxy_secret = Some("s3cret".to_string());
    let app = create_test_app(config);

    let (status, _, body) = post_json(&app, "/generate", json!({"emailContent": "x"}), &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _, _) = post_json(
        &app,
        "/generate",
        json!({"emailContent": "x"}),
        &[("X-EXT-SECRET", "wrong")],
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = post_json(
        &app,
        "/generate",
        json!({"emailContent": "x"}),
        &[("X-EXT-SECRET", "s3cret")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_missing_api_key_never_calls_upstream() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut config = mock_config(&mock_server);
    config.openai_api_key = None;
    let app = create_test_app(config);

    let (status, _, body) = post_json(&app, "/generate", json!({"emailContent": "x"}), &[]).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "openai-key-not-configured");

    let (status, _, body) = post_json(
        &app,
        "/transcribe",
        json!({"audio": STANDARD.encode(b"audio")}),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "openai-key-not-configured");
}

#[tokio::test]
async fn test_malformed_json_is_rejected() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let app = create_test_app(mock_config(&mock_server));
    let request = Request::builder()
        .method("POST")
        .uri("/generate")
        .header("content-type", "application/json")
        .body(Body::from("{\"emailContent\": "))
        .unwrap();
    let (status, _, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid-request");
}

#[tokio::test]
async fn test_empty_body_generates_from_empty_email() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [{"role": "user", "content": "Write a concise reply for this email:\n\n"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_test_app(mock_config(&mock_server));
    let request = Request::builder()
        .method("POST")
        .uri("/generate")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_transport_failure_returns_bad_gateway() {
    let mut config = AppConfig::default();
    config.openai_api_key = Some("sk-test".to_string());
    config.api_base = "http://127.0.0.1:9".to_string();
    config.request_timeout_secs = 5;
    let app = create_test_app(config);

    let (status, _, body) = post_json(&app, "/generate", json!({"emailContent": "x"}), &[]).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "proxy-error");
    assert!(!body["details"].as_str().unwrap().contains("127.0.0.1"));
}

#[tokio::test]
async fn test_transcribe_success() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_string_contains("filename=\"audio.webm\""))
        .and(body_string_contains("whisper-1"))
        .and(body_string_contains("webm-bytes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "hello world"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_test_app(mock_config(&mock_server));
    let (status, _, body) = post_json(
        &app,
        "/transcribe",
        json!({"audio": STANDARD.encode(b"webm-bytes")}),
        &[],
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["text"], "hello world");
    assert_eq!(body["raw"]["text"], "hello world");
}

#[tokio::test]
async fn test_transcribe_accepts_data_url_and_model() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .and(body_string_contains("gpt-4o-transcribe"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "hi"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_test_app(mock_config(&mock_server));
    let audio = format!("data:audio/webm;base64,{}", STANDARD.encode(b"webm-bytes"));
    let (status, _, body) = post_json(
        &app,
        "/transcribe",
        json!({"audio": audio, "model": "gpt-4o-transcribe"}),
        &[],
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["text"], "hi");
}

#[tokio::test]
async fn test_transcribe_rejects_bad_audio_before_upstream() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let app = create_test_app(mock_config(&mock_server));

    let (status, _, body) = post_json(&app, "/transcribe", json!({"audio": ""}), &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "no-audio-provided");

    let (status, _, body) = post_json(&app, "/transcribe", json!({}), &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "no-audio-provided");

    let (status, _, body) =
        post_json(&app, "/transcribe", json!({"audio": "%%%not-base64%%%"}), &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid-audio-format");
}

#[tokio::test]
async fn test_transcribe_does_not_retry() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "0")
                .set_body_json(json!({"error": {"message": "slow down"}})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_test_app(mock_config(&mock_server));
    let (status, _, body) = post_json(
        &app,
        "/transcribe",
        json!({"audio": STANDARD.encode(b"webm-bytes")}),
        &[],
    )
    .await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "openai_error");
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let mock_server = MockServer::start().await;
    let app = create_test_app(mock_config(&mock_server));

    let (_, headers, _) = post_json(
        &app,
        "/transcribe",
        json!({}),
        &[("x-request-id", "req-abc-123")],
    )
    .await;
    assert_eq!(headers.get("x-request-id").unwrap(), "req-abc-123");

    let (_, headers, _) = post_json(&app, "/transcribe", json!({}), &[]).await;
    let generated = headers.get("x-request-id").unwrap().to_str().unwrap();
    assert_eq!(generated.len(), 36);
}
