//! HTTP request handlers for the auto-reply proxy.
//!
//! Both relay endpoints run the same gate sequence before touching the
//! provider: client rate limit, provider key, shared secret, then body
//! validation. Anything that fails is rendered through [`AppError`].

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::api::auth::verify_secret;
use crate::api::models::{
    ErrorResponse, GenerateRequest, GenerateResponse, HealthResponse, TranscribeRequest,
    TranscribeResponse,
};
use crate::api::upstream::{UpstreamClient, UpstreamOutcome};
use crate::core::config::AppConfig;
use crate::core::logging::get_request_id;
use crate::core::metrics::{get_metrics, render};
use crate::core::middleware::client_identity;
use crate::core::rate_limiter::{store_from_uri, RateLimitStore, RateLimiter};
use crate::core::{AppError, Result};
use crate::services::normalizer::{normalize_chat, transcription_text};
use crate::services::retry::RetryPolicy;

/// Text served on `GET /`.
pub const INDEX_TEXT: &str = "Dux AutoReply proxy running";

/// Shared application state.
pub struct AppState {
    pub config: AppConfig,
    pub upstream: UpstreamClient,
    pub generate_limiter: RateLimiter,
    pub transcribe_limiter: RateLimiter,
}

impl AppState {
    /// Build the state with the counter store named by the configuration.
    pub fn new(config: AppConfig, http_client: reqwest::Client) -> Self {
        let store = store_from_uri(&config.rate_limit.storage_uri);
        Self::with_store(config, http_client, store)
    }

    pub fn with_store(
        config: AppConfig,
        http_client: reqwest::Client,
        store: Arc<dyn RateLimitStore>,
    ) -> Self {
        let upstream = UpstreamClient::new(
            http_client,
            config.api_base.clone(),
            RetryPolicy::from_config(&config.retry),
        );
        let generate_limiter = RateLimiter::per_minute(
            "generate",
            config.rate_limit.generate_per_minute,
            store.clone(),
        );
        let transcribe_limiter = RateLimiter::per_minute(
            "transcribe",
            config.rate_limit.transcribe_per_minute,
            store,
        );

        Self {
            config,
            upstream,
            generate_limiter,
            transcribe_limiter,
        }
    }

    /// Drop expired rate-limit windows for both endpoints.
    pub fn purge_expired(&self) {
        self.generate_limiter.purge_expired();
        self.transcribe_limiter.purge_expired();
    }
}

/// Liveness text.
#[utoipa::path(
    get,
    path = "/",
    tag = "health",
    responses(
        (status = 200, description = "Service is running", body = String, content_type = "text/plain")
    )
)]
pub async fn index() -> &'static str {
    INDEX_TEXT
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// Prometheus metrics endpoint.
pub async fn metrics_handler() -> Result<Response> {
    let (content_type, buffer) =
        render().map_err(|e| AppError::Internal(format!("Failed to encode metrics: {}", e)))?;
    Ok(([(CONTENT_TYPE, content_type)], buffer).into_response())
}

/// Generate email replies.
///
/// Synthesizes a single user message from `emailContent` unless explicit
/// `messages` are given, sends the chat completion with retries on 429 and
/// normalizes the choices into `reply` and `replies`.
#[utoipa::path(
    post,
    path = "/generate",
    tag = "relay",
    request_body = GenerateRequest,
    params(
        ("x-ext-secret" = Option<String>, Header, description = "Shared secret, required when the proxy has one configured")
    ),
    responses(
        (status = 200, description = "Normalized replies", body = GenerateResponse),
        (status = 400, description = "Malformed request body", body = ErrorResponse),
        (status = 401, description = "Missing or wrong shared secret", body = ErrorResponse),
        (status = 429, description = "Client rate limit exceeded", body = ErrorResponse),
        (status = 500, description = "Provider key not configured", body = ErrorResponse),
        (status = 502, description = "Provider unreachable", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip_all, fields(request_id = %get_request_id()))]
pub async fn generate(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<GenerateResponse>> {
    let api_key = admit(&state, &state.generate_limiter, "/generate", &headers, connect_info)?;
    let request: GenerateRequest = parse_json_body(&body)?;
    let payload = request.into_payload(&state.config);

    tracing::debug!(
        model = %payload.model,
        messages = payload.messages.len(),
        max_tokens = payload.max_tokens,
        n = ?payload.n,
        "Forwarding chat completion"
    );

    let report = state.upstream.chat_completion(api_key, &payload).await;
    let Some(outcome) = report.outcome else {
        tracing::error!(attempts = report.attempts, "No upstream response received");
        return Err(AppError::RetriesExhausted {
            attempts: report.attempts,
        });
    };

    let body = success_body(outcome)?;
    let normalized = normalize_chat(&body);
    tracing::info!(
        attempts = report.attempts,
        replies = normalized.replies.len(),
        "Generated replies"
    );

    Ok(Json(GenerateResponse {
        reply: normalized.reply,
        replies: normalized.replies,
        raw: body,
    }))
}

/// Transcribe base64-encoded audio.
///
/// The audio is decoded before any upstream call and uploaded as
/// `audio.webm`. Transcription is attempted once.
#[utoipa::path(
    post,
    path = "/transcribe",
    tag = "relay",
    request_body = TranscribeRequest,
    params(
        ("x-ext-secret" = Option<String>, Header, description = "Shared secret, required when the proxy has one configured")
    ),
    responses(
        (status = 200, description = "Transcribed text", body = TranscribeResponse),
        (status = 400, description = "Missing or undecodable audio", body = ErrorResponse),
        (status = 401, description = "Missing or wrong shared secret", body = ErrorResponse),
        (status = 429, description = "Client rate limit exceeded", body = ErrorResponse),
        (status = 500, description = "Provider key not configured", body = ErrorResponse),
        (status = 502, description = "Provider unreachable", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip_all, fields(request_id = %get_request_id()))]
pub async fn transcribe(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TranscribeResponse>> {
    let api_key = admit(
        &state,
        &state.transcribe_limiter,
        "/transcribe",
        &headers,
        connect_info,
    )?;
    let request: TranscribeRequest = parse_json_body(&body)?;
    let audio = request.decode_audio()?;
    let model = request.model_or(&state.config.transcription_model);

    tracing::debug!(model = %model, audio_bytes = audio.len(), "Forwarding transcription");

    let outcome = state.upstream.transcribe(api_key, audio, &model).await;
    let body = success_body(outcome)?;
    let text = transcription_text(&body);
    tracing::info!(chars = text.chars().count(), "Transcribed audio");

    Ok(Json(TranscribeResponse { text, raw: body }))
}

/// Run the gates shared by both relay endpoints and return the provider key.
fn admit<'a>(
    state: &'a AppState,
    limiter: &RateLimiter,
    endpoint: &str,
    headers: &HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Result<&'a str> {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let client = client_identity(headers, peer, state.config.server.trust_forwarded_for);

    if let Err(e) = limiter.check(&client) {
        get_metrics()
            .rate_limited
            .with_label_values(&[endpoint])
            .inc();
        return Err(e);
    }

    let api_key = state.config.openai_api_key.as_deref().ok_or_else(|| {
        tracing::error!(endpoint, "Upstream API key is not configured");
        AppError::MissingApiKey
    })?;

    verify_secret(headers, state.config.proxy_secret.as_deref())?;

    Ok(api_key)
}

/// Parse a JSON request body; an empty or `null` body is an empty request.
fn parse_json_body<T>(body: &[u8]) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }

    let value: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Malformed JSON body: {}", e)))?;
    if value.is_null() {
        return Ok(T::default());
    }

    serde_json::from_value(value)
        .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))
}

/// Unwrap a 2xx outcome or convert it into the matching client error.
fn success_body(outcome: UpstreamOutcome) -> Result<Value> {
    match outcome {
        UpstreamOutcome::Success { body, .. } => Ok(body),
        UpstreamOutcome::Error { status, body, .. } => {
            tracing::warn!(status = %status, "Forwarding upstream error");
            Err(AppError::Upstream { status, body })
        }
        UpstreamOutcome::Transport { message, .. } => Err(AppError::Gateway(message)),
    }
}
