//! Upstream provider client.
//!
//! Sends chat completion and transcription requests to the provider and
//! classifies each attempt into an [`UpstreamOutcome`]. The chat path runs the
//! attempts through [`RetryPolicy`]; transcription gets a single attempt.

use axum::http::{header::RETRY_AFTER, StatusCode};
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::core::logging::get_request_id;
use crate::core::metrics::get_metrics;
use crate::services::normalizer::parse_body;
use crate::services::retry::{RetryDecision, RetryPolicy};

/// File name and MIME type the browser extension records audio in.
const AUDIO_FILE_NAME: &str = "audio.webm";
const AUDIO_MIME_TYPE: &str = "audio/webm";

/// Result of a single upstream attempt.
#[derive(Debug, Clone)]
pub enum UpstreamOutcome {
    /// 2xx answer; body parsed, or the non-JSON fallback payload
    Success { status: StatusCode, body: Value },
    /// Non-2xx answer
    Error {
        status: StatusCode,
        body: Value,
        retry_after: Option<String>,
    },
    /// No answer: connection error, timeout, or unreadable body
    Transport { message: String, timed_out: bool },
}

impl UpstreamOutcome {
    fn label(&self) -> &'static str {
        match self {
            UpstreamOutcome::Success { .. } => "success",
            UpstreamOutcome::Error { status, .. } if *status == StatusCode::TOO_MANY_REQUESTS => {
                "rate_limited"
            }
            UpstreamOutcome::Error { .. } => "error",
            UpstreamOutcome::Transport { .. } => "transport",
        }
    }

    fn from_transport_error(error: &reqwest::Error) -> Self {
        // Keep internal URLs out of the message returned to clients
        let message = if error.is_timeout() {
            "Upstream request timed out".to_string()
        } else if error.is_connect() {
            "Failed to connect to upstream provider".to_string()
        } else {
            "Upstream request failed".to_string()
        };
        UpstreamOutcome::Transport {
            message,
            timed_out: error.is_timeout(),
        }
    }
}

/// Final state of a retried call.
#[derive(Debug, Clone)]
pub struct RetryReport {
    /// Outcome of the last attempt; `None` if no attempt was made
    pub outcome: Option<UpstreamOutcome>,
    /// Attempts sent
    pub attempts: u32,
    /// Delays slept between attempts, in order
    pub delays: Vec<Duration>,
}

/// Operations the client performs, used for logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ChatCompletion,
    Transcription,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::ChatCompletion => "chat_completion",
            Operation::Transcription => "transcription",
        }
    }

    fn path(self) -> &'static str {
        match self {
            Operation::ChatCompletion => "/chat/completions",
            Operation::Transcription => "/audio/transcriptions",
        }
    }
}

/// Create the shared HTTP client with connection pooling.
pub fn build_http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(32)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
}

/// Client for the provider's chat completion and transcription endpoints.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    api_base: String,
    retry: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client, api_base: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            retry,
        }
    }

    pub fn url(&self, operation: Operation) -> String {
        format!("{}{}", self.api_base, operation.path())
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Send a chat completion, retrying rate-limited attempts.
    pub async fn chat_completion<T>(&self, api_key: &str, payload: &T) -> RetryReport
    where
        T: Serialize + ?Sized,
    {
        let url = self.url(Operation::ChatCompletion);
        let mut report = RetryReport {
            outcome: None,
            attempts: 0,
            delays: Vec::new(),
        };

        for attempt in 0..self.retry.max_attempts() {
            let request = self.http.post(&url).bearer_auth(api_key).json(payload);
            let outcome = send_once(request, Operation::ChatCompletion, attempt).await;
            report.attempts = attempt + 1;

            let decision = self.retry.decide(attempt, &outcome);
            report.outcome = Some(outcome);

            match decision {
                RetryDecision::Stop => break,
                RetryDecision::Retry(delay) => {
                    tracing::warn!(
                        request_id = %get_request_id(),
                        attempt = attempt + 1,
                        max_attempts = self.retry.max_attempts(),
                        delay_secs = delay.as_secs_f64(),
                        "Upstream rate limited, retrying"
                    );
                    report.delays.push(delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        report
    }

    /// Send one transcription request as a multipart upload.
    pub async fn transcribe(&self, api_key: &str, audio: Vec<u8>, model: &str) -> UpstreamOutcome {
        let url = self.url(Operation::Transcription);

        let part = match Part::bytes(audio)
            .file_name(AUDIO_FILE_NAME)
            .mime_str(AUDIO_MIME_TYPE)
        {
            Ok(part) => part,
            Err(e) => {
                return UpstreamOutcome::Transport {
                    message: format!("Failed to build multipart audio part: {}", e),
                    timed_out: false,
                }
            }
        };
        let form = Form::new().part("file", part).text("model", model.to_string());

        let request = self.http.post(&url).bearer_auth(api_key).multipart(form);
        send_once(request, Operation::Transcription, 0).await
    }
}

/// Send one attempt and classify the result.
async fn send_once(
    request: reqwest::RequestBuilder,
    operation: Operation,
    attempt: u32,
) -> UpstreamOutcome {
    let start = Instant::now();
    let outcome = match request.send().await {
        Ok(response) => read_response(response).await,
        Err(error) => {
            tracing::error!(
                request_id = %get_request_id(),
                operation = operation.as_str(),
                attempt = attempt + 1,
                error = %error,
                is_timeout = error.is_timeout(),
                is_connect = error.is_connect(),
                "HTTP request to upstream failed"
            );
            UpstreamOutcome::from_transport_error(&error)
        }
    };

    let metrics = get_metrics();
    metrics
        .upstream_latency
        .with_label_values(&[operation.as_str()])
        .observe(start.elapsed().as_secs_f64());
    metrics
        .upstream_attempts
        .with_label_values(&[operation.as_str(), outcome.label()])
        .inc();

    if let UpstreamOutcome::Error { status, body, .. } = &outcome {
        tracing::warn!(
            request_id = %get_request_id(),
            operation = operation.as_str(),
            attempt = attempt + 1,
            status = status.as_u16(),
            body = %body,
            "Upstream returned error status"
        );
    } else {
        tracing::debug!(
            request_id = %get_request_id(),
            operation = operation.as_str(),
            attempt = attempt + 1,
            outcome = outcome.label(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Upstream attempt finished"
        );
    }

    outcome
}

async fn read_response(response: reqwest::Response) -> UpstreamOutcome {
    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let retry_after = response
        .headers()
        .get(RETRY_AFTER.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::error!(
                request_id = %get_request_id(),
                status = status.as_u16(),
                error = %error,
                "Failed to read upstream response body"
            );
            return UpstreamOutcome::from_transport_error(&error);
        }
    };
    let body = parse_body(&bytes);

    if status.is_success() {
        UpstreamOutcome::Success { status, body }
    } else {
        UpstreamOutcome::Error {
            status,
            body,
            retry_after,
        }
    }
}
