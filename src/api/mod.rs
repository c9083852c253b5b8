//! API layer for the auto-reply proxy.
//!
//! This module contains the HTTP handlers, the shared-secret guard,
//! request/response models and the upstream provider client.

pub mod auth;
pub mod handlers;
pub mod models;
pub mod router;
pub mod upstream;

// Re-export commonly used types
pub use auth::{verify_secret, SECRET_HEADER};
pub use handlers::{generate, health, index, metrics_handler, transcribe, AppState};
pub use models::{
    ChatCompletionPayload, ChatMessage, ErrorResponse, GenerateRequest, GenerateResponse,
    HealthResponse, TranscribeRequest, TranscribeResponse,
};
pub use router::{build_router, ApiDoc};
pub use upstream::{build_http_client, Operation, RetryReport, UpstreamClient, UpstreamOutcome};
