//! AutoReply Proxy - a small relay between a browser extension and an LLM provider
//!
//! The extension never holds the provider key. It calls this proxy, which
//! adds the key, applies per-client rate limits and an optional shared
//! secret, and forwards the call:
//!
//! - **Reply generation**: `POST /generate` turns an email into a chat
//!   completion request, retries on provider rate limits and normalizes the
//!   returned choices into `reply` / `replies`
//! - **Transcription**: `POST /transcribe` decodes base64 audio and uploads it
//!   to the provider's transcription endpoint
//! - **Metrics & Monitoring**: Prometheus metrics on `/metrics`
//!
//! # Architecture
//!
//! - [`core`]: configuration, errors, logging, metrics, middleware, rate limiting
//! - [`api`]: HTTP handlers, router, request/response models, upstream client
//! - [`services`]: retry policy and response normalization
//!
//! # Configuration
//!
//! All settings come from the environment (a `.env` file is loaded first):
//! - `OPENAI_API_KEY`: provider key; relay requests fail without it
//! - `PROXY_SECRET`: shared secret expected in `X-EXT-SECRET` (optional)
//! - `HOST` / `PORT`: bind address (default: 0.0.0.0:8080)
//! - `GENERATE_RATE_LIMIT` / `TRANSCRIBE_RATE_LIMIT`: requests per minute per client

pub mod api;
pub mod core;
pub mod services;

// Re-export commonly used types for convenience
pub use api::{build_router, ApiDoc, AppState, GenerateRequest, GenerateResponse};
pub use core::{AppConfig, AppError, Result};
pub use services::{normalize_chat, RetryPolicy};
