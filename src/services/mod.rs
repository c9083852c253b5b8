//! Business logic services for the proxy.
//!
//! This module contains the pieces of the relay that do not touch HTTP:
//! the retry policy and the response normalizer.

pub mod normalizer;
pub mod retry;

// Re-export commonly used types
pub use normalizer::{normalize_chat, parse_body, transcription_text, NormalizedReply};
pub use retry::{parse_retry_after, RetryDecision, RetryPolicy};
