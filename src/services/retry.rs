//! Retry policy for the chat completion path.
//!
//! Only HTTP 429 answers are retried. Any other response, successful or not,
//! and any transport failure ends the loop at once.

use axum::http::StatusCode;
use std::time::Duration;

use crate::api::upstream::UpstreamOutcome;
use crate::core::config::RetryConfig;

/// Exponent cap so the backoff multiplier cannot overflow.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Longest delay the computed backoff produces.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// What to do after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then send another attempt
    Retry(Duration),
    /// Keep the outcome of this attempt as final
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base_secs: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base_secs: f64) -> Self {
        Self {
            max_attempts,
            backoff_base_secs: backoff_base_secs.max(0.0),
        }
    }

    /// Policy that sends exactly one attempt.
    pub fn single_attempt() -> Self {
        Self::new(1, 0.0)
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.backoff_base_secs)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Exponential backoff for a zero-based attempt index: `base * 2^attempt`,
    /// capped at [`MAX_BACKOFF`].
    pub fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = (1_u64 << attempt.min(MAX_BACKOFF_EXPONENT)) as f64;
        Duration::try_from_secs_f64(self.backoff_base_secs * multiplier)
            .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
    }

    /// Decide what follows the zero-based `attempt` that produced `outcome`.
    ///
    /// A provided `Retry-After` value wins over the computed backoff.
    pub fn decide(&self, attempt: u32, outcome: &UpstreamOutcome) -> RetryDecision {
        let retry_after = match outcome {
            UpstreamOutcome::Error {
                status,
                retry_after,
                ..
            } if *status == StatusCode::TOO_MANY_REQUESTS => retry_after.as_deref(),
            _ => return RetryDecision::Stop,
        };

        if attempt + 1 >= self.max_attempts {
            return RetryDecision::Stop;
        }

        let delay = parse_retry_after(retry_after).unwrap_or_else(|| self.backoff(attempt));
        RetryDecision::Retry(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Parse a numeric `Retry-After` value in seconds.
///
/// Accepts integers and decimals. HTTP dates, negative values and values too
/// large for a [`Duration`] return `None` so the caller falls back to its own
/// backoff.
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    let raw = value?.trim();
    if raw.is_empty() {
        return None;
    }

    let seconds = raw.parse::<f64>().ok()?;
    Duration::try_from_secs_f64(seconds).ok()
}
