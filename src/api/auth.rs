//! Shared-secret authorization guard.
//!
//! When a proxy secret is configured, every request must carry it in the
//! `X-EXT-SECRET` header. Header names are matched case-insensitively; the
//! value must match exactly. Without a configured secret every request is
//! admitted.

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use crate::core::error::Result;
use crate::core::AppError;

/// Header carrying the shared secret.
pub const SECRET_HEADER: &str = "x-ext-secret";

/// Extract the shared secret from headers.
fn extract_secret(headers: &HeaderMap) -> Option<&str> {
    headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok())
}

/// Compare two secrets in constant time.
fn secrets_match(provided: &str, expected: &str) -> bool {
    if provided.len() != expected.len() {
        return false;
    }
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Verify the shared secret.
///
/// # Returns
///
/// * `Ok(())` - No secret configured, or the header matches it
/// * `Err(AppError::Unauthorized)` - Header missing or different
pub fn verify_secret(headers: &HeaderMap, expected: Option<&str>) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };

    match extract_secret(headers) {
        Some(provided) if secrets_match(provided, expected) => Ok(()),
        Some(_) => {
            tracing::warn!("Rejected request with incorrect proxy secret");
            Err(AppError::Unauthorized)
        }
        None => {
            tracing::warn!("Rejected request without proxy secret");
            Err(AppError::Unauthorized)
        }
    }
}
