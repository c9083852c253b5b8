//! Core functionality for the auto-reply proxy.
//!
//! This module contains fundamental components used throughout the application:
//! - Configuration management
//! - Error handling
//! - Logging context
//! - Metrics collection
//! - HTTP middleware
//! - Per-client rate limiting

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod rate_limiter;

// Re-export commonly used types
pub use config::{AppConfig, RateLimitConfig, RetryConfig, ServerConfig};
pub use error::{AppError, Result};
pub use logging::{generate_request_id, get_request_id, init_tracing, REQUEST_ID};
pub use metrics::{get_metrics, init_metrics, Metrics};
pub use middleware::{client_identity, request_id_middleware, MetricsMiddleware};
pub use rate_limiter::{store_from_uri, Admission, MemoryStore, RateLimitStore, RateLimiter};
