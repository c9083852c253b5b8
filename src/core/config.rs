//! Configuration management for the auto-reply proxy.
//!
//! Configuration is read once from the process environment (after `.env` has
//! been loaded) and is immutable afterwards. Every component receives the
//! values it needs through [`AppConfig`] instead of reading the environment
//! per request.

use anyhow::{Context, Result};
use config::{Config, Environment};
use serde::Deserialize;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Upstream provider API key. Requests fail with a config error when absent.
    pub openai_api_key: Option<String>,

    /// Shared secret expected in `X-EXT-SECRET`. `None` disables the check.
    pub proxy_secret: Option<String>,

    /// Model used for `/generate` when the request names none
    pub default_model: String,

    /// Model used for `/transcribe` when the request names none
    pub transcription_model: String,

    /// Base URL of the provider API, without trailing slash
    pub api_base: String,

    /// Server configuration (host, port)
    pub server: ServerConfig,

    /// Per-attempt upstream timeout in seconds
    pub request_timeout_secs: u64,

    /// `max_tokens` sent upstream when the request names none
    pub default_max_tokens: u32,

    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,

    /// Retry configuration for the chat completion path
    pub retry: RetryConfig,
}

/// Server-specific configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to bind to
    pub port: u16,

    /// Use the first `X-Forwarded-For` hop as the client identity
    pub trust_forwarded_for: bool,
}

/// Per-endpoint request quotas over a one minute window.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub generate_per_minute: u32,
    pub transcribe_per_minute: u32,

    /// Location of the counter store (`memory://` or a shared cache URI)
    pub storage_uri: String,
}

/// Upstream retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Base of the exponential backoff, in seconds
    pub backoff_base_secs: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            trust_forwarded_for: false,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            generate_per_minute: 60,
            transcribe_per_minute: 30,
            storage_uri: default_storage_uri(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_secs: 1.0,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            proxy_secret: None,
            default_model: default_model(),
            transcription_model: default_transcription_model(),
            api_base: default_api_base(),
            server: ServerConfig::default(),
            request_timeout_secs: default_request_timeout(),
            default_max_tokens: default_max_tokens(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_tokens() -> u32 {
    400
}

fn default_storage_uri() -> String {
    "memory://".to_string()
}

/// Raw settings as they appear in the environment.
///
/// Everything is kept as a string so that parse failures can be reported
/// with the offending variable name.
#[derive(Debug, Default, Deserialize)]
struct EnvSettings {
    #[serde(alias = "openai_api_keys")]
    openai_api_key: Option<String>,
    proxy_secret: Option<String>,
    default_model: Option<String>,
    transcription_model: Option<String>,
    openai_api_base: Option<String>,
    host: Option<String>,
    port: Option<String>,
    trust_forwarded_for: Option<String>,
    request_timeout_secs: Option<String>,
    default_max_tokens: Option<String>,
    generate_rate_limit: Option<String>,
    transcribe_rate_limit: Option<String>,
    #[serde(alias = "redis_url")]
    rate_limit_storage_uri: Option<String>,
    max_retries: Option<String>,
    backoff_base_secs: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use autoreply_proxy::core::config::AppConfig;
    ///
    /// let config = AppConfig::from_env().expect("Failed to load config");
    /// ```
    pub fn from_env() -> Result<Self> {
        let settings = Config::builder()
            .add_source(Environment::default())
            .build()
            .context("Failed to read environment")?;
        Self::from_settings(settings)
    }

    /// Build configuration from an already assembled [`Config`].
    pub fn from_settings(settings: Config) -> Result<Self> {
        let raw: EnvSettings = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;

        let defaults = AppConfig::default();

        Ok(AppConfig {
            openai_api_key: non_empty(raw.openai_api_key),
            proxy_secret: non_empty(raw.proxy_secret),
            default_model: non_empty(raw.default_model).unwrap_or(defaults.default_model),
            transcription_model: non_empty(raw.transcription_model)
                .unwrap_or(defaults.transcription_model),
            api_base: non_empty(raw.openai_api_base)
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            server: ServerConfig {
                host: non_empty(raw.host).unwrap_or(defaults.server.host),
                port: parse_var("PORT", raw.port)?.unwrap_or(defaults.server.port),
                trust_forwarded_for: raw
                    .trust_forwarded_for
                    .as_deref()
                    .map(str_to_bool)
                    .unwrap_or(false),
            },
            request_timeout_secs: parse_var("REQUEST_TIMEOUT_SECS", raw.request_timeout_secs)?
                .unwrap_or(defaults.request_timeout_secs),
            default_max_tokens: parse_var("DEFAULT_MAX_TOKENS", raw.default_max_tokens)?
                .unwrap_or(defaults.default_max_tokens),
            rate_limit: RateLimitConfig {
                generate_per_minute: parse_var("GENERATE_RATE_LIMIT", raw.generate_rate_limit)?
                    .unwrap_or(defaults.rate_limit.generate_per_minute),
                transcribe_per_minute: parse_var(
                    "TRANSCRIBE_RATE_LIMIT",
                    raw.transcribe_rate_limit,
                )?
                .unwrap_or(defaults.rate_limit.transcribe_per_minute),
                storage_uri: non_empty(raw.rate_limit_storage_uri)
                    .unwrap_or(defaults.rate_limit.storage_uri),
            },
            retry: RetryConfig {
                max_attempts: parse_var("MAX_RETRIES", raw.max_retries)?
                    .unwrap_or(defaults.retry.max_attempts),
                backoff_base_secs: parse_var("BACKOFF_BASE_SECS", raw.backoff_base_secs)?
                    .unwrap_or(defaults.retry.backoff_base_secs),
            },
        })
    }

    /// Per-attempt upstream timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, value: Option<String>) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty(value) {
        Some(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("Invalid value for {}: {:?}", name, v)),
        None => Ok(None),
    }
}

/// Convert string to boolean.
///
/// Accepts: "true", "1", "yes", "on" (case-insensitive)
fn str_to_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}
