//! Runtime configuration.
//!
//! 値の読み込み（フラグ / 環境変数）は binary 側の責務。ここでは値の型と
//! 起動時検証だけを持つ。

use std::fmt;
use std::time::Duration;

use crate::app::retry::BackoffSchedule;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("hmac secret must not be empty")]
    EmptySecret,

    #[error("drain batch size must be at least 1")]
    ZeroBatchSize,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("endpoint url '{0}' must start with http:// or https://")]
    EndpointUrl(String),
}

#[derive(Clone)]
pub struct CourierConfig {
    /// Shared secret for endpoint signatures.
    pub hmac_secret: String,
    pub backoff: BackoffSchedule,
    pub drain_interval: Duration,
    pub drain_batch_size: usize,
    /// Processing window for a popped message; also the run claim lease.
    pub visibility_timeout: Duration,
    /// When set, the drainer POSTs here; otherwise it calls the endpoint in-process.
    pub endpoint_url: Option<String>,
}

impl CourierConfig {
    pub fn new(hmac_secret: impl Into<String>) -> Self {
        Self {
            hmac_secret: hmac_secret.into(),
            backoff: BackoffSchedule::default(),
            drain_interval: Duration::from_secs(5),
            drain_batch_size: 1,
            visibility_timeout: Duration::from_secs(30),
            endpoint_url: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hmac_secret.is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        if self.drain_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.drain_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("drain interval"));
        }
        if self.visibility_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("visibility timeout"));
        }
        if let Some(url) = &self.endpoint_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(ConfigError::EndpointUrl(url.clone()));
        }
        Ok(())
    }
}

impl fmt::Debug for CourierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CourierConfig")
            .field("hmac_secret", &"<redacted>")
            .field("backoff", &self.backoff.to_string())
            .field("drain_interval", &self.drain_interval)
            .field("drain_batch_size", &self.drain_batch_size)
            .field("visibility_timeout", &self.visibility_timeout)
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}
