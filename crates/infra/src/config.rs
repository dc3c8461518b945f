//! Messaging configuration (env-driven).
//!
//! The process bootstrap owns configuration; this module only reads and
//! validates the keys the messaging core consumes. Validation errors are
//! permanent: the process must refuse to start rather than degrade silently.

use std::time::Duration;

use backon::ExponentialBuilder;
use thiserror::Error;

use crate::retry::transient_backoff;

pub const ENV_LOG_URLS: &str = "ORDERSTREAM_LOG_URLS";
pub const ENV_LOG_ENABLED: &str = "ORDERSTREAM_LOG_ENABLED";
pub const ENV_CHANNEL: &str = "ORDERSTREAM_CHANNEL";
pub const ENV_GROUP_PREFIX: &str = "ORDERSTREAM_GROUP_PREFIX";
pub const ENV_PARTITIONS: &str = "ORDERSTREAM_PARTITIONS";
pub const ENV_RETENTION_MAX_LEN: &str = "ORDERSTREAM_RETENTION_MAX_LEN";
pub const ENV_PUBLISH_TIMEOUT_MS: &str = "ORDERSTREAM_PUBLISH_TIMEOUT_MS";
pub const ENV_PUBLISH_RETRIES: &str = "ORDERSTREAM_PUBLISH_RETRIES";
pub const ENV_PUBLISH_LANES: &str = "ORDERSTREAM_PUBLISH_LANES";
pub const ENV_PUBLISH_QUEUE: &str = "ORDERSTREAM_PUBLISH_QUEUE";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "ORDERSTREAM_RETRY_BASE_DELAY_MS";
pub const ENV_STREAM_BUFFER: &str = "ORDERSTREAM_STREAM_BUFFER";
pub const ENV_READ_BATCH: &str = "ORDERSTREAM_READ_BATCH";
pub const ENV_READ_BLOCK_MS: &str = "ORDERSTREAM_READ_BLOCK_MS";
pub const ENV_DRAIN_GRACE_MS: &str = "ORDERSTREAM_DRAIN_GRACE_MS";

const DEFAULT_CHANNEL: &str = "orders.events";
const DEFAULT_GROUP_PREFIX: &str = "orderstream-gateway";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set when messaging is enabled")]
    MissingEndpoint(&'static str),

    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }
}

/// Settings consumed by the publisher, the durable log and the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct MessagingConfig {
    /// Selects the broker-backed publisher (`true`) or the no-op one.
    pub enabled: bool,
    /// Log endpoint addresses, tried in order.
    pub log_urls: Vec<String>,
    /// Stream (channel) name all order events are appended to.
    pub channel: String,
    /// Prefix of the per-session consumer group names.
    pub group_prefix: String,
    pub partitions: u32,
    /// Approximate number of records kept per partition stream.
    pub retention_max_len: u64,
    pub publish_timeout: Duration,
    pub publish_retries: u32,
    /// Background publish lanes; one order always maps to the same lane.
    pub publish_lanes: u32,
    /// Pending notifications per lane before new ones are dropped.
    pub publish_queue: usize,
    pub retry_base_delay: Duration,
    /// Per-subscription delivery buffer capacity.
    pub stream_buffer: usize,
    pub read_batch: usize,
    pub read_block: Duration,
    pub drain_grace: Duration,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_urls: Vec::new(),
            channel: DEFAULT_CHANNEL.to_string(),
            group_prefix: DEFAULT_GROUP_PREFIX.to_string(),
            partitions: 1,
            retention_max_len: 100_000,
            publish_timeout: Duration::from_millis(2_000),
            publish_retries: 3,
            publish_lanes: 16,
            publish_queue: 1024,
            retry_base_delay: Duration::from_millis(50),
            stream_buffer: 256,
            read_batch: 64,
            read_block: Duration::from_millis(1_000),
            drain_grace: Duration::from_millis(2_000),
        }
    }
}

impl MessagingConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (used by tests and embedders).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let log_urls: Vec<String> = get(ENV_LOG_URLS)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let enabled = match get(ENV_LOG_ENABLED) {
            Some(raw) => parse_bool(ENV_LOG_ENABLED, &raw)?,
            None => !log_urls.is_empty(),
        };

        let config = Self {
            enabled,
            log_urls,
            channel: get(ENV_CHANNEL).unwrap_or(defaults.channel),
            group_prefix: get(ENV_GROUP_PREFIX).unwrap_or(defaults.group_prefix),
            partitions: parse_or(ENV_PARTITIONS, get(ENV_PARTITIONS), defaults.partitions)?,
            retention_max_len: parse_or(
                ENV_RETENTION_MAX_LEN,
                get(ENV_RETENTION_MAX_LEN),
                defaults.retention_max_len,
            )?,
            publish_timeout: parse_millis_or(
                ENV_PUBLISH_TIMEOUT_MS,
                get(ENV_PUBLISH_TIMEOUT_MS),
                defaults.publish_timeout,
            )?,
            publish_retries: parse_or(
                ENV_PUBLISH_RETRIES,
                get(ENV_PUBLISH_RETRIES),
                defaults.publish_retries,
            )?,
            publish_lanes: parse_or(ENV_PUBLISH_LANES, get(ENV_PUBLISH_LANES), defaults.publish_lanes)?,
            publish_queue: parse_or(ENV_PUBLISH_QUEUE, get(ENV_PUBLISH_QUEUE), defaults.publish_queue)?,
            retry_base_delay: parse_millis_or(
                ENV_RETRY_BASE_DELAY_MS,
                get(ENV_RETRY_BASE_DELAY_MS),
                defaults.retry_base_delay,
            )?,
            stream_buffer: parse_or(ENV_STREAM_BUFFER, get(ENV_STREAM_BUFFER), defaults.stream_buffer)?,
            read_batch: parse_or(ENV_READ_BATCH, get(ENV_READ_BATCH), defaults.read_batch)?,
            read_block: parse_millis_or(ENV_READ_BLOCK_MS, get(ENV_READ_BLOCK_MS), defaults.read_block)?,
            drain_grace: parse_millis_or(
                ENV_DRAIN_GRACE_MS,
                get(ENV_DRAIN_GRACE_MS),
                defaults.drain_grace,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for permanent errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.log_urls.is_empty() {
            return Err(ConfigError::MissingEndpoint(ENV_LOG_URLS));
        }
        for url in &self.log_urls {
            let has_scheme = ["redis://", "rediss://", "unix://"]
                .iter()
                .any(|scheme| url.starts_with(scheme) && url.len() > scheme.len());
            if !has_scheme {
                return Err(ConfigError::invalid(
                    ENV_LOG_URLS,
                    format!("'{url}' is not a redis://, rediss:// or unix:// address"),
                ));
            }
        }
        check_name(ENV_CHANNEL, &self.channel)?;
        check_name(ENV_GROUP_PREFIX, &self.group_prefix)?;

        if self.partitions == 0 {
            return Err(ConfigError::invalid(ENV_PARTITIONS, "must be at least 1"));
        }
        if self.stream_buffer == 0 {
            return Err(ConfigError::invalid(ENV_STREAM_BUFFER, "must be at least 1"));
        }
        if self.publish_lanes == 0 {
            return Err(ConfigError::invalid(ENV_PUBLISH_LANES, "must be at least 1"));
        }
        if self.publish_queue == 0 {
            return Err(ConfigError::invalid(ENV_PUBLISH_QUEUE, "must be at least 1"));
        }
        if self.read_batch == 0 {
            return Err(ConfigError::invalid(ENV_READ_BATCH, "must be at least 1"));
        }
        if self.publish_timeout.is_zero() {
            return Err(ConfigError::invalid(ENV_PUBLISH_TIMEOUT_MS, "must be greater than 0"));
        }
        Ok(())
    }

    /// Back-off schedule for publish attempts.
    pub fn publish_backoff(&self) -> ExponentialBuilder {
        transient_backoff(self.retry_base_delay, self.publish_retries)
    }

    /// Back-off schedule for transient read errors on a live stream.
    pub fn read_backoff(&self) -> ExponentialBuilder {
        transient_backoff(self.retry_base_delay, self.publish_retries)
    }
}

fn check_name(key: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::invalid(key, "must not be empty"));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(ConfigError::invalid(key, format!("'{value}' contains whitespace")));
    }
    Ok(())
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, format!("'{raw}' is not a boolean"))),
    }
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    match raw {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::invalid(key, format!("'{raw}': {e}"))),
        None => Ok(default),
    }
}

fn parse_millis_or(
    key: &'static str,
    raw: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_or(key, raw, default_ms).map(Duration::from_millis)
}
