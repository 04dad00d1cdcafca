// Messaging Configuration
//
// Pool and publisher configuration loaded from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::publisher::PublisherConfig;
use crate::reliability::BackoffPolicy;
use crate::subscriber::PollerPoolConfig;

pub const QUEUE_URL_VAR: &str = "HARBOR_QUEUE_URL";
pub const MAX_MESSAGES_VAR: &str = "HARBOR_MAX_MESSAGES";
pub const WAIT_TIME_VAR: &str = "HARBOR_WAIT_TIME_SECONDS";
pub const VISIBILITY_TIMEOUT_VAR: &str = "HARBOR_VISIBILITY_TIMEOUT_SECONDS";
pub const NUM_CONSUMERS_VAR: &str = "HARBOR_NUM_CONSUMERS";
pub const BACKOFF_MIN_MS_VAR: &str = "HARBOR_BACKOFF_MIN_MS";
pub const BACKOFF_MAX_MS_VAR: &str = "HARBOR_BACKOFF_MAX_MS";
pub const BACKOFF_FACTOR_VAR: &str = "HARBOR_BACKOFF_FACTOR";
pub const BACKOFF_JITTER_VAR: &str = "HARBOR_BACKOFF_JITTER";
pub const TOPIC_ARN_VAR: &str = "HARBOR_TOPIC_ARN";

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is unset or empty
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set but cannot be parsed
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Combined messaging configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagingConfig {
    /// Present when a queue url is configured
    pub subscriber: Option<PollerPoolConfig>,

    /// Present when a topic arn is configured
    pub publisher: Option<PublisherConfig>,
}

impl MessagingConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `HARBOR_QUEUE_URL`: Queue to consume from (enables the subscriber)
    /// - `HARBOR_MAX_MESSAGES`: Messages per fetch (default: 1)
    /// - `HARBOR_WAIT_TIME_SECONDS`: Long-poll wait per fetch
    /// - `HARBOR_VISIBILITY_TIMEOUT_SECONDS`: Lease on fetched messages
    /// - `HARBOR_NUM_CONSUMERS`: Concurrent pollers (default: 3)
    /// - `HARBOR_BACKOFF_MIN_MS` / `HARBOR_BACKOFF_MAX_MS`: Backoff bounds
    /// - `HARBOR_BACKOFF_FACTOR`: Backoff growth factor (default: 2.0)
    /// - `HARBOR_BACKOFF_JITTER`: Randomize backoff waits (default: true)
    /// - `HARBOR_TOPIC_ARN`: Topic to publish to (enables the publisher)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let subscriber = match non_empty(&lookup, QUEUE_URL_VAR) {
            Some(_) => Some(PollerPoolConfig::from_lookup(&lookup)?),
            None => None,
        };
        let publisher = match non_empty(&lookup, TOPIC_ARN_VAR) {
            Some(_) => Some(PublisherConfig::from_lookup(&lookup)?),
            None => None,
        };

        Ok(Self {
            subscriber,
            publisher,
        })
    }
}

impl PollerPoolConfig {
    /// Create a pool configuration from environment variables
    ///
    /// Fails if `HARBOR_QUEUE_URL` is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create a pool configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let queue_url =
            non_empty(&lookup, QUEUE_URL_VAR).ok_or(ConfigError::Missing(QUEUE_URL_VAR))?;
        let mut config = PollerPoolConfig::new(queue_url);

        if let Some(max) = parse::<u32, _>(&lookup, MAX_MESSAGES_VAR)? {
            config = config.with_max_messages_per_fetch(max);
        }
        config.wait_time_seconds = parse(&lookup, WAIT_TIME_VAR)?;
        config.visibility_timeout_seconds = parse(&lookup, VISIBILITY_TIMEOUT_VAR)?;
        if let Some(num) = parse(&lookup, NUM_CONSUMERS_VAR)? {
            config = config.with_num_consumers(num);
        }

        let mut backoff = BackoffPolicy::exponential();
        if let Some(ms) = parse(&lookup, BACKOFF_MIN_MS_VAR)? {
            backoff = backoff.with_min(Duration::from_millis(ms));
        }
        if let Some(ms) = parse(&lookup, BACKOFF_MAX_MS_VAR)? {
            backoff = backoff.with_max(Duration::from_millis(ms));
        }
        if let Some(factor) = parse(&lookup, BACKOFF_FACTOR_VAR)? {
            backoff = backoff.with_factor(factor);
        }
        if let Some(value) = non_empty(&lookup, BACKOFF_JITTER_VAR) {
            backoff = backoff.with_jitter(parse_bool(BACKOFF_JITTER_VAR, &value)?);
        }

        Ok(config.with_backoff(backoff))
    }
}

impl PublisherConfig {
    /// Create a publisher configuration from environment variables
    ///
    /// Fails if `HARBOR_TOPIC_ARN` is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create a publisher configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let topic_arn =
            non_empty(&lookup, TOPIC_ARN_VAR).ok_or(ConfigError::Missing(TOPIC_ARN_VAR))?;
        Ok(PublisherConfig::new(topic_arn))
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, key)
        .map(|value| {
            value
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value })
        })
        .transpose()
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        }),
    }
}
