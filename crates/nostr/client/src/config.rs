//! Client configuration.
//!
//! Every numeric policy (timeouts, batch size, TTLs, retry counts) lives here
//! so callers can tune it without touching the client. Configuration files are
//! JSON with camelCase keys; missing keys take their defaults.
//!
//! ```json
//! {
//!   "relayUrl": "wss://relay.example.com",
//!   "publishTimeoutMs": 5000,
//!   "profiles": { "batchSize": 20 }
//! }
//! ```

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Relay used when no URL is configured.
pub const DEFAULT_RELAY_URL: &str = "wss://relay.damus.io";

/// Top-level client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Relay WebSocket endpoint
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// Handshake deadline
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Keepalive ping interval (0 disables pings)
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// How long to wait for an `OK` after publishing
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Deadline for one-shot queries waiting on `EOSE`
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Retry policy for connects and cache fetches
    #[serde(default)]
    pub retry: RetryConfig,

    /// Profile cache settings
    #[serde(default)]
    pub profiles: ProfileCacheConfig,

    /// External metadata lookup cache settings
    #[serde(default)]
    pub lookups: LookupCacheConfig,
}

/// Bounded retry with capped exponential delay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Profile (kind 0) cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileCacheConfig {
    /// How long an entry (including a "not found" entry) stays fresh
    #[serde(default = "default_profile_ttl_secs")]
    pub ttl_secs: u64,

    /// Maximum authors per relay query
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Upper bound on a single batch query
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// Cap on cached profiles (0 = unbounded)
    #[serde(default)]
    pub max_entries: usize,
}

/// Lookup cache settings for the external metadata source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupCacheConfig {
    #[serde(default = "default_lookup_ttl_secs")]
    pub ttl_secs: u64,

    /// Cap on cached lookups (0 = unbounded)
    #[serde(default = "default_lookup_max_entries")]
    pub max_entries: usize,
}

fn default_relay_url() -> String {
    DEFAULT_RELAY_URL.to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_publish_timeout_ms() -> u64 {
    10_000
}

fn default_query_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    8_000
}

fn default_profile_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_timeout_ms() -> u64 {
    10_000
}

fn default_lookup_ttl_secs() -> u64 {
    5 * 60
}

fn default_lookup_max_entries() -> usize {
    1_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            ping_interval_secs: default_ping_interval_secs(),
            publish_timeout_ms: default_publish_timeout_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            retry: RetryConfig::default(),
            profiles: ProfileCacheConfig::default(),
            lookups: LookupCacheConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for ProfileCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_profile_ttl_secs(),
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            max_entries: 0,
        }
    }
}

impl Default for LookupCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_lookup_ttl_secs(),
            max_entries: default_lookup_max_entries(),
        }
    }
}

impl ClientConfig {
    /// Config pointing at `relay_url`, everything else default.
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            ..Default::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `None` when pings are disabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Reject values that would make the client misbehave.
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.relay_url)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ClientError::InvalidUrl(format!(
                "relayUrl must use ws:// or wss://, got {}",
                url.scheme()
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ClientError::Config(
                "retry.maxAttempts must be at least 1".to_string(),
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ClientError::Config(
                "retry.initialDelayMs exceeds retry.maxDelayMs".to_string(),
            ));
        }
        if self.profiles.batch_size == 0 {
            return Err(ClientError::Config(
                "profiles.batchSize must be at least 1".to_string(),
            ));
        }
        if self.publish_timeout_ms == 0 || self.profiles.batch_timeout_ms == 0 {
            return Err(ClientError::Config("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl ProfileCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }
}

impl LookupCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Load and validate a JSON config file.
pub fn load_config(path: impl AsRef<Path>) -> Result<ClientConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ClientError::Config(format!("failed to read {}: {}", path.display(), e)))?;
    let config: ClientConfig = serde_json::from_str(&raw)
        .map_err(|e| ClientError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
    config.validate()?;
    Ok(config)
}
