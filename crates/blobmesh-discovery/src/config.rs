//! Discovery Configuration
//!
//! One immutable structure holds every discovery setting. Defaults are listed
//! in [`Default`], `from_env` applies environment overrides, and
//! [`DiscoveryConfig::validate`] runs once when the controller is built.

use crate::storage::RetryPolicy;
use blobmesh_core::{KeySpace, NodeAddress};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must not be blank")]
    Blank(&'static str),
    #[error("{field} '{value}' may only contain ASCII letters, digits, '.', '_' and '-'")]
    InvalidIdentifier { field: &'static str, value: String },
    #[error("key prefix '{0}' must be '/'-separated segments of ASCII letters, digits, '.', '_' and '-'")]
    InvalidKeyPrefix(String),
    #[error("address host '{0}' must not contain '/'")]
    InvalidAddress(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("refresh interval {refresh:?} must be shorter than ttl {ttl:?}")]
    RefreshNotBelowTtl { refresh: Duration, ttl: Duration },
    #[error("cycle deadline {deadline:?} must not exceed refresh interval {refresh:?}")]
    DeadlineExceedsRefresh { deadline: Duration, refresh: Duration },
    #[error("partial threshold {0} must be within [0, 1]")]
    ThresholdOutOfRange(f64),
    #[error("backoff multiplier {0} must be at least 1")]
    InvalidMultiplier(f64),
}

/// Discovery configuration with sensible defaults
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    // Identity
    /// Logical cluster this node belongs to (env: BLOBMESH_CLUSTER_ID)
    pub cluster_id: String,

    /// Unique id of this broker process (env: BLOBMESH_NODE_ID, default: random UUID)
    pub node_id: String,

    /// Address peers use to reach this node (env: BLOBMESH_ADDRESS)
    pub address: NodeAddress,

    /// Prefix in front of every record key (env: BLOBMESH_KEY_PREFIX)
    pub key_prefix: String,

    // Record lifetime
    /// How long a record stays live without a refresh (env: BLOBMESH_TTL_SECS)
    pub ttl: Duration,

    /// Period of host-driven cycles (env: BLOBMESH_REFRESH_INTERVAL_SECS)
    pub refresh_interval: Duration,

    // Storage calls
    /// Bound on a single storage request (env: BLOBMESH_REQUEST_TIMEOUT_MS)
    pub request_timeout: Duration,

    /// Attempts per storage call, first try included (env: BLOBMESH_RETRY_ATTEMPTS)
    pub retry_attempts: u32,

    /// First retry delay (env: BLOBMESH_BACKOFF_INITIAL_MS)
    pub backoff_initial: Duration,

    /// Cap on a single retry delay (env: BLOBMESH_BACKOFF_MAX_MS)
    pub backoff_max: Duration,

    /// Growth factor between retry delays (env: BLOBMESH_BACKOFF_MULTIPLIER)
    pub backoff_multiplier: f64,

    // Cycle
    /// Bound on a whole register + enumerate cycle (env: BLOBMESH_CYCLE_DEADLINE_MS)
    pub cycle_deadline: Duration,

    /// Fraction of unreadable records above which a cycle is partial (env: BLOBMESH_PARTIAL_THRESHOLD)
    pub partial_threshold: f64,

    /// Concurrent record fetches during enumeration (env: BLOBMESH_FETCH_CONCURRENCY)
    pub fetch_concurrency: usize,

    /// Report this node's own address among the peers (env: BLOBMESH_INCLUDE_SELF)
    pub include_self: bool,

    // Housekeeping
    /// Delete long-expired records of other nodes (env: BLOBMESH_REAP_EXPIRED)
    pub reap_expired: bool,

    /// How long past expiry a record must be before it is reaped (env: BLOBMESH_REAP_GRACE_SECS)
    pub reap_grace: Duration,

    /// Time allowed for the best-effort delete on shutdown (env: BLOBMESH_DEREGISTER_GRACE_MS)
    pub deregister_grace: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cluster_id: "default".to_string(),
            node_id: uuid::Uuid::new_v4().to_string(),
            address: NodeAddress::new("127.0.0.1", 7800),
            key_prefix: "blobmesh/".to_string(),

            ttl: Duration::from_secs(360),
            refresh_interval: Duration::from_secs(180),

            request_timeout: Duration::from_secs(5),
            retry_attempts: 3,
            backoff_initial: Duration::from_millis(200),
            backoff_max: Duration::from_secs(2),
            backoff_multiplier: 2.0,

            cycle_deadline: Duration::from_secs(30),
            partial_threshold: 0.0,
            fetch_concurrency: 8,
            include_self: true,

            reap_expired: false,
            reap_grace: Duration::from_secs(360),
            deregister_grace: Duration::from_secs(5),
        }
    }
}

impl DiscoveryConfig {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(cluster_id) = std::env::var("BLOBMESH_CLUSTER_ID") {
            config.cluster_id = cluster_id;
        }
        if let Ok(node_id) = std::env::var("BLOBMESH_NODE_ID") {
            config.node_id = node_id;
        }
        if let Some(address) = parse_env::<NodeAddress>("BLOBMESH_ADDRESS") {
            config.address = address;
        }
        if let Ok(prefix) = std::env::var("BLOBMESH_KEY_PREFIX") {
            config.key_prefix = prefix;
        }
        if let Some(secs) = parse_env::<u64>("BLOBMESH_TTL_SECS") {
            config.ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>("BLOBMESH_REFRESH_INTERVAL_SECS") {
            config.refresh_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_env::<u64>("BLOBMESH_REQUEST_TIMEOUT_MS") {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_env::<u32>("BLOBMESH_RETRY_ATTEMPTS") {
            config.retry_attempts = attempts;
        }
        if let Some(ms) = parse_env::<u64>("BLOBMESH_BACKOFF_INITIAL_MS") {
            config.backoff_initial = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env::<u64>("BLOBMESH_BACKOFF_MAX_MS") {
            config.backoff_max = Duration::from_millis(ms);
        }
        if let Some(multiplier) = parse_env::<f64>("BLOBMESH_BACKOFF_MULTIPLIER") {
            config.backoff_multiplier = multiplier;
        }
        if let Some(ms) = parse_env::<u64>("BLOBMESH_CYCLE_DEADLINE_MS") {
            config.cycle_deadline = Duration::from_millis(ms);
        }
        if let Some(threshold) = parse_env::<f64>("BLOBMESH_PARTIAL_THRESHOLD") {
            config.partial_threshold = threshold;
        }
        if let Some(concurrency) = parse_env::<usize>("BLOBMESH_FETCH_CONCURRENCY") {
            config.fetch_concurrency = concurrency;
        }
        if let Some(include) = parse_env::<bool>("BLOBMESH_INCLUDE_SELF") {
            config.include_self = include;
        }
        if let Some(reap) = parse_env::<bool>("BLOBMESH_REAP_EXPIRED") {
            config.reap_expired = reap;
        }
        if let Some(secs) = parse_env::<u64>("BLOBMESH_REAP_GRACE_SECS") {
            config.reap_grace = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_env::<u64>("BLOBMESH_DEREGISTER_GRACE_MS") {
            config.deregister_grace = Duration::from_millis(ms);
        }

        config
    }

    /// Check the invariants the discovery components rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_identifier("cluster_id", &self.cluster_id)?;
        check_identifier("node_id", &self.node_id)?;
        if self.address.host.trim().is_empty() {
            return Err(ConfigError::Blank("address"));
        }
        if self.address.host.contains('/') {
            return Err(ConfigError::InvalidAddress(self.address.host.clone()));
        }
        check_key_prefix(&self.key_prefix)?;

        if self.ttl.is_zero() {
            return Err(ConfigError::Zero("ttl"));
        }
        if self.refresh_interval.is_zero() {
            return Err(ConfigError::Zero("refresh_interval"));
        }
        if self.refresh_interval >= self.ttl {
            return Err(ConfigError::RefreshNotBelowTtl {
                refresh: self.refresh_interval,
                ttl: self.ttl,
            });
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::Zero("request_timeout"));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::Zero("retry_attempts"));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(self.backoff_multiplier));
        }

        if self.cycle_deadline.is_zero() {
            return Err(ConfigError::Zero("cycle_deadline"));
        }
        if self.cycle_deadline > self.refresh_interval {
            return Err(ConfigError::DeadlineExceedsRefresh {
                deadline: self.cycle_deadline,
                refresh: self.refresh_interval,
            });
        }
        if !(0.0..=1.0).contains(&self.partial_threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.partial_threshold));
        }
        if self.fetch_concurrency == 0 {
            return Err(ConfigError::Zero("fetch_concurrency"));
        }
        if self.deregister_grace.is_zero() {
            return Err(ConfigError::Zero("deregister_grace"));
        }

        Ok(())
    }

    /// Time a node stays visible after its refreshes start failing.
    pub fn grace_window(&self) -> Duration {
        self.ttl.saturating_sub(self.refresh_interval)
    }

    pub fn key_space(&self) -> KeySpace {
        KeySpace::new(self.key_prefix.clone())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            request_timeout: self.request_timeout,
            attempts: self.retry_attempts,
            backoff_initial: self.backoff_initial,
            backoff_max: self.backoff_max,
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

/// Key segments are stored verbatim by every backend only when they avoid
/// characters object stores percent-encode.
fn is_key_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn check_identifier(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Blank(field));
    }
    if !is_key_segment(value) {
        return Err(ConfigError::InvalidIdentifier {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn check_key_prefix(prefix: &str) -> Result<(), ConfigError> {
    let trimmed = prefix.strip_suffix('/').unwrap_or(prefix);
    if trimmed.is_empty() && prefix.is_empty() {
        return Ok(());
    }
    if !trimmed.split('/').all(is_key_segment) {
        return Err(ConfigError::InvalidKeyPrefix(prefix.to_string()));
    }
    Ok(())
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}
