//! Membership Record Types

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Network address at which a node accepts cluster traffic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address '{0}' is missing a ':port' suffix")]
    MissingPort(String),
    #[error("address '{0}' has an empty host")]
    EmptyHost(String),
    #[error("address '{0}' has an invalid port")]
    InvalidPort(String),
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for NodeAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressError::MissingPort(s.to_string()))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.trim().is_empty() {
            return Err(AddressError::EmptyHost(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| AddressError::InvalidPort(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

/// A stored, TTL-bounded announcement of one node's address.
///
/// Timestamps are milliseconds since the Unix epoch. Only the owning node
/// ever writes a record; everybody else reads it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MembershipRecord {
    pub cluster_id: String,
    pub node_id: String,
    pub address: NodeAddress,
    pub registered_at: u64,
    pub expires_at: u64,
}

impl MembershipRecord {
    /// Build a record registered at `now` that stays live for `ttl`.
    pub fn new(
        cluster_id: impl Into<String>,
        node_id: impl Into<String>,
        address: NodeAddress,
        now: u64,
        ttl: Duration,
    ) -> Self {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        Self {
            cluster_id: cluster_id.into(),
            node_id: node_id.into(),
            address,
            registered_at: now,
            expires_at: now.saturating_add(ttl_ms),
        }
    }

    /// A record is live strictly before its expiry instant.
    pub fn is_live(&self, now: u64) -> bool {
        now < self.expires_at
    }

    /// Milliseconds elapsed since expiry, or `None` while still live.
    pub fn expired_for(&self, now: u64) -> Option<u64> {
        (!self.is_live(now)).then(|| now - self.expires_at)
    }
}
