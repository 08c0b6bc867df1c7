//! Self-Registration
//!
//! Owns this node's membership record: written on the first cycle, rewritten
//! with a fresh expiry on every later cycle, deleted on orderly shutdown.
//! The key is derived from cluster and node id only, so every refresh
//! overwrites the same object and no read-modify-write is ever needed.

use crate::observability::events;
use crate::storage::{StorageError, StorageGateway};
use blobmesh_core::{codec, Clock, KeySpace, MembershipRecord, NodeAddress};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Identity this node announces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNode {
    pub cluster_id: String,
    pub node_id: String,
    pub address: NodeAddress,
}

/// Result of a successful [`SelfRegistration::register_or_refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The record was written during this call.
    Confirmed(MembershipRecord),
    /// The write failed, but the last confirmed record is live until `expires_at`.
    Grace { expires_at: u64 },
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("initial registration at '{key}' failed: {source}")]
    Initial {
        key: String,
        #[source]
        source: StorageError,
    },
    #[error("refresh of '{key}' failed and the last record expired at {expired_at}: {source}")]
    Expired {
        key: String,
        expired_at: u64,
        #[source]
        source: StorageError,
    },
    #[error("record could not be encoded: {0}")]
    Encode(#[from] codec::EncodeError),
}

/// Outcome of [`SelfRegistration::deregister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deregistration {
    Removed,
    Ignored,
}

/// Manages the lifecycle of this node's own record.
pub struct SelfRegistration {
    gateway: StorageGateway,
    local: LocalNode,
    key: String,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    /// Last record known to be stored
    last_confirmed: Option<MembershipRecord>,
    /// A put was issued at least once, whatever its outcome
    attempted: bool,
}

impl SelfRegistration {
    pub fn new(
        gateway: StorageGateway,
        keys: &KeySpace,
        local: LocalNode,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let key = keys.record_key(&local.cluster_id, &local.node_id);
        Self {
            gateway,
            local,
            key,
            ttl,
            clock,
            last_confirmed: None,
            attempted: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn local(&self) -> &LocalNode {
        &self.local
    }

    pub fn last_confirmed(&self) -> Option<&MembershipRecord> {
        self.last_confirmed.as_ref()
    }

    /// Write the record with `expires_at = now + ttl`.
    pub async fn register_or_refresh(&mut self) -> Result<Registration, RegistrationError> {
        let now = self.clock.now_millis();
        let record = MembershipRecord::new(
            self.local.cluster_id.clone(),
            self.local.node_id.clone(),
            self.local.address.clone(),
            now,
            self.ttl,
        );
        let payload = codec::encode(&record)?;

        self.attempted = true;
        match self.gateway.put(&self.key, payload).await {
            Ok(()) => {
                events::registration_succeeded(
                    &record.cluster_id,
                    &record.node_id,
                    &self.key,
                    record.expires_at,
                );
                self.last_confirmed = Some(record.clone());
                Ok(Registration::Confirmed(record))
            }
            Err(source) => match &self.last_confirmed {
                Some(previous) if previous.is_live(now) => {
                    events::registration_grace(
                        &self.local.cluster_id,
                        &self.local.node_id,
                        &source.to_string(),
                        previous.expires_at - now,
                    );
                    Ok(Registration::Grace {
                        expires_at: previous.expires_at,
                    })
                }
                Some(previous) => {
                    events::registration_failed(
                        &self.local.cluster_id,
                        &self.local.node_id,
                        &self.key,
                        &source.to_string(),
                    );
                    Err(RegistrationError::Expired {
                        key: self.key.clone(),
                        expired_at: previous.expires_at,
                        source,
                    })
                }
                None => {
                    events::registration_failed(
                        &self.local.cluster_id,
                        &self.local.node_id,
                        &self.key,
                        &source.to_string(),
                    );
                    Err(RegistrationError::Initial {
                        key: self.key.clone(),
                        source,
                    })
                }
            },
        }
    }

    /// Best-effort removal of the record. Never fails; problems are reported
    /// as events and leave the record to age out.
    pub async fn deregister(&mut self) -> Deregistration {
        if !self.attempted {
            debug!(key = %self.key, "Nothing registered, skipping delete");
            return Deregistration::Ignored;
        }

        match self.gateway.delete(&self.key).await {
            Ok(()) => {
                self.last_confirmed = None;
                self.attempted = false;
                events::deregistered(&self.local.cluster_id, &self.local.node_id, &self.key);
                Deregistration::Removed
            }
            Err(e) if e.is_not_found() => {
                self.last_confirmed = None;
                self.attempted = false;
                debug!(key = %self.key, "Own record already gone");
                Deregistration::Removed
            }
            Err(e) => {
                events::deregistration_failed(
                    &self.local.cluster_id,
                    &self.local.node_id,
                    &e.to_string(),
                );
                Deregistration::Ignored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FaultKind, RetryPolicy, StorageOp};
    use crate::testing::FaultyClient;
    use blobmesh_core::ManualClock;

    const TTL: Duration = Duration::from_secs(30);

    fn policy() -> RetryPolicy {
        RetryPolicy {
            request_timeout: Duration::from_millis(200),
            attempts: 2,
            backoff_initial: Duration::from_millis(5),
            backoff_max: Duration::from_millis(10),
            backoff_multiplier: 2.0,
        }
    }

    fn local() -> LocalNode {
        LocalNode {
            cluster_id: "C1".to_string(),
            node_id: "A".to_string(),
            address: NodeAddress::new("10.0.0.1", 1883),
        }
    }

    fn setup() -> (Arc<FaultyClient>, ManualClock, SelfRegistration, StorageGateway) {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(0);
        let gateway = StorageGateway::new(client.clone(), policy());
        let registration = SelfRegistration::new(
            gateway.clone(),
            &KeySpace::new("blobmesh/"),
            local(),
            TTL,
            Arc::new(clock.clone()),
        );
        (client, clock, registration, gateway)
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_writes_decodable_record() {
        let (_client, clock, mut registration, gateway) = setup();
        clock.set(5_000);

        let result = registration.register_or_refresh().await.unwrap();

        let stored = codec::decode(&gateway.get("blobmesh/C1/A").await.unwrap()).unwrap();
        assert_eq!(result, Registration::Confirmed(stored.clone()));
        assert_eq!(stored.registered_at, 5_000);
        assert_eq!(stored.expires_at, 35_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_targets_the_same_key() {
        let (_client, clock, mut registration, gateway) = setup();

        registration.register_or_refresh().await.unwrap();
        clock.advance(Duration::from_secs(10));
        registration.register_or_refresh().await.unwrap();

        let keys = gateway.list("blobmesh/C1/").await.unwrap();
        assert_eq!(keys, vec!["blobmesh/C1/A"]);
        let stored = codec::decode(&gateway.get("blobmesh/C1/A").await.unwrap()).unwrap();
        assert_eq!(stored.expires_at, 40_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_failure_is_hard() {
        let (client, _clock, mut registration, _gateway) = setup();
        client.fail_next(StorageOp::Put, FaultKind::Unauthorized, 1);

        let err = registration.register_or_refresh().await.unwrap_err();

        assert!(matches!(err, RegistrationError::Initial { .. }));
        assert!(registration.last_confirmed().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_within_ttl_is_grace() {
        let (client, clock, mut registration, _gateway) = setup();
        registration.register_or_refresh().await.unwrap();

        clock.advance(Duration::from_secs(10));
        client.fail_next(StorageOp::Put, FaultKind::Unavailable, 5);
        let result = registration.register_or_refresh().await.unwrap();

        assert_eq!(result, Registration::Grace { expires_at: 30_000 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_after_expiry_is_hard() {
        let (client, clock, mut registration, _gateway) = setup();
        registration.register_or_refresh().await.unwrap();

        clock.set(30_000);
        client.fail_next(StorageOp::Put, FaultKind::Unauthorized, 1);
        let err = registration.register_or_refresh().await.unwrap_err();

        assert!(matches!(
            err,
            RegistrationError::Expired {
                expired_at: 30_000,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deregister_removes_record() {
        let (_client, _clock, mut registration, gateway) = setup();
        registration.register_or_refresh().await.unwrap();

        assert_eq!(registration.deregister().await, Deregistration::Removed);
        assert!(gateway.get("blobmesh/C1/A").await.unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deregister_without_registration_is_ignored() {
        let (client, _clock, mut registration, _gateway) = setup();

        assert_eq!(registration.deregister().await, Deregistration::Ignored);
        assert_eq!(client.calls(StorageOp::Delete), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deregister_failure_is_ignored() {
        let (client, _clock, mut registration, gateway) = setup();
        registration.register_or_refresh().await.unwrap();
        client.fail_next(StorageOp::Delete, FaultKind::Unauthorized, 1);

        assert_eq!(registration.deregister().await, Deregistration::Ignored);
        assert!(gateway.get("blobmesh/C1/A").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deregister_after_ambiguous_put_still_deletes() {
        let (client, _clock, mut registration, _gateway) = setup();
        client.fail_next(StorageOp::Put, FaultKind::Unauthorized, 1);
        assert!(registration.register_or_refresh().await.is_err());

        assert_eq!(registration.deregister().await, Deregistration::Removed);
        assert_eq!(client.calls(StorageOp::Delete), 1);
    }
}
