//! Peer Enumeration
//!
//! Lists every record under the cluster prefix, fetches and decodes them with
//! bounded concurrency and folds the survivors into a deduplicated address
//! set. Read-only: expired records are reported back, never deleted here.

use crate::observability::{events, metrics};
use crate::storage::{StorageError, StorageGateway};
use blobmesh_core::{codec, Clock, KeySpace, MembershipRecord, NodeAddress};
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A record observed past its expiry, kept for housekeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredRecord {
    pub key: String,
    pub record: MembershipRecord,
}

/// Aggregated view of one enumeration pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerSnapshot {
    pub peers: BTreeSet<NodeAddress>,
    /// Keys returned by the listing
    pub listed: usize,
    /// Keys whose get or decode failed
    pub unreadable: usize,
    pub expired: Vec<ExpiredRecord>,
    partial: bool,
}

impl PeerSnapshot {
    pub fn is_partial(&self) -> bool {
        self.partial
    }
}

enum Fetched {
    Live(NodeAddress),
    Expired(ExpiredRecord),
    Skipped,
    Unreadable,
}

pub struct PeerEnumerator {
    gateway: StorageGateway,
    keys: KeySpace,
    clock: Arc<dyn Clock>,
    partial_threshold: f64,
    fetch_concurrency: usize,
}

impl PeerEnumerator {
    pub fn new(
        gateway: StorageGateway,
        keys: KeySpace,
        clock: Arc<dyn Clock>,
        partial_threshold: f64,
        fetch_concurrency: usize,
    ) -> Self {
        Self {
            gateway,
            keys,
            clock,
            partial_threshold,
            fetch_concurrency: fetch_concurrency.max(1),
        }
    }

    /// Snapshot the live peers of `cluster_id`.
    ///
    /// Only a failed listing is an error. Records that cannot be fetched or
    /// decoded are counted in [`PeerSnapshot::unreadable`] and the snapshot is
    /// partial once their share of the listing exceeds the threshold.
    pub async fn list_peers(
        &self,
        cluster_id: &str,
        exclude_self_id: Option<&str>,
    ) -> Result<PeerSnapshot, StorageError> {
        let prefix = self.keys.cluster_prefix(cluster_id);
        let listed = match self.gateway.list(&prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                events::enumeration_failed(cluster_id, &e.to_string());
                return Err(e);
            }
        };

        // Liveness is judged against a single instant for the whole pass
        let now = self.clock.now_millis();

        let fetched: Vec<Fetched> = stream::iter(listed.iter())
            .map(|key| self.fetch(cluster_id, exclude_self_id, key, now))
            .buffer_unordered(self.fetch_concurrency)
            .collect()
            .await;

        let mut snapshot = PeerSnapshot {
            listed: listed.len(),
            ..Default::default()
        };
        for outcome in fetched {
            match outcome {
                Fetched::Live(address) => {
                    snapshot.peers.insert(address);
                }
                Fetched::Expired(expired) => snapshot.expired.push(expired),
                Fetched::Unreadable => snapshot.unreadable += 1,
                Fetched::Skipped => {}
            }
        }
        snapshot.expired.sort_by(|a, b| a.key.cmp(&b.key));

        snapshot.partial = snapshot.listed > 0
            && (snapshot.unreadable as f64 / snapshot.listed as f64) > self.partial_threshold;

        if snapshot.partial {
            events::enumeration_partial(
                cluster_id,
                snapshot.listed,
                snapshot.unreadable,
                snapshot.peers.len(),
            );
        } else {
            events::enumeration_complete(cluster_id, snapshot.listed, snapshot.peers.len());
        }
        Ok(snapshot)
    }

    async fn fetch(
        &self,
        cluster_id: &str,
        exclude_self_id: Option<&str>,
        key: &str,
        now: u64,
    ) -> Fetched {
        // A listed key that cannot be mapped back to a node may hide a peer
        let Some(node_id) = self.keys.node_id_of(cluster_id, key) else {
            skip(key, "unexpected_key");
            return Fetched::Unreadable;
        };
        if exclude_self_id == Some(node_id) {
            return Fetched::Skipped;
        }

        let payload = match self.gateway.get(key).await {
            Ok(payload) => payload,
            Err(e) if e.is_not_found() => {
                // Deleted between list and get
                skip(key, "vanished");
                return Fetched::Skipped;
            }
            Err(_) => {
                skip(key, "unreadable");
                return Fetched::Unreadable;
            }
        };

        let record = match codec::decode(&payload) {
            Ok(record) => record,
            Err(_) => {
                skip(key, "malformed");
                return Fetched::Unreadable;
            }
        };

        if record.cluster_id != cluster_id {
            skip(key, "foreign_cluster");
            return Fetched::Skipped;
        }
        if exclude_self_id == Some(record.node_id.as_str()) {
            return Fetched::Skipped;
        }
        if !record.is_live(now) {
            skip(key, "expired");
            return Fetched::Expired(ExpiredRecord {
                key: key.to_string(),
                record,
            });
        }
        Fetched::Live(record.address)
    }
}

fn skip(key: &str, reason: &'static str) {
    metrics::record_skipped(reason);
    events::record_skipped(key, reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FaultKind, RetryPolicy, StorageOp};
    use crate::testing::FaultyClient;
    use blobmesh_core::ManualClock;
    use std::time::Duration;

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

    fn enumerator(client: Arc<FaultyClient>, clock: &ManualClock, threshold: f64) -> PeerEnumerator {
        PeerEnumerator::new(
            StorageGateway::new(client, policy()),
            KeySpace::new("blobmesh/"),
            Arc::new(clock.clone()),
            threshold,
            4,
        )
    }

    async fn seed(client: &FaultyClient, cluster: &str, node: &str, host: &str, now: u64) {
        let record = MembershipRecord::new(cluster, node, NodeAddress::new(host, 1883), now, TTL);
        let key = format!("blobmesh/C1/{node}");
        client.seed(&key, &codec::encode(&record).unwrap()).await.unwrap();
    }

    fn addr(host: &str) -> NodeAddress {
        NodeAddress::new(host, 1883)
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_malformed_of_four() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(1_000);
        seed(&client, "C1", "A", "10.0.0.1", 0).await;
        seed(&client, "C1", "B", "10.0.0.2", 0).await;
        seed(&client, "C1", "C", "10.0.0.3", 0).await;
        client.seed("blobmesh/C1/D", b"{not json").await.unwrap();

        let strict = enumerator(client.clone(), &clock, 0.0)
            .list_peers("C1", None)
            .await
            .unwrap();
        assert_eq!(strict.peers.len(), 3);
        assert_eq!(strict.listed, 4);
        assert_eq!(strict.unreadable, 1);
        assert!(strict.is_partial());

        let tolerant = enumerator(client, &clock, 0.25)
            .list_peers("C1", None)
            .await
            .unwrap();
        assert_eq!(tolerant.peers.len(), 3);
        assert!(!tolerant.is_partial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_addresses_collapse() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(1_000);
        seed(&client, "C1", "A", "10.0.0.1", 0).await;
        seed(&client, "C1", "A2", "10.0.0.1", 0).await;

        let snapshot = enumerator(client, &clock, 0.0)
            .list_peers("C1", None)
            .await
            .unwrap();

        assert_eq!(snapshot.peers, BTreeSet::from([addr("10.0.0.1")]));
        assert!(!snapshot.is_partial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_records_are_reported_not_returned() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(0);
        seed(&client, "C1", "A", "10.0.0.1", 20_000).await;
        seed(&client, "C1", "B", "10.0.0.2", 0).await;

        // B expires exactly at 30s; expires_at == now is not live
        clock.set(30_000);
        let snapshot = enumerator(client, &clock, 0.0)
            .list_peers("C1", None)
            .await
            .unwrap();

        assert_eq!(snapshot.peers, BTreeSet::from([addr("10.0.0.1")]));
        assert_eq!(snapshot.expired.len(), 1);
        assert_eq!(snapshot.expired[0].key, "blobmesh/C1/B");
        assert_eq!(snapshot.unreadable, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_cluster_record_is_skipped() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(1_000);
        seed(&client, "C1", "A", "10.0.0.1", 0).await;
        // Stored under C1's prefix but claims another cluster
        seed(&client, "C2", "X", "10.9.9.9", 0).await;

        let snapshot = enumerator(client, &clock, 0.0)
            .list_peers("C1", None)
            .await
            .unwrap();

        assert_eq!(snapshot.peers, BTreeSet::from([addr("10.0.0.1")]));
        assert!(!snapshot.is_partial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exclude_self_skips_own_record() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(1_000);
        seed(&client, "C1", "A", "10.0.0.1", 0).await;
        seed(&client, "C1", "B", "10.0.0.2", 0).await;

        let snapshot = enumerator(client.clone(), &clock, 0.0)
            .list_peers("C1", Some("A"))
            .await
            .unwrap();

        assert_eq!(snapshot.peers, BTreeSet::from([addr("10.0.0.2")]));
        assert_eq!(client.calls(StorageOp::Get), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_payload_counts_as_unreadable() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(1_000);
        seed(&client, "C1", "A", "10.0.0.1", 0).await;
        client.seed("blobmesh/C1/B", b"").await.unwrap();

        let snapshot = enumerator(client, &clock, 0.0)
            .list_peers("C1", None)
            .await
            .unwrap();

        assert_eq!(snapshot.peers.len(), 1);
        assert_eq!(snapshot.unreadable, 1);
        assert!(snapshot.is_partial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_get_counts_as_unreadable() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(1_000);
        seed(&client, "C1", "A", "10.0.0.1", 0).await;
        seed(&client, "C1", "B", "10.0.0.2", 0).await;
        client.fail_key("blobmesh/C1/B", FaultKind::Unauthorized);

        let snapshot = enumerator(client, &clock, 0.0)
            .list_peers("C1", None)
            .await
            .unwrap();

        assert_eq!(snapshot.peers, BTreeSet::from([addr("10.0.0.1")]));
        assert_eq!(snapshot.unreadable, 1);
        assert!(snapshot.is_partial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmappable_key_makes_snapshot_partial() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(1_000);
        seed(&client, "C1", "A", "10.0.0.1", 0).await;
        client.seed("blobmesh/C1/B/nested", b"{}").await.unwrap();

        let snapshot = enumerator(client.clone(), &clock, 0.0)
            .list_peers("C1", None)
            .await
            .unwrap();

        assert_eq!(snapshot.peers, BTreeSet::from([addr("10.0.0.1")]));
        assert_eq!(snapshot.unreadable, 1);
        assert!(snapshot.is_partial());
        assert_eq!(client.calls(StorageOp::Get), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_listing_is_an_error() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(1_000);
        seed(&client, "C1", "A", "10.0.0.1", 0).await;
        client.fail_next(StorageOp::List, FaultKind::Unauthorized, 1);

        let err = enumerator(client, &clock, 0.0)
            .list_peers("C1", None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "fatal");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_cluster_is_complete() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(1_000);

        let snapshot = enumerator(client, &clock, 0.0)
            .list_peers("C1", None)
            .await
            .unwrap();

        assert!(snapshot.peers.is_empty());
        assert!(!snapshot.is_partial());
    }
}
