//! Discovery Controller
//!
//! Drives one host-invoked discovery cycle at a time through the state
//! machine `Idle -> Registering -> Enumerating -> Completed(outcome)`.
//! The whole cycle is bounded by `cycle_deadline`: running out of time before
//! registration is confirmed is a failure, afterwards it is a partial result.

use super::enumeration::PeerEnumerator;
use super::housekeeping::Reaper;
use super::registration::{Deregistration, LocalNode, Registration, SelfRegistration};
use crate::config::{ConfigError, DiscoveryConfig};
use crate::observability::{events, metrics};
use crate::storage::{BlobClient, StorageGateway};
use blobmesh_core::{Clock, NodeAddress};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

/// Host-visible result of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Partial,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Partial => "partial",
            Outcome::Failure => "failure",
        }
    }
}

/// Discovery controller state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    /// No cycle has run yet
    Idle,
    /// Writing or refreshing this node's own record
    Registering,
    /// Listing and reading peer records
    Enumerating,
    /// Last cycle finished with the given outcome
    Completed(Outcome),
}

/// Output of one cycle, rebuilt from scratch every invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResult {
    pub peers: BTreeSet<NodeAddress>,
    pub outcome: Outcome,
    /// When the host should run the next cycle
    pub next_refresh: Duration,
}

/// Discovery Controller
///
/// Owns the registration, enumeration and housekeeping parts for one node.
/// The host calls [`cycle`](Self::cycle) on its timer and
/// [`deregister`](Self::deregister) once on orderly shutdown.
pub struct DiscoveryController {
    config: DiscoveryConfig,
    gateway: StorageGateway,
    registration: SelfRegistration,
    enumerator: PeerEnumerator,
    reaper: Option<Reaper>,
    container_checked: bool,
    state: DiscoveryState,
}

impl DiscoveryController {
    pub fn new(
        config: DiscoveryConfig,
        client: Arc<dyn BlobClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let gateway = StorageGateway::new(client, config.retry_policy());
        let keys = config.key_space();
        let local = LocalNode {
            cluster_id: config.cluster_id.clone(),
            node_id: config.node_id.clone(),
            address: config.address.clone(),
        };
        let registration =
            SelfRegistration::new(gateway.clone(), &keys, local, config.ttl, clock.clone());
        let reaper = config.reap_expired.then(|| {
            Reaper::new(
                gateway.clone(),
                registration.key().to_string(),
                config.reap_grace,
                clock.clone(),
            )
        });
        let enumerator = PeerEnumerator::new(
            gateway.clone(),
            keys,
            clock,
            config.partial_threshold,
            config.fetch_concurrency,
        );

        debug!(
            cluster_id = %config.cluster_id,
            node_id = %config.node_id,
            key = %registration.key(),
            grace_window_secs = config.grace_window().as_secs(),
            reap_expired = config.reap_expired,
            "Creating discovery controller"
        );

        Ok(Self {
            config,
            gateway,
            registration,
            enumerator,
            reaper,
            container_checked: false,
            state: DiscoveryState::Idle,
        })
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Run one register-then-enumerate cycle.
    ///
    /// Never returns an error: every failure is folded into the outcome.
    pub async fn cycle(&mut self) -> DiscoveryResult {
        let started = Instant::now();
        let deadline = started + self.config.cycle_deadline;
        self.state = DiscoveryState::Registering;

        if !self.container_checked {
            self.check_container(deadline).await;
        }

        let registration = match timeout_at(deadline, self.registration.register_or_refresh()).await {
            Ok(Ok(registration)) => registration,
            Ok(Err(e)) => {
                warn!(cluster_id = %self.config.cluster_id, error = %e, "Registration failed");
                return self.finish(Outcome::Failure, BTreeSet::new(), started);
            }
            Err(_) => {
                self.deadline_exceeded("registering");
                return self.finish(Outcome::Failure, BTreeSet::new(), started);
            }
        };

        self.state = DiscoveryState::Enumerating;
        let mut outcome = match registration {
            Registration::Confirmed(_) => Outcome::Success,
            // Still discoverable, but not confirmed this cycle
            Registration::Grace { .. } => Outcome::Partial,
        };

        let mut peers = BTreeSet::new();
        if self.config.include_self {
            peers.insert(self.config.address.clone());
        }

        let listing = self
            .enumerator
            .list_peers(&self.config.cluster_id, Some(self.config.node_id.as_str()));
        match timeout_at(deadline, listing).await {
            Ok(Ok(snapshot)) => {
                if snapshot.is_partial() {
                    outcome = Outcome::Partial;
                }
                peers.extend(snapshot.peers.iter().cloned());

                if let Some(reaper) = &self.reaper {
                    if !snapshot.expired.is_empty()
                        && timeout_at(deadline, reaper.reap(&snapshot.expired)).await.is_err()
                    {
                        debug!("Deadline reached while reaping, remaining records left for later");
                    }
                }
            }
            Ok(Err(e)) => {
                warn!(cluster_id = %self.config.cluster_id, error = %e, "Peer listing failed");
                outcome = Outcome::Partial;
            }
            Err(_) => {
                self.deadline_exceeded("enumerating");
                outcome = Outcome::Partial;
            }
        }

        self.finish(outcome, peers, started)
    }

    /// Best-effort removal of this node's record, bounded by `deregister_grace`.
    pub async fn deregister(&mut self) -> Deregistration {
        info!(
            cluster_id = %self.config.cluster_id,
            node_id = %self.config.node_id,
            "Discovery: deregistering"
        );
        match timeout(self.config.deregister_grace, self.registration.deregister()).await {
            Ok(result) => result,
            Err(_) => {
                events::deregistration_failed(
                    &self.config.cluster_id,
                    &self.config.node_id,
                    "deregistration grace period elapsed",
                );
                Deregistration::Ignored
            }
        }
    }

    async fn check_container(&mut self, deadline: Instant) {
        match timeout_at(deadline, self.gateway.check_container()).await {
            Ok(Ok(())) => {
                debug!("Container reachable");
                self.container_checked = true;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Container check failed, continuing with registration");
                self.container_checked = true;
            }
            Err(_) => warn!("Container check did not finish before the cycle deadline"),
        }
    }

    fn deadline_exceeded(&self, stage: &str) {
        let deadline_ms = u64::try_from(self.config.cycle_deadline.as_millis()).unwrap_or(u64::MAX);
        events::cycle_deadline_exceeded(&self.config.cluster_id, stage, deadline_ms);
    }

    fn finish(&mut self, outcome: Outcome, peers: BTreeSet<NodeAddress>, started: Instant) -> DiscoveryResult {
        let elapsed = started.elapsed();
        self.state = DiscoveryState::Completed(outcome);

        metrics::record_cycle(outcome.as_str(), elapsed, peers.len());
        events::cycle_completed(
            &self.config.cluster_id,
            outcome.as_str(),
            peers.len(),
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        );

        DiscoveryResult {
            peers,
            outcome,
            next_refresh: self.config.refresh_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FaultKind, StorageOp};
    use crate::testing::FaultyClient;
    use blobmesh_core::{codec, ManualClock, MembershipRecord};

    fn config() -> DiscoveryConfig {
        DiscoveryConfig {
            cluster_id: "C1".to_string(),
            node_id: "A".to_string(),
            address: NodeAddress::new("10.0.0.1", 1883),
            ttl: Duration::from_secs(30),
            refresh_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(1),
            retry_attempts: 2,
            backoff_initial: Duration::from_millis(10),
            backoff_max: Duration::from_millis(50),
            cycle_deadline: Duration::from_secs(3),
            reap_grace: Duration::from_secs(30),
            ..DiscoveryConfig::default()
        }
    }

    fn controller(config: DiscoveryConfig, client: &Arc<FaultyClient>, clock: &ManualClock) -> DiscoveryController {
        DiscoveryController::new(config, client.clone(), Arc::new(clock.clone())).unwrap()
    }

    async fn seed_peer(client: &FaultyClient, node: &str, host: &str, now: u64) {
        let record = MembershipRecord::new(
            "C1",
            node,
            NodeAddress::new(host, 1883),
            now,
            Duration::from_secs(30),
        );
        client
            .seed(&format!("blobmesh/C1/{node}"), &codec::encode(&record).unwrap())
            .await
            .unwrap();
    }

    fn hosts(result: &DiscoveryResult) -> Vec<String> {
        result.peers.iter().map(|a| a.host.clone()).collect()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let client: Arc<dyn BlobClient> = Arc::new(FaultyClient::in_memory());
        let bad = DiscoveryConfig {
            refresh_interval: Duration::from_secs(30),
            ..config()
        };

        let result = DiscoveryController::new(bad, client, Arc::new(ManualClock::new(0)));
        assert!(matches!(result, Err(ConfigError::RefreshNotBelowTtl { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_includes_self_and_peers() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(1_000);
        seed_peer(&client, "B", "10.0.0.2", 0).await;
        let mut controller = controller(config(), &client, &clock);
        assert_eq!(controller.state(), DiscoveryState::Idle);

        let result = controller.cycle().await;

        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(hosts(&result), vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(result.next_refresh, Duration::from_secs(10));
        assert_eq!(controller.state(), DiscoveryState::Completed(Outcome::Success));
        assert_eq!(client.calls(StorageOp::Check), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_can_be_left_out() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(1_000);
        seed_peer(&client, "B", "10.0.0.2", 0).await;
        let mut controller = controller(
            DiscoveryConfig {
                include_self: false,
                ..config()
            },
            &client,
            &clock,
        );

        let result = controller.cycle().await;

        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(hosts(&result), vec!["10.0.0.2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_container_checked_once() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(0);
        let mut controller = controller(config(), &client, &clock);

        controller.cycle().await;
        clock.advance(Duration::from_secs(10));
        controller.cycle().await;

        assert_eq!(client.calls(StorageOp::Check), 1);
        assert_eq!(client.calls(StorageOp::Put), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_container_check_does_not_block_registration() {
        let client = Arc::new(FaultyClient::in_memory());
        client.fail_next(StorageOp::Check, FaultKind::Unauthorized, 1);
        let clock = ManualClock::new(0);
        let mut controller = controller(config(), &client, &clock);

        assert_eq!(controller.cycle().await.outcome, Outcome::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_failure_returns_no_peers() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(1_000);
        seed_peer(&client, "B", "10.0.0.2", 0).await;
        client.fail_next(StorageOp::Put, FaultKind::Unauthorized, 1);
        let mut controller = controller(config(), &client, &clock);

        let result = controller.cycle().await;

        assert_eq!(result.outcome, Outcome::Failure);
        assert!(result.peers.is_empty());
        assert_eq!(client.calls(StorageOp::List), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_put_fails_by_deadline() {
        let client = Arc::new(FaultyClient::in_memory());
        client.hang(StorageOp::Put);
        let clock = ManualClock::new(0);
        let mut controller = controller(
            DiscoveryConfig {
                request_timeout: Duration::from_secs(10),
                ..config()
            },
            &client,
            &clock,
        );

        let started = Instant::now();
        let result = controller.cycle().await;

        assert_eq!(result.outcome, Outcome::Failure);
        assert!(started.elapsed() <= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_get_is_partial_by_deadline() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(1_000);
        seed_peer(&client, "B", "10.0.0.2", 0).await;
        client.hang_key("blobmesh/C1/B");
        let mut controller = controller(
            DiscoveryConfig {
                request_timeout: Duration::from_secs(10),
                ..config()
            },
            &client,
            &clock,
        );

        let started = Instant::now();
        let result = controller.cycle().await;

        assert_eq!(result.outcome, Outcome::Partial);
        assert_eq!(hosts(&result), vec!["10.0.0.1"]);
        assert!(started.elapsed() <= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_listing_after_registration_is_partial() {
        let client = Arc::new(FaultyClient::in_memory());
        client.fail_next(StorageOp::List, FaultKind::Unauthorized, 1);
        let clock = ManualClock::new(0);
        let mut controller = controller(config(), &client, &clock);

        let result = controller.cycle().await;

        assert_eq!(result.outcome, Outcome::Partial);
        assert_eq!(hosts(&result), vec!["10.0.0.1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_in_grace_is_partial() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(0);
        seed_peer(&client, "B", "10.0.0.2", 0).await;
        let mut controller = controller(config(), &client, &clock);
        assert_eq!(controller.cycle().await.outcome, Outcome::Success);

        clock.advance(Duration::from_secs(10));
        client.fail_next(StorageOp::Put, FaultKind::Unauthorized, 1);
        let result = controller.cycle().await;

        assert_eq!(result.outcome, Outcome::Partial);
        assert_eq!(hosts(&result), vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_after_expiry_is_failure() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(0);
        let mut controller = controller(config(), &client, &clock);
        controller.cycle().await;

        clock.advance(Duration::from_secs(31));
        client.fail_next(StorageOp::Put, FaultKind::Unauthorized, 1);

        assert_eq!(controller.cycle().await.outcome, Outcome::Failure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaping_removes_long_expired_peers() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(0);
        seed_peer(&client, "B", "10.0.0.2", 0).await;
        let mut controller = controller(
            DiscoveryConfig {
                reap_expired: true,
                ..config()
            },
            &client,
            &clock,
        );

        // B expired at 30s and is past the 30s reap grace at 61s
        clock.set(61_000);
        let result = controller.cycle().await;

        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(hosts(&result), vec!["10.0.0.1"]);
        assert_eq!(client.calls(StorageOp::Delete), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reaping_by_default() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(0);
        seed_peer(&client, "B", "10.0.0.2", 0).await;
        let mut controller = controller(config(), &client, &clock);

        clock.set(600_000);
        controller.cycle().await;

        assert_eq!(client.calls(StorageOp::Delete), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deregister_after_cycle() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(0);
        let mut controller = controller(config(), &client, &clock);
        controller.cycle().await;

        assert_eq!(controller.deregister().await, Deregistration::Removed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_deregister_is_bounded() {
        let client = Arc::new(FaultyClient::in_memory());
        let clock = ManualClock::new(0);
        let mut controller = controller(
            DiscoveryConfig {
                request_timeout: Duration::from_secs(60),
                ..config()
            },
            &client,
            &clock,
        );
        controller.cycle().await;
        client.hang(StorageOp::Delete);

        let started = Instant::now();
        assert_eq!(controller.deregister().await, Deregistration::Ignored);
        assert!(started.elapsed() <= Duration::from_secs(5));
    }
}
