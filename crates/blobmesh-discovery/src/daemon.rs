//! Host Loop
//!
//! Plays the broker's side of the contract: a cycle every `refresh_interval`,
//! the previous peer view kept when a cycle fails, one deregistration on the
//! way out. The shutdown future is created once and raced against both the
//! ticker and any in-flight cycle, so a signal is never missed.

use crate::discovery::{Deregistration, DiscoveryController, Outcome};
use blobmesh_core::NodeAddress;
use std::collections::BTreeSet;
use std::future::Future;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// What the loop did before it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Cycles that ran to completion
    pub cycles: u64,
    /// Last peer view accepted from a non-failed cycle
    pub view: BTreeSet<NodeAddress>,
    pub deregistration: Deregistration,
}

/// Run cycles until `shutdown` resolves, or after one cycle when `once` is set.
pub async fn run<F>(controller: &mut DiscoveryController, once: bool, shutdown: F) -> RunReport
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(controller.config().refresh_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut view: BTreeSet<NodeAddress> = BTreeSet::new();
    let mut cycles = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }

        let result = tokio::select! {
            result = controller.cycle() => result,
            _ = &mut shutdown => {
                info!("Shutdown signal received, abandoning cycle in progress");
                break;
            }
        };
        cycles += 1;

        match result.outcome {
            Outcome::Failure => {
                warn!(peer_count = view.len(), "Discovery cycle failed, keeping previous peer view");
            }
            Outcome::Success | Outcome::Partial => {
                if result.peers != view {
                    let peers: Vec<String> = result.peers.iter().map(ToString::to_string).collect();
                    info!(outcome = result.outcome.as_str(), peers = ?peers, "Peer view changed");
                }
                view = result.peers;
            }
        }

        if once {
            break;
        }
    }

    let deregistration = controller.deregister().await;
    RunReport {
        cycles,
        view,
        deregistration,
    }
}
