//! Optional deletion of long-expired records left behind by crashed nodes.
//! Absent records are already invisible to enumeration, so nothing here can
//! change a cycle's outcome.

use super::enumeration::ExpiredRecord;
use crate::observability::{events, metrics};
use crate::storage::StorageGateway;
use blobmesh_core::{codec, Clock};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct Reaper {
    gateway: StorageGateway,
    own_key: String,
    grace: Duration,
    clock: Arc<dyn Clock>,
}

impl Reaper {
    pub fn new(gateway: StorageGateway, own_key: String, grace: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            gateway,
            own_key,
            grace,
            clock,
        }
    }

    /// Delete records expired for longer than the grace period.
    ///
    /// Each candidate is re-read first and left alone if its owner refreshed
    /// it since enumeration. Returns the number of records deleted.
    pub async fn reap(&self, expired: &[ExpiredRecord]) -> usize {
        let now = self.clock.now_millis();
        let grace_ms = u64::try_from(self.grace.as_millis()).unwrap_or(u64::MAX);
        let mut reaped = 0;

        for candidate in expired {
            if candidate.key == self.own_key {
                continue;
            }
            let expired_for = match candidate.record.expired_for(now) {
                Some(ms) if ms > grace_ms => ms,
                _ => continue,
            };

            match self.gateway.get(&candidate.key).await {
                Ok(payload) => match codec::decode(&payload) {
                    Ok(current) if current.expires_at == candidate.record.expires_at => {}
                    Ok(_) => {
                        debug!(key = %candidate.key, "Record refreshed since listing, not reaping");
                        continue;
                    }
                    Err(e) => {
                        debug!(key = %candidate.key, error = %e, "Record no longer decodes, not reaping");
                        continue;
                    }
                },
                Err(e) => {
                    debug!(key = %candidate.key, error = %e, "Re-read before reaping failed");
                    continue;
                }
            }

            match self.gateway.delete(&candidate.key).await {
                Ok(()) => {
                    reaped += 1;
                    metrics::record_reaped();
                    events::record_reaped(&candidate.key, &candidate.record.node_id, expired_for);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    debug!(key = %candidate.key, error = %e, "Reaping failed, leaving record");
                }
            }
        }
        reaped
    }
}
