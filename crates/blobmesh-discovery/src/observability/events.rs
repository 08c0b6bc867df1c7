//! Structured Events
//!
//! Every discovery milestone has a dedicated function so field names stay
//! consistent across log lines. Each emits one `tracing` event carrying an
//! `event_type` field.

use tracing::{debug, error, info, warn};

/// Own record written or refreshed
pub fn registration_succeeded(cluster_id: &str, node_id: &str, key: &str, expires_at: u64) {
    debug!(
        event_type = "registration_succeeded",
        cluster_id = %cluster_id,
        node_id = %node_id,
        key = %key,
        expires_at = expires_at,
        "Own membership record written"
    );
}

/// Own record could not be written and no earlier record keeps the node visible
pub fn registration_failed(cluster_id: &str, node_id: &str, key: &str, error: &str) {
    error!(
        event_type = "registration_failed",
        cluster_id = %cluster_id,
        node_id = %node_id,
        key = %key,
        error = %error,
        "Own membership record could not be written"
    );
}

/// Refresh failed but the previous record is still live
pub fn registration_grace(cluster_id: &str, node_id: &str, error: &str, remaining_ms: u64) {
    warn!(
        event_type = "registration_grace",
        cluster_id = %cluster_id,
        node_id = %node_id,
        error = %error,
        remaining_ms = remaining_ms,
        "Refresh failed, previous record still live"
    );
}

pub fn deregistered(cluster_id: &str, node_id: &str, key: &str) {
    info!(
        event_type = "deregistered",
        cluster_id = %cluster_id,
        node_id = %node_id,
        key = %key,
        "Own membership record removed"
    );
}

/// Best-effort delete on shutdown failed; the record will age out
pub fn deregistration_failed(cluster_id: &str, node_id: &str, error: &str) {
    warn!(
        event_type = "deregistration_failed",
        cluster_id = %cluster_id,
        node_id = %node_id,
        error = %error,
        "Own membership record could not be removed"
    );
}

/// A listed record was not usable
pub fn record_skipped(key: &str, reason: &str) {
    debug!(
        event_type = "record_skipped",
        key = %key,
        reason = %reason,
        "Skipping membership record"
    );
}

pub fn enumeration_complete(cluster_id: &str, listed: usize, peer_count: usize) {
    debug!(
        event_type = "enumeration_complete",
        cluster_id = %cluster_id,
        listed = listed,
        peer_count = peer_count,
        "Peer enumeration complete"
    );
}

pub fn enumeration_partial(cluster_id: &str, listed: usize, unreadable: usize, peer_count: usize) {
    warn!(
        event_type = "enumeration_partial",
        cluster_id = %cluster_id,
        listed = listed,
        unreadable = unreadable,
        peer_count = peer_count,
        "Peer enumeration incomplete"
    );
}

pub fn enumeration_failed(cluster_id: &str, error: &str) {
    warn!(
        event_type = "enumeration_failed",
        cluster_id = %cluster_id,
        error = %error,
        "Peer listing failed"
    );
}

pub fn record_reaped(key: &str, node_id: &str, expired_for_ms: u64) {
    info!(
        event_type = "record_reaped",
        key = %key,
        node_id = %node_id,
        expired_for_ms = expired_for_ms,
        "Expired membership record deleted"
    );
}

pub fn cycle_deadline_exceeded(cluster_id: &str, stage: &str, deadline_ms: u64) {
    warn!(
        event_type = "cycle_deadline_exceeded",
        cluster_id = %cluster_id,
        stage = %stage,
        deadline_ms = deadline_ms,
        "Discovery cycle abandoned at deadline"
    );
}

pub fn cycle_completed(cluster_id: &str, outcome: &str, peer_count: usize, duration_ms: u64) {
    info!(
        event_type = "cycle_completed",
        cluster_id = %cluster_id,
        outcome = %outcome,
        peer_count = peer_count,
        duration_ms = duration_ms,
        "Discovery cycle completed"
    );
}
