//! Membership Record Codec
//!
//! Records are stored as a flat, versioned JSON document. Field order is fixed
//! by the envelope struct, so the same record always encodes to the same bytes
//! and a retried upload rewrites an identical payload.
//!
//! Decoding never fails past this module's boundary with anything but
//! [`DecodeError`]; callers treat that as "no usable record".

use crate::models::{MembershipRecord, NodeAddress};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Payload format version written by [`encode`] and required by [`decode`].
pub const FORMAT_VERSION: u32 = 1;

/// Error returned by [`encode`].
pub type EncodeError = serde_json::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is empty")]
    Empty,
    #[error("payload is not a membership record: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported payload version {found} (expected {})", FORMAT_VERSION)]
    UnsupportedVersion { found: u32 },
    #[error("field '{0}' is blank")]
    BlankField(&'static str),
    #[error("expiry {expires_at} precedes registration {registered_at}")]
    InvertedTimestamps { registered_at: u64, expires_at: u64 },
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    version: u32,
    cluster_id: String,
    node_id: String,
    host: String,
    port: u16,
    registered_at: u64,
    expires_at: u64,
}

/// Encode a record into its storage payload.
pub fn encode(record: &MembershipRecord) -> Result<Vec<u8>, EncodeError> {
    let envelope = Envelope {
        version: FORMAT_VERSION,
        cluster_id: record.cluster_id.clone(),
        node_id: record.node_id.clone(),
        host: record.address.host.clone(),
        port: record.address.port,
        registered_at: record.registered_at,
        expires_at: record.expires_at,
    };
    serde_json::to_vec(&envelope)
}

/// Decode a storage payload back into a record.
pub fn decode(payload: &[u8]) -> Result<MembershipRecord, DecodeError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::Empty);
    }

    // Peek at the version first so a future format with extra fields reports
    // a version mismatch instead of an unknown-field error.
    #[derive(Deserialize)]
    struct VersionHeader {
        version: u32,
    }
    let header: VersionHeader = serde_json::from_slice(payload)?;
    if header.version != FORMAT_VERSION {
        return Err(DecodeError::UnsupportedVersion {
            found: header.version,
        });
    }

    let envelope: Envelope = serde_json::from_slice(payload)?;
    if envelope.cluster_id.trim().is_empty() {
        return Err(DecodeError::BlankField("cluster_id"));
    }
    if envelope.node_id.trim().is_empty() {
        return Err(DecodeError::BlankField("node_id"));
    }
    if envelope.host.trim().is_empty() {
        return Err(DecodeError::BlankField("host"));
    }
    if envelope.expires_at < envelope.registered_at {
        return Err(DecodeError::InvertedTimestamps {
            registered_at: envelope.registered_at,
            expires_at: envelope.expires_at,
        });
    }

    Ok(MembershipRecord {
        cluster_id: envelope.cluster_id,
        node_id: envelope.node_id,
        address: NodeAddress::new(envelope.host, envelope.port),
        registered_at: envelope.registered_at,
        expires_at: envelope.expires_at,
    })
}
