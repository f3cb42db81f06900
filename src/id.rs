//! Flow id generation.
//!
//! Ids are generated on the client side (the CLI here) and handed to
//! `save`. They start with a fixed-width timestamp so that sort-key order
//! within an owner partition follows creation order.

use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Generate a flow id from title + time + entropy.
/// Format: "fl-" + 12 hex chars of milliseconds + "-" + 8 hex chars of SHA256(title + nanos + random)
pub fn generate_flow_id(title: &str, created_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(created_at.timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
    hasher.update(rand::rng().random::<[u8; 8]>());
    let hash = hasher.finalize();

    let millis = created_at.timestamp_millis().max(0) as u64;
    format!(
        "fl-{:012x}-{:08x}",
        millis,
        u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]])
    )
}
