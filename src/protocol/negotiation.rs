//! API version negotiation
//!
//! The first message on a connection is the array of versions the client
//! speaks. The server answers with the greatest version both sides support,
//! or 0 when there is none.

use serde_json::Value;
use std::collections::BTreeSet;

use crate::constants::SUPPORTED_VERSIONS;
use crate::error::ProtocolError;

/// Versions this server can run conversations for
pub fn supported_versions() -> BTreeSet<u32> {
    SUPPORTED_VERSIONS.iter().copied().collect()
}

/// Greatest version present in both sets, 0 if they are disjoint.
///
/// Walks both sets from their largest element down, always stepping the
/// side whose current value is larger.
pub fn most_recent_shared_version(ours: &BTreeSet<u32>, theirs: &BTreeSet<u32>) -> u32 {
    let mut ours = ours.iter().rev().peekable();
    let mut theirs = theirs.iter().rev().peekable();

    while let (Some(&&a), Some(&&b)) = (ours.peek(), theirs.peek()) {
        if a == b {
            return a;
        }
        if a > b {
            ours.next();
        } else {
            theirs.next();
        }
    }
    0
}

/// Parse a client's version array
pub fn parse_versions(packet: &Value) -> Result<BTreeSet<u32>, ProtocolError> {
    let versions = packet.as_array().ok_or(ProtocolError::NotAnArray)?;
    versions
        .iter()
        .map(|v| {
            v.as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or(ProtocolError::BadVersion)
        })
        .collect()
}

/// Pick the version to speak with a client from its negotiation packet
pub fn negotiate(packet: &Value) -> Result<u32, ProtocolError> {
    let requested = parse_versions(packet)?;
    Ok(most_recent_shared_version(&supported_versions(), &requested))
}
