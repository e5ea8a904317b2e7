//! Short content hashes used as version tokens.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

const VERSION_BYTES: usize = 8;

fn short_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..VERSION_BYTES])
}

/// Version of a synced Secret payload.
///
/// Hashes the JSON object of key to base64 value; keys are sorted so equal
/// payloads always produce the same token.
pub fn data_version(data: &BTreeMap<String, Vec<u8>>) -> String {
    let encoded: BTreeMap<&str, String> =
        data.iter().map(|(k, v)| (k.as_str(), STANDARD.encode(v))).collect();
    // A map of strings always serializes.
    let json = serde_json::to_vec(&encoded).unwrap_or_default();
    short_digest(&json)
}

/// Version of a rendered policy document.
pub fn document_version(document: &str) -> String {
    short_digest(document.as_bytes())
}
