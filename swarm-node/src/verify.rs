//! Chunk integrity check
//!
//! Chunk hashes in a swarm are the lowercase hex SHA-1 of the chunk bytes.
//! Verification is optional and only applied to reassembled downloads.

use ring::digest::{digest, SHA1_FOR_LEGACY_USE_ONLY};
use std::fmt::Write;
use swarm_protocol::ChunkHash;

/// Lowercase hex SHA-1 of `data`
pub fn sha1_hex(data: &[u8]) -> String {
    let hash = digest(&SHA1_FOR_LEGACY_USE_ONLY, data);
    hash.as_ref()
        .iter()
        .fold(String::with_capacity(40), |mut out, byte| {
            let _ = write!(out, "{:02x}", byte);
            out
        })
}

/// Whether `data` hashes to `hash`
pub fn chunk_matches(hash: &ChunkHash, data: &[u8]) -> bool {
    sha1_hex(data).eq_ignore_ascii_case(hash.as_str())
}
