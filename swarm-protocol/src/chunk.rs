//! Chunk identity and geometry
//!
//! A chunk is a fixed 512 KiB block of content named by an opaque hash string.
//! Chunks travel as a series of data units of at most [`MAX_PAYLOAD_SIZE`] bytes,
//! numbered from 1. Only the final unit of a chunk may be shorter.

use std::fmt;
use std::ops::Range;

/// Size of one chunk in bytes
pub const CHUNK_SIZE: usize = 512 * 1024;

/// Maximum payload carried by a single DATA packet
pub const MAX_PAYLOAD_SIZE: usize = 1024;

/// Opaque chunk identifier
///
/// On the wire a chunk hash is carried as its UTF-8 string form. The node never
/// interprets the string except for the optional SHA-1 verification of
/// reassembled chunks.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkHash(String);

impl ChunkHash {
    /// Create a chunk hash from its string form
    ///
    /// Surrounding whitespace is stripped. Returns `None` for an empty string.
    pub fn new(value: impl AsRef<str>) -> Option<Self> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(ChunkHash(trimmed.to_string()))
        }
    }

    /// Get the string form of the hash
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the wire form of the hash
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkHash({})", self.0)
    }
}

/// Number of data units needed to carry `chunk_len` bytes
#[inline]
pub fn unit_count(chunk_len: usize) -> u32 {
    chunk_len.div_ceil(MAX_PAYLOAD_SIZE) as u32
}

/// Byte range within a chunk covered by data unit `seq`
///
/// Returns `None` when `seq` is 0 or lies past the end of the chunk.
pub fn unit_range(seq: u32, chunk_len: usize) -> Option<Range<usize>> {
    if seq == 0 {
        return None;
    }

    let start = (seq as usize - 1) * MAX_PAYLOAD_SIZE;
    let end = (seq as usize * MAX_PAYLOAD_SIZE).min(chunk_len);

    if start >= end {
        None
    } else {
        Some(start..end)
    }
}
