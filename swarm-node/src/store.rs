//! Local chunk store
//!
//! Chunks are kept in memory as `hash -> bytes` and persisted in a versioned
//! record file:
//!
//! ```text
//! "SWCHUNKS" | version:u8 | count:u32
//! count × ( hash_len:u16 | hash (UTF-8) | data_len:u32 | data )
//! ```
//!
//! All integers are big-endian. Saving writes a temporary file next to the
//! target and renames it into place.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use swarm_protocol::ChunkHash;
use thiserror::Error;

/// File magic of a chunk store
pub const STORE_MAGIC: &[u8; 8] = b"SWCHUNKS";

/// Current chunk store format version
pub const STORE_VERSION: u8 = 1;

/// Chunk store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a chunk store file")]
    BadMagic,

    #[error("Unsupported chunk store version: {0} (expected {STORE_VERSION})")]
    UnsupportedVersion(u8),

    #[error("Chunk store truncated in record {0}")]
    Truncated(u32),

    #[error("Record {0} has an invalid chunk hash")]
    InvalidHash(u32),
}

/// In-memory chunk mapping with file persistence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkStore {
    chunks: BTreeMap<ChunkHash, Bytes>,
}

impl ChunkStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the store holds `hash`
    pub fn contains(&self, hash: &ChunkHash) -> bool {
        self.chunks.contains_key(hash)
    }

    /// Get the bytes of `hash`
    pub fn get(&self, hash: &ChunkHash) -> Option<&Bytes> {
        self.chunks.get(hash)
    }

    /// Insert or replace a chunk
    pub fn insert(&mut self, hash: ChunkHash, data: Bytes) {
        self.chunks.insert(hash, data);
    }

    /// Number of chunks held
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Iterate over held chunks in hash order
    pub fn iter(&self) -> impl Iterator<Item = (&ChunkHash, &Bytes)> {
        self.chunks.iter()
    }

    /// Encode the store in the record format
    pub fn encode(&self) -> BytesMut {
        let size: usize = self
            .chunks
            .iter()
            .map(|(hash, data)| 6 + hash.as_bytes().len() + data.len())
            .sum();

        let mut buf = BytesMut::with_capacity(STORE_MAGIC.len() + 5 + size);
        buf.put_slice(STORE_MAGIC);
        buf.put_u8(STORE_VERSION);
        buf.put_u32(self.chunks.len() as u32);

        for (hash, data) in &self.chunks {
            buf.put_u16(hash.as_bytes().len() as u16);
            buf.put_slice(hash.as_bytes());
            buf.put_u32(data.len() as u32);
            buf.put_slice(data);
        }

        buf
    }

    /// Decode a store from the record format
    pub fn decode(bytes: Bytes) -> Result<Self, StoreError> {
        let mut buf = bytes;

        if buf.remaining() < STORE_MAGIC.len() || &buf[..STORE_MAGIC.len()] != STORE_MAGIC {
            return Err(StoreError::BadMagic);
        }
        buf.advance(STORE_MAGIC.len());

        if buf.remaining() < 5 {
            return Err(StoreError::Truncated(0));
        }
        let version = buf.get_u8();
        if version != STORE_VERSION {
            return Err(StoreError::UnsupportedVersion(version));
        }

        let count = buf.get_u32();
        let mut chunks = BTreeMap::new();

        for record in 0..count {
            if buf.remaining() < 2 {
                return Err(StoreError::Truncated(record));
            }
            let hash_len = buf.get_u16() as usize;
            if buf.remaining() < hash_len {
                return Err(StoreError::Truncated(record));
            }
            let hash_bytes = buf.split_to(hash_len);
            let hash = std::str::from_utf8(&hash_bytes)
                .ok()
                .and_then(ChunkHash::new)
                .ok_or(StoreError::InvalidHash(record))?;

            if buf.remaining() < 4 {
                return Err(StoreError::Truncated(record));
            }
            let data_len = buf.get_u32() as usize;
            if buf.remaining() < data_len {
                return Err(StoreError::Truncated(record));
            }
            chunks.insert(hash, buf.split_to(data_len));
        }

        Ok(ChunkStore { chunks })
    }

    /// Load a store file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let contents = fs::read(path)?;
        Self::decode(Bytes::from(contents))
    }

    /// Write the store to `path`, replacing it atomically
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StoreError> {
        let path = path.as_ref();
        let mut temp_path = path.as_os_str().to_owned();
        temp_path.push(".tmp");

        fs::write(&temp_path, self.encode())?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}

impl FromIterator<(ChunkHash, Bytes)> for ChunkStore {
    fn from_iter<I: IntoIterator<Item = (ChunkHash, Bytes)>>(iter: I) -> Self {
        ChunkStore {
            chunks: iter.into_iter().collect(),
        }
    }
}
