//! Swarm Packet Structures and Serialization
//!
//! Every datagram starts with a fixed 16-byte header in network byte order:
//!
//! ```text
//!  0               2       3       4               6               8
//! +---------------+-------+-------+---------------+---------------+
//! |     magic     | team  | type  |  header len   |   total len   |
//! +---------------+-------+-------+---------------+---------------+
//! |          sequence number      |        acknowledgment         |
//! +-------------------------------+-------------------------------+
//! ```
//!
//! The payload follows the header and is `total len - header len` bytes long.
//! WHOHAS, IHAVE, GET and DENIED carry a chunk hash string, DATA carries raw
//! chunk bytes and ACK carries nothing.

use crate::chunk::ChunkHash;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Protocol magic number, first field of every packet
pub const MAGIC: u16 = 52305;

/// Team identifier written by default into outgoing packets
pub const DEFAULT_TEAM_ID: u8 = 15;

/// Size of the packet header in bytes
pub const HEADER_SIZE: usize = 16;

/// Size of the datagram receive buffer
pub const MAX_DATAGRAM_SIZE: usize = 1400;

/// Packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Discovery query: who holds this chunk?
    WhoHas = 0,
    /// Discovery response: I hold this chunk
    IHave = 1,
    /// Request to download a chunk
    Get = 2,
    /// One data unit of a chunk
    Data = 3,
    /// Cumulative acknowledgment
    Ack = 4,
    /// Upload request rejected by admission control
    Denied = 5,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PacketType::WhoHas),
            1 => Some(PacketType::IHave),
            2 => Some(PacketType::Get),
            3 => Some(PacketType::Data),
            4 => Some(PacketType::Ack),
            5 => Some(PacketType::Denied),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the payload of this packet type is a chunk hash
    pub fn carries_hash(self) -> bool {
        matches!(
            self,
            PacketType::WhoHas | PacketType::IHave | PacketType::Get | PacketType::Denied
        )
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketType::WhoHas => "WHOHAS",
            PacketType::IHave => "IHAVE",
            PacketType::Get => "GET",
            PacketType::Data => "DATA",
            PacketType::Ack => "ACK",
            PacketType::Denied => "DENIED",
        };
        f.write_str(name)
    }
}

/// Packet header (16 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    /// Protocol magic, must equal [`MAGIC`]
    pub magic: u16,
    /// Team identifier (informational)
    pub team_id: u8,
    /// Packet type
    pub packet_type: PacketType,
    /// Header length in bytes
    pub header_len: u16,
    /// Header plus payload length in bytes
    pub total_len: u16,
    /// Sequence number (DATA and ACK only)
    pub seq: u32,
    /// Acknowledgment number (ACK only)
    pub ack: u32,
}

impl PacketHeader {
    /// Create a header for a packet with `payload_len` bytes of payload
    pub fn new(
        team_id: u8,
        packet_type: PacketType,
        payload_len: usize,
        seq: u32,
        ack: u32,
    ) -> Self {
        PacketHeader {
            magic: MAGIC,
            team_id,
            packet_type,
            header_len: HEADER_SIZE as u16,
            total_len: (HEADER_SIZE + payload_len) as u16,
            seq,
            ack,
        }
    }

    /// Declared payload length
    pub fn payload_len(&self) -> usize {
        self.total_len.saturating_sub(self.header_len) as usize
    }

    /// Parse header from bytes (network byte order)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < HEADER_SIZE {
            return Err(PacketError::InsufficientData {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..HEADER_SIZE];

        let magic = buf.get_u16();
        if magic != MAGIC {
            return Err(PacketError::BadMagic(magic));
        }

        let team_id = buf.get_u8();
        let type_code = buf.get_u8();
        let packet_type =
            PacketType::from_u8(type_code).ok_or(PacketError::UnknownType(type_code))?;

        Ok(PacketHeader {
            magic,
            team_id,
            packet_type,
            header_len: buf.get_u16(),
            total_len: buf.get_u16(),
            seq: buf.get_u32(),
            ack: buf.get_u32(),
        })
    }

    /// Serialize header to bytes (network byte order)
    pub fn to_bytes(&self, buf: &mut BytesMut) {
        buf.put_u16(self.magic);
        buf.put_u8(self.team_id);
        buf.put_u8(self.packet_type.as_u8());
        buf.put_u16(self.header_len);
        buf.put_u16(self.total_len);
        buf.put_u32(self.seq);
        buf.put_u32(self.ack);
    }
}

/// A decoded packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet header
    pub header: PacketHeader,
    /// Payload data
    pub payload: Bytes,
}

impl Packet {
    fn with_hash(team_id: u8, packet_type: PacketType, hash: &ChunkHash) -> Self {
        Packet {
            header: PacketHeader::new(team_id, packet_type, hash.as_bytes().len(), 0, 0),
            payload: Bytes::copy_from_slice(hash.as_bytes()),
        }
    }

    /// Discovery query for `hash`
    pub fn whohas(team_id: u8, hash: &ChunkHash) -> Self {
        Self::with_hash(team_id, PacketType::WhoHas, hash)
    }

    /// Discovery response for `hash`
    pub fn ihave(team_id: u8, hash: &ChunkHash) -> Self {
        Self::with_hash(team_id, PacketType::IHave, hash)
    }

    /// Download request for `hash`
    pub fn get(team_id: u8, hash: &ChunkHash) -> Self {
        Self::with_hash(team_id, PacketType::Get, hash)
    }

    /// Admission rejection for a GET of `hash`
    pub fn denied(team_id: u8, hash: &ChunkHash) -> Self {
        Self::with_hash(team_id, PacketType::Denied, hash)
    }

    /// Data unit `seq` carrying `payload`
    pub fn data(team_id: u8, seq: u32, payload: Bytes) -> Self {
        Packet {
            header: PacketHeader::new(team_id, PacketType::Data, payload.len(), seq, 0),
            payload,
        }
    }

    /// Acknowledgment of data unit `seq` with cumulative cursor `ack`
    pub fn ack(team_id: u8, seq: u32, ack: u32) -> Self {
        Packet {
            header: PacketHeader::new(team_id, PacketType::Ack, 0, seq, ack),
            payload: Bytes::new(),
        }
    }

    /// Get the packet type
    pub fn packet_type(&self) -> PacketType {
        self.header.packet_type
    }

    /// Interpret the payload as a chunk hash
    pub fn chunk_hash(&self) -> Result<ChunkHash, PacketError> {
        let text = std::str::from_utf8(&self.payload).map_err(|_| PacketError::InvalidHash)?;
        ChunkHash::new(text).ok_or(PacketError::InvalidHash)
    }

    /// Total size of the packet (header + payload)
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialize the packet to bytes
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());
        self.header.to_bytes(&mut buf);
        buf.put_slice(&self.payload);
        buf
    }

    /// Parse a packet from a received datagram
    ///
    /// Datagrams shorter than the declared total length are rejected. Trailing
    /// bytes past the declared total length are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let header = PacketHeader::from_bytes(bytes)?;

        let header_len = header.header_len as usize;
        let total_len = header.total_len as usize;
        if header_len < HEADER_SIZE || total_len < header_len {
            return Err(PacketError::InvalidLength {
                header_len: header.header_len,
                total_len: header.total_len,
            });
        }

        if bytes.len() < total_len {
            return Err(PacketError::InsufficientData {
                expected: total_len,
                actual: bytes.len(),
            });
        }

        let payload = Bytes::copy_from_slice(&bytes[header_len..total_len]);

        Ok(Packet { header, payload })
    }
}

/// Packet parsing and validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Bad magic number: {0}")]
    BadMagic(u16),

    #[error("Unknown packet type: {0}")]
    UnknownType(u8),

    #[error("Invalid lengths: header {header_len}, total {total_len}")]
    InvalidLength { header_len: u16, total_len: u16 },

    #[error("Payload is not a valid chunk hash")]
    InvalidHash,
}
