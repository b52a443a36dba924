//! Swarm Protocol Core Implementation
//!
//! This crate implements the chunk-swarm wire protocol and the per-peer
//! transport state machines layered on unreliable datagrams: packet codec,
//! chunk geometry, RTT estimation, AIMD congestion control, upload sessions
//! and download reassembly. Nothing here performs I/O.

pub mod chunk;
pub mod congestion;
pub mod packet;
pub mod receive;
pub mod rtt;
pub mod send;

pub use chunk::{unit_count, unit_range, ChunkHash, CHUNK_SIZE, MAX_PAYLOAD_SIZE};
pub use congestion::{CongestionController, CongestionMode, CongestionStats};
pub use packet::{Packet, PacketError, PacketHeader, PacketType, MAGIC, MAX_DATAGRAM_SIZE};
pub use receive::ReceiveSession;
pub use rtt::RttEstimator;
pub use send::{AckOutcome, SendSession, MAX_RETRANSMITS};
