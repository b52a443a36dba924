//! Swarm Datagram I/O
//!
//! This crate provides the datagram transport the swarm engine runs on:
//! the [`DatagramTransport`] trait, a UDP socket implementation, and an
//! in-memory lossy network for tests and local experiments.

pub mod sim;
pub mod socket;
pub mod transport;

pub use sim::{SimNetwork, SimSocket, SimStats};
pub use socket::PeerSocket;
pub use transport::{DatagramTransport, SocketError};
