//! Swarm node
//!
//! Everything a chunk-swarm peer does above the wire protocol: the peer and
//! chunk stores it starts from, swarm discovery, download scheduling, upload
//! admission, failure handling and the event loop that drives them.

pub mod config;
pub mod directory;
pub mod download;
pub mod engine;
pub mod event_loop;
pub mod peers;
pub mod stats;
pub mod store;
pub mod verify;

pub use config::EngineConfig;
pub use directory::SwarmDirectory;
pub use download::{parse_targets, read_targets, DownloadManager, FinishedDownload, TargetListError};
pub use engine::{Engine, EngineError};
pub use event_loop::{run, spawn_command_reader, spawn_receiver, Datagram, RunOptions, Shutdown};
pub use peers::{PeerDirectory, PeerListError};
pub use stats::{format_bytes, Counters, EngineStats, UploadStats};
pub use store::{ChunkStore, StoreError};
