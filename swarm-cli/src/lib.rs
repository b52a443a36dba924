//! Swarm CLI Library
//!
//! Argument parsing, configuration file support and logging setup for the
//! `swarm-peer` binary.

pub mod config;
pub mod logging;

pub use config::{Args, ConfigError, FileConfig, NodeSettings};
pub use logging::{init_logging, level_for_verbosity};
