//! Configuration for the swarm-peer binary
//!
//! Settings come from three layers: flags given on the command line, an
//! optional TOML file named by `--config`, and built-in defaults. A flag wins
//! over the file, and the file wins over the default.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use swarm_node::config::DEFAULT_MAX_CONN;
use swarm_node::event_loop::DEFAULT_TICK;
use swarm_node::{EngineConfig, RunOptions};
use swarm_protocol::packet::DEFAULT_TEAM_ID;

/// Command-line flags
///
/// Every setting is optional here so an absent flag can fall through to the
/// configuration file.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "swarm-peer")]
#[command(about = "Chunk swarm peer", long_about = None)]
pub struct Args {
    /// Peer list file, one '<id> <host> <port>' per line
    #[arg(short = 'p', long = "peers")]
    pub peer_file: Option<PathBuf>,

    /// Chunk store file holding the chunks this node serves
    #[arg(short = 'c', long = "chunks")]
    pub chunk_file: Option<PathBuf>,

    /// Maximum concurrent uploads
    #[arg(short = 'm', long)]
    pub max_conn: Option<usize>,

    /// This node's identity in the peer list
    #[arg(short = 'i', long)]
    pub identity: Option<u32>,

    /// Verbosity: 0 errors, 1 warnings, 2 info, 3 debug, 4 trace
    #[arg(short = 'v', long)]
    pub verbose: Option<u8>,

    /// Fixed retransmission timeout in seconds (0 estimates it from RTT)
    #[arg(short = 't', long)]
    pub timeout: Option<u64>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Team identifier written into outgoing packets
    #[arg(long)]
    pub team: Option<u8>,

    /// Scheduler tick in milliseconds
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Statistics interval in seconds (0 disables)
    #[arg(long)]
    pub stats_secs: Option<u64>,

    /// Check downloaded chunks against their SHA-1 hash
    #[arg(long)]
    pub verify_chunks: bool,
}

/// Contents of the TOML configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub peer_file: Option<PathBuf>,
    pub chunk_file: Option<PathBuf>,
    pub max_conn: Option<usize>,
    pub identity: Option<u32>,
    pub verbose: Option<u8>,
    /// Seconds; 0 estimates from RTT
    pub timeout: Option<u64>,
    pub team: Option<u8>,
    pub tick_ms: Option<u64>,
    pub stats_secs: Option<u64>,
    pub verify_chunks: Option<bool>,
}

impl FileConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: FileConfig = toml::from_str(&contents)?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Fully resolved node settings
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSettings {
    pub peer_file: PathBuf,
    pub chunk_file: PathBuf,
    pub identity: u32,
    pub max_conn: usize,
    pub verbose: u8,
    /// `None` estimates the timeout from RTT samples
    pub fixed_timeout: Option<Duration>,
    pub team_id: u8,
    pub tick: Duration,
    pub stats_interval: Option<Duration>,
    pub verify_chunks: bool,
}

impl NodeSettings {
    /// Merge command-line flags over file values over defaults
    pub fn resolve(args: &Args, file: FileConfig) -> Result<Self, ConfigError> {
        let peer_file = args
            .peer_file
            .clone()
            .or(file.peer_file)
            .ok_or(ConfigError::Missing("peer file (-p)"))?;
        let chunk_file = args
            .chunk_file
            .clone()
            .or(file.chunk_file)
            .ok_or(ConfigError::Missing("chunk file (-c)"))?;
        let identity = args
            .identity
            .or(file.identity)
            .ok_or(ConfigError::Missing("identity (-i)"))?;

        let tick_ms = args
            .tick_ms
            .or(file.tick_ms)
            .unwrap_or(DEFAULT_TICK.as_millis() as u64);
        if tick_ms == 0 {
            return Err(ConfigError::Invalid("tick must be at least 1 ms".to_string()));
        }

        let timeout = args.timeout.or(file.timeout).unwrap_or(0);
        let stats_secs = args.stats_secs.or(file.stats_secs).unwrap_or(0);

        Ok(NodeSettings {
            peer_file,
            chunk_file,
            identity,
            max_conn: args.max_conn.or(file.max_conn).unwrap_or(DEFAULT_MAX_CONN),
            verbose: args.verbose.or(file.verbose).unwrap_or(0),
            fixed_timeout: (timeout > 0).then(|| Duration::from_secs(timeout)),
            team_id: args.team.or(file.team).unwrap_or(DEFAULT_TEAM_ID),
            tick: Duration::from_millis(tick_ms),
            stats_interval: (stats_secs > 0).then(|| Duration::from_secs(stats_secs)),
            verify_chunks: args.verify_chunks || file.verify_chunks.unwrap_or(false),
        })
    }

    /// Configuration handed to the engine
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::new(self.identity)
            .with_max_conn(self.max_conn)
            .with_fixed_timeout(self.fixed_timeout)
            .with_verify_chunks(self.verify_chunks);
        config.team_id = self.team_id;
        config
    }

    /// Timing for the event loop
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            tick: self.tick,
            stats_interval: self.stats_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("swarm-peer").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_flags_only() {
        let settings = NodeSettings::resolve(
            &args(&["-p", "nodes.map", "-c", "A.chunks", "-m", "2", "-i", "3", "-v", "2"]),
            FileConfig::default(),
        )
        .unwrap();

        assert_eq!(settings.peer_file, PathBuf::from("nodes.map"));
        assert_eq!(settings.chunk_file, PathBuf::from("A.chunks"));
        assert_eq!(settings.max_conn, 2);
        assert_eq!(settings.identity, 3);
        assert_eq!(settings.verbose, 2);
        assert_eq!(settings.fixed_timeout, None);
        assert_eq!(settings.team_id, DEFAULT_TEAM_ID);
        assert_eq!(settings.tick, DEFAULT_TICK);
        assert_eq!(settings.stats_interval, None);
    }

    #[test]
    fn test_flags_override_file() {
        let file = FileConfig {
            peer_file: Some(PathBuf::from("file.map")),
            chunk_file: Some(PathBuf::from("file.chunks")),
            identity: Some(7),
            max_conn: Some(8),
            timeout: Some(2),
            ..FileConfig::default()
        };

        let settings = NodeSettings::resolve(&args(&["-i", "1", "-t", "0"]), file).unwrap();

        assert_eq!(settings.identity, 1);
        assert_eq!(settings.max_conn, 8);
        assert_eq!(settings.peer_file, PathBuf::from("file.map"));
        // An explicit zero on the command line still wins over the file
        assert_eq!(settings.fixed_timeout, None);
    }

    #[test]
    fn test_fixed_timeout() {
        let settings = NodeSettings::resolve(
            &args(&["-p", "a", "-c", "b", "-i", "1", "-t", "3", "--stats-secs", "5"]),
            FileConfig::default(),
        )
        .unwrap();

        assert_eq!(settings.fixed_timeout, Some(Duration::from_secs(3)));
        assert_eq!(settings.stats_interval, Some(Duration::from_secs(5)));
        assert_eq!(
            settings.engine_config().fixed_timeout,
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_missing_identity() {
        let err = NodeSettings::resolve(&args(&["-p", "a", "-c", "b"]), FileConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn test_zero_tick_rejected() {
        let err = NodeSettings::resolve(
            &args(&["-p", "a", "-c", "b", "-i", "1", "--tick-ms", "0"]),
            FileConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = FileConfig {
            peer_file: Some(PathBuf::from("nodes.map")),
            identity: Some(2),
            verify_chunks: Some(true),
            ..FileConfig::default()
        };

        let text = toml::to_string(&config).unwrap();
        let parsed: FileConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(toml::from_str::<FileConfig>("bogus = 1").is_err());
    }
}
