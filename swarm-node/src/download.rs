//! Download manager
//!
//! Tracks one DOWNLOAD run: the target chunks, which of them still need a
//! peer, and the bytes of those already fetched. Each scheduler tick the
//! manager walks the unfetched targets and sends one GET per idle candidate
//! peer, never more than one in-flight chunk per peer.

use crate::directory::SwarmDirectory;
use crate::store::ChunkStore;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Instant;
use swarm_protocol::{ChunkHash, ReceiveSession};
use thiserror::Error;

/// Chunkfile errors
#[derive(Error, Debug)]
pub enum TargetListError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line {line}: expected '<index> <hash>', got '{text}'")]
    Parse { line: usize, text: String },
}

/// Read the target chunk hashes listed in a chunkfile
///
/// Each non-empty line is `<index> <hash>` or a bare `<hash>`.
pub fn read_targets<P: AsRef<Path>>(path: P) -> Result<Vec<ChunkHash>, TargetListError> {
    let contents = fs::read_to_string(path)?;
    parse_targets(&contents)
}

/// Parse chunkfile text
pub fn parse_targets(contents: &str) -> Result<Vec<ChunkHash>, TargetListError> {
    let mut targets = Vec::new();

    for (index, raw) in contents.lines().enumerate() {
        let fields: Vec<&str> = raw.split_whitespace().collect();
        let hash = match fields[..] {
            [] => continue,
            [hash] | [_, hash] => ChunkHash::new(hash),
            _ => None,
        };

        match hash {
            Some(hash) => targets.push(hash),
            None => {
                return Err(TargetListError::Parse {
                    line: index + 1,
                    text: raw.trim().to_string(),
                })
            }
        }
    }

    Ok(targets)
}

/// A download run that fetched every target
#[derive(Debug)]
pub struct FinishedDownload {
    /// Where the completed mapping must be persisted
    pub output: PathBuf,
    /// Every target chunk with its bytes
    pub chunks: ChunkStore,
}

/// State of the active DOWNLOAD command
#[derive(Debug, Default)]
pub struct DownloadManager {
    /// Target hashes in chunkfile order
    targets: Vec<ChunkHash>,
    /// Targets with no GET in flight and no bytes yet
    unfetched: HashSet<ChunkHash>,
    /// Fetched targets
    completed: BTreeMap<ChunkHash, Bytes>,
    /// Output file of the active run
    output: Option<PathBuf>,
}

impl DownloadManager {
    /// Create an idle manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a DOWNLOAD run is active
    pub fn is_downloading(&self) -> bool {
        self.output.is_some()
    }

    /// Begin a run; duplicate targets are collapsed
    ///
    /// Returns false, leaving the active run untouched, if one is in progress.
    pub fn start(&mut self, targets: Vec<ChunkHash>, output: PathBuf) -> bool {
        if self.is_downloading() {
            return false;
        }

        let mut seen = HashSet::new();
        self.targets = targets
            .into_iter()
            .filter(|hash| seen.insert(hash.clone()))
            .collect();
        self.unfetched = self.targets.iter().cloned().collect();
        self.completed.clear();
        self.output = Some(output);
        true
    }

    /// Target hashes in chunkfile order
    pub fn targets(&self) -> &[ChunkHash] {
        &self.targets
    }

    /// Whether `hash` is waiting for a GET
    pub fn is_unfetched(&self, hash: &ChunkHash) -> bool {
        self.unfetched.contains(hash)
    }

    /// Number of targets waiting for a GET
    pub fn unfetched_count(&self) -> usize {
        self.unfetched.len()
    }

    /// Number of targets fetched
    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Return an in-flight target to the unfetched set
    pub fn requeue(&mut self, hash: &ChunkHash) {
        if self.is_downloading()
            && self.targets.contains(hash)
            && !self.completed.contains_key(hash)
        {
            self.unfetched.insert(hash.clone());
        }
    }

    /// Send one GET per idle head candidate of every unfetched target
    ///
    /// A head candidate that already has a download in flight is rotated to
    /// the tail of its queue and the target waits for a later tick. Every
    /// issued GET opens a receive session keyed by the candidate.
    pub fn issue_gets(
        &mut self,
        directory: &mut SwarmDirectory,
        receivers: &mut HashMap<SocketAddr, ReceiveSession>,
        now: Instant,
    ) -> Vec<(SocketAddr, ChunkHash)> {
        let mut requests = Vec::new();

        for hash in &self.targets {
            if !self.unfetched.contains(hash) {
                continue;
            }
            let Some(peer) = directory.peek(hash) else {
                continue;
            };

            if receivers.contains_key(&peer) {
                directory.rotate(hash);
                continue;
            }

            receivers.insert(peer, ReceiveSession::new(hash.clone(), now));
            self.unfetched.remove(hash);
            requests.push((peer, hash.clone()));
        }

        requests
    }

    /// Record a fetched target
    ///
    /// Returns the finished run once every target has been fetched. Chunks that
    /// are not targets of the active run, or were already fetched, are ignored.
    pub fn complete(&mut self, hash: ChunkHash, data: Bytes) -> Option<FinishedDownload> {
        if !self.is_downloading()
            || !self.targets.contains(&hash)
            || self.completed.contains_key(&hash)
        {
            return None;
        }

        self.unfetched.remove(&hash);
        self.completed.insert(hash, data);
        self.finish_if_done()
    }

    /// Finish the run if nothing is left to fetch
    pub fn finish_if_done(&mut self) -> Option<FinishedDownload> {
        if self.completed.len() < self.targets.len() {
            return None;
        }

        let output = self.output.take()?;
        let chunks = std::mem::take(&mut self.completed).into_iter().collect();
        self.targets.clear();
        self.unfetched.clear();

        Some(FinishedDownload { output, chunks })
    }
}
