//! Shared fixtures for the swarm integration tests
//!
//! [`Swarm`] runs a set of engines over one [`SimNetwork`] on a virtual clock.
//! Every step delivers what was sent in the previous step and then ticks
//! every live node, so a round trip always takes two steps.

use bytes::Bytes;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use swarm_io::{SimNetwork, SimSocket};
use swarm_node::verify::sha1_hex;
use swarm_node::{ChunkStore, Engine, EngineConfig, PeerDirectory};
use swarm_protocol::{ChunkHash, CHUNK_SIZE, MAX_DATAGRAM_SIZE};

/// Virtual time per step
pub const STEP: Duration = Duration::from_millis(5);

/// Deterministic full-size chunk and its SHA-1 hash
pub fn make_chunk(seed: u8) -> (ChunkHash, Bytes) {
    let data: Vec<u8> = (0..CHUNK_SIZE)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(seed as u32 * 7) as u8 ^ seed)
        .collect();
    let hash = ChunkHash::new(sha1_hex(&data)).expect("sha1 hex is never empty");
    (hash, Bytes::from(data))
}

/// Address of the node with `identity`
pub fn node_addr(identity: u32) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40_000 + identity as u16))
}

/// Fresh scratch directory for one test
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("swarm-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

/// Write a chunkfile listing `targets`
pub fn write_chunkfile(path: &Path, targets: &[ChunkHash]) {
    let contents: String = targets
        .iter()
        .enumerate()
        .map(|(i, hash)| format!("{} {}\n", i, hash))
        .collect();
    std::fs::write(path, contents).expect("write chunkfile");
}

pub struct SimNode {
    pub addr: SocketAddr,
    inbox: SimSocket,
    pub engine: Engine<SimSocket>,
    pub alive: bool,
}

/// A set of engines on one simulated network
pub struct Swarm {
    pub net: SimNetwork,
    pub nodes: Vec<SimNode>,
    pub now: Instant,
}

impl Swarm {
    /// One node per store, identities 1..=n with default configuration
    pub fn new(stores: Vec<ChunkStore>) -> Self {
        let configs = stores
            .into_iter()
            .enumerate()
            .map(|(i, store)| (EngineConfig::new(i as u32 + 1), store))
            .collect();
        Self::with_configs(configs)
    }

    /// One node per configuration; identities must be 1..=n
    pub fn with_configs(configs: Vec<(EngineConfig, ChunkStore)>) -> Self {
        let net = SimNetwork::new();
        let peers =
            PeerDirectory::from_entries(configs.iter().map(|(c, _)| (c.identity, node_addr(c.identity))));

        let nodes = configs
            .into_iter()
            .map(|(config, store)| {
                let addr = node_addr(config.identity);
                let inbox = net.endpoint(addr);
                let engine = Engine::new(config, inbox.clone(), peers.clone(), store);
                SimNode {
                    addr,
                    inbox,
                    engine,
                    alive: true,
                }
            })
            .collect();

        Swarm {
            net,
            nodes,
            now: Instant::now(),
        }
    }

    /// Node with `identity`
    pub fn node(&self, identity: u32) -> &SimNode {
        &self.nodes[identity as usize - 1]
    }

    /// Engine of the node with `identity`
    pub fn engine(&mut self, identity: u32) -> &mut Engine<SimSocket> {
        &mut self.nodes[identity as usize - 1].engine
    }

    /// Issue an interactive command on node `identity`
    pub fn command(&mut self, identity: u32, line: &str) {
        let now = self.now;
        self.engine(identity)
            .handle_command(line, now)
            .expect("command failed");
    }

    /// Crash node `identity`: it stops running and its traffic is lost
    pub fn kill(&mut self, identity: u32) {
        let node = &mut self.nodes[identity as usize - 1];
        node.alive = false;
        self.net.disconnect(node.addr);
    }

    /// Advance one step
    pub fn step(&mut self) {
        self.now += STEP;
        let now = self.now;
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];

        let mut queued: Vec<Vec<(SocketAddr, Vec<u8>)>> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let mut datagrams = Vec::new();
            while let Ok((n, from)) = node.inbox.try_recv_from(&mut buf) {
                datagrams.push((from, buf[..n].to_vec()));
            }
            queued.push(datagrams);
        }

        for (node, datagrams) in self.nodes.iter_mut().zip(queued) {
            if !node.alive {
                continue;
            }
            for (from, datagram) in datagrams {
                node.engine
                    .handle_datagram(from, &datagram, now)
                    .expect("datagram handling failed");
            }
        }

        for node in self.nodes.iter_mut().filter(|node| node.alive) {
            node.engine.tick(now);
        }
    }

    /// Step until `done` holds, returning the number of steps taken
    ///
    /// Panics after `max_steps`.
    pub fn run_until(&mut self, max_steps: usize, mut done: impl FnMut(&Swarm) -> bool) -> usize {
        for steps in 0..max_steps {
            if done(self) {
                return steps;
            }
            self.step();
        }
        panic!("condition not reached after {} steps", max_steps);
    }
}
