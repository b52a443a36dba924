//! Swarm engine
//!
//! The engine owns every piece of per-peer state: upload sessions, download
//! sessions, RTT estimators, the swarm directory and the active download run.
//! It is driven from outside with three entry points, each given the current
//! time:
//!
//! - [`Engine::handle_datagram`] for every inbound datagram
//! - [`Engine::handle_command`] for every interactive command line
//! - [`Engine::tick`] on a fixed cadence, running the retransmission scan,
//!   GET issuance and failure detection in that order
//!
//! Only a failure to persist a finished download is reported as an error.
//! Everything else (foreign datagrams, unknown sessions, lossy sends, refused
//! uploads, dead peers) is handled locally and logged.

use crate::config::EngineConfig;
use crate::directory::SwarmDirectory;
use crate::download::{read_targets, DownloadManager, FinishedDownload};
use crate::peers::PeerDirectory;
use crate::stats::{Counters, EngineStats, UploadStats};
use crate::store::{ChunkStore, StoreError};
use crate::verify::chunk_matches;
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use swarm_io::DatagramTransport;
use swarm_protocol::rtt::DEFAULT_TIMEOUT;
use swarm_protocol::{
    unit_range, ChunkHash, Packet, PacketType, ReceiveSession, RttEstimator, SendSession,
    CHUNK_SIZE,
};
use thiserror::Error;

/// Fatal engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to persist download to {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: StoreError,
    },
}

/// Single-owner context for all swarm state
pub struct Engine<T: DatagramTransport> {
    config: EngineConfig,
    transport: T,
    peers: PeerDirectory,
    store: ChunkStore,
    /// Uploads, keyed by receiving peer
    senders: HashMap<SocketAddr, SendSession>,
    /// Downloads, keyed by sending peer
    receivers: HashMap<SocketAddr, ReceiveSession>,
    /// RTT estimators, surviving across sessions
    rtt: HashMap<SocketAddr, RttEstimator>,
    /// When IHAVE was last sent to each peer, for the first RTT sample
    ihave_sent: HashMap<SocketAddr, Instant>,
    directory: SwarmDirectory,
    download: DownloadManager,
    counters: Counters,
}

impl<T: DatagramTransport> Engine<T> {
    /// Create an engine serving `store` over `transport`
    pub fn new(config: EngineConfig, transport: T, peers: PeerDirectory, store: ChunkStore) -> Self {
        Engine {
            config,
            transport,
            peers,
            store,
            senders: HashMap::new(),
            receivers: HashMap::new(),
            rtt: HashMap::new(),
            ihave_sent: HashMap::new(),
            directory: SwarmDirectory::new(),
            download: DownloadManager::new(),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn directory(&self) -> &SwarmDirectory {
        &self.directory
    }

    pub fn download(&self) -> &DownloadManager {
        &self.download
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Upload session to `peer`, if any
    pub fn send_session(&self, peer: &SocketAddr) -> Option<&SendSession> {
        self.senders.get(peer)
    }

    /// Download session from `peer`, if any
    pub fn receive_session(&self, peer: &SocketAddr) -> Option<&ReceiveSession> {
        self.receivers.get(peer)
    }

    /// Number of active uploads
    pub fn send_session_count(&self) -> usize {
        self.senders.len()
    }

    /// Number of active downloads
    pub fn receive_session_count(&self) -> usize {
        self.receivers.len()
    }

    /// RTT estimator for `peer`, if one exists
    pub fn rtt_estimator(&self, peer: &SocketAddr) -> Option<&RttEstimator> {
        self.rtt.get(peer)
    }

    /// Retransmission timeout currently applied to `peer`
    pub fn timeout_for(&self, peer: &SocketAddr) -> Duration {
        peer_timeout(&self.rtt, self.config.fixed_timeout, peer)
    }

    /// How long a download from `peer` may go without data before it is reassigned
    pub fn stall_threshold(&self, peer: &SocketAddr) -> Duration {
        let sampled = self.rtt.get(peer).is_some_and(RttEstimator::is_sampled);

        if self.config.fixed_timeout.is_some() || sampled {
            self.timeout_for(peer) * self.config.stall_factor
        } else {
            self.config.stall_fallback
        }
    }

    /// Held chunk data that can be uploaded
    ///
    /// Only full-size chunks are served. A shorter chunk can never be
    /// completed by a receiver expecting [`CHUNK_SIZE`] bytes.
    fn servable(&self, hash: &ChunkHash) -> Option<Bytes> {
        self.store
            .get(hash)
            .filter(|data| data.len() == CHUNK_SIZE)
            .cloned()
    }

    /// Snapshot of sessions and counters
    pub fn stats(&self) -> EngineStats {
        let mut uploads: Vec<UploadStats> = self
            .senders
            .iter()
            .map(|(peer, session)| UploadStats {
                peer: *peer,
                hash: session.hash().clone(),
                ack: session.ack(),
                total_units: session.total_units(),
                cwnd: session.congestion().cwnd(),
                ssthresh: session.congestion().ssthresh(),
            })
            .collect();
        uploads.sort_by_key(|upload| upload.peer);

        EngineStats {
            uploads,
            downloads: self.receivers.len(),
            download_progress: self.download.is_downloading().then(|| {
                (
                    self.download.completed_count(),
                    self.download.targets().len(),
                )
            }),
            counters: self.counters,
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Process one interactive command line
    ///
    /// The only command is `DOWNLOAD <chunkfile> <outputfile>`.
    pub fn handle_command(&mut self, line: &str, now: Instant) -> Result<(), EngineError> {
        let fields: Vec<&str> = line.split_whitespace().collect();

        match fields[..] {
            [] => Ok(()),
            ["DOWNLOAD", chunkfile, output] => {
                self.start_download(Path::new(chunkfile), PathBuf::from(output), now)
            }
            _ => {
                tracing::warn!("Ignoring unknown command: {}", line.trim());
                Ok(())
            }
        }
    }

    /// Start a download run for the targets listed in `chunkfile`
    pub fn start_download(
        &mut self,
        chunkfile: &Path,
        output: PathBuf,
        now: Instant,
    ) -> Result<(), EngineError> {
        match read_targets(chunkfile) {
            Ok(targets) => self.begin_download(targets, output, now).map(|_| ()),
            Err(e) => {
                tracing::error!("Cannot read chunkfile {}: {}", chunkfile.display(), e);
                Ok(())
            }
        }
    }

    /// Start a download run for `targets`
    ///
    /// Returns false when another run is still active. Targets already in the
    /// local store complete immediately; WHOHAS is flooded for the rest.
    pub fn begin_download(
        &mut self,
        targets: Vec<ChunkHash>,
        output: PathBuf,
        _now: Instant,
    ) -> Result<bool, EngineError> {
        if !self.download.start(targets, output) {
            tracing::warn!("A download is already in progress, ignoring DOWNLOAD");
            return Ok(false);
        }

        let targets = self.download.targets().to_vec();
        tracing::info!("Starting download of {} chunks", targets.len());

        for hash in &targets {
            if let Some(data) = self.store.get(hash).cloned() {
                tracing::info!(%hash, "chunk already held locally");
                if let Some(finished) = self.download.complete(hash.clone(), data) {
                    self.persist(finished)?;
                    return Ok(true);
                }
            }
        }

        if let Some(finished) = self.download.finish_if_done() {
            self.persist(finished)?;
            return Ok(true);
        }

        let others: Vec<SocketAddr> = self.peers.others(self.config.identity).collect();
        for hash in &targets {
            if !self.download.is_unfetched(hash) {
                continue;
            }
            let whohas = Packet::whohas(self.config.team_id, hash);
            for peer in &others {
                self.send_packet(*peer, &whohas);
            }
        }

        Ok(true)
    }

    fn persist(&mut self, finished: FinishedDownload) -> Result<(), EngineError> {
        let FinishedDownload { output, chunks } = finished;

        chunks.save(&output).map_err(|source| EngineError::Persist {
            path: output.clone(),
            source,
        })?;

        tracing::info!(
            "Download finished: {} chunks written to {}",
            chunks.len(),
            output.display()
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inbound datagrams
    // ------------------------------------------------------------------

    /// Process one inbound datagram from `from`
    pub fn handle_datagram(
        &mut self,
        from: SocketAddr,
        datagram: &[u8],
        now: Instant,
    ) -> Result<(), EngineError> {
        let packet = match Packet::from_bytes(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                self.counters.packets_invalid += 1;
                tracing::trace!(%from, "dropping datagram: {}", e);
                return Ok(());
            }
        };
        self.counters.packets_received += 1;

        let packet_type = packet.packet_type();
        tracing::trace!(%from, %packet_type, seq = packet.header.seq, ack = packet.header.ack, "packet");

        if packet_type.carries_hash() {
            let hash = match packet.chunk_hash() {
                Ok(hash) => hash,
                Err(e) => {
                    self.counters.packets_invalid += 1;
                    tracing::trace!(%from, "dropping {}: {}", packet_type, e);
                    return Ok(());
                }
            };

            match packet_type {
                PacketType::WhoHas => self.on_whohas(from, hash, now),
                PacketType::IHave => self.on_ihave(from, hash),
                PacketType::Get => self.on_get(from, hash, now),
                _ => self.on_denied(from, hash),
            }
            return Ok(());
        }

        match packet_type {
            PacketType::Data => self.on_data(from, packet.header.seq, packet.payload, now),
            _ => {
                self.on_ack(from, packet.header.seq, packet.header.ack, now);
                Ok(())
            }
        }
    }

    fn on_whohas(&mut self, from: SocketAddr, hash: ChunkHash, now: Instant) {
        if self.servable(&hash).is_none() {
            if self.store.contains(&hash) {
                tracing::debug!(%from, %hash, "not advertising short chunk");
            }
            return;
        }

        self.send_packet(from, &Packet::ihave(self.config.team_id, &hash));
        self.ihave_sent.insert(from, now);
    }

    fn on_ihave(&mut self, from: SocketAddr, hash: ChunkHash) {
        tracing::debug!(%from, %hash, "discovered candidate");
        self.directory.add_candidate(hash, from);
    }

    fn on_get(&mut self, from: SocketAddr, hash: ChunkHash, now: Instant) {
        // A repeated GET from the same peer replaces its old session
        let active = self.senders.len() - usize::from(self.senders.contains_key(&from));
        if active >= self.config.max_conn {
            tracing::warn!(%from, %hash, "upload capacity reached, denying GET");
            self.counters.denied_sent += 1;
            self.send_packet(from, &Packet::denied(self.config.team_id, &hash));
            return;
        }

        let data = match self.servable(&hash) {
            Some(data) => data,
            None => {
                tracing::warn!(%from, %hash, "GET for a chunk not servable, denying");
                self.counters.denied_sent += 1;
                self.send_packet(from, &Packet::denied(self.config.team_id, &hash));
                return;
            }
        };

        if let Some(sent_at) = self.ihave_sent.remove(&from) {
            let elapsed = now.saturating_duration_since(sent_at);
            if elapsed <= self.config.ihave_max_age {
                self.sample_rtt(from, elapsed);
            } else {
                tracing::trace!(%from, ?elapsed, "IHAVE too old for an RTT sample");
            }
        }

        tracing::info!(%from, %hash, "starting upload");
        let session = SendSession::new(hash, data.len(), now);
        self.senders.insert(from, session);
        self.send_units(from, &data, &[1], 0);
    }

    fn on_data(
        &mut self,
        from: SocketAddr,
        seq: u32,
        payload: Bytes,
        now: Instant,
    ) -> Result<(), EngineError> {
        let Some(session) = self.receivers.get_mut(&from) else {
            tracing::trace!(%from, seq, "DATA without a download session");
            return Ok(());
        };

        let first_unit = session.units_received() == 0;
        let requested_at = session.requested_at();
        let len = payload.len() as u64;

        // Refused units get no ack
        let Some(ack) = session.on_data(seq, payload, now) else {
            self.counters.packets_invalid += 1;
            return Ok(());
        };
        let complete = session.is_complete();
        self.counters.bytes_downloaded += len;

        if first_unit {
            self.sample_rtt(from, now.saturating_duration_since(requested_at));
        }

        self.send_packet(from, &Packet::ack(self.config.team_id, seq, ack));

        if !complete {
            return Ok(());
        }

        let Some(session) = self.receivers.remove(&from) else {
            return Ok(());
        };
        let hash = session.hash().clone();
        let data = session.into_chunk();

        if self.config.verify_chunks && !chunk_matches(&hash, &data) {
            tracing::warn!(%from, %hash, "chunk failed verification, trying another peer");
            self.reassign(from, &hash);
            return Ok(());
        }

        tracing::info!(%from, %hash, "chunk received");
        self.counters.chunks_received += 1;
        self.store.insert(hash.clone(), data.clone());

        match self.download.complete(hash, data) {
            Some(finished) => self.persist(finished),
            None => Ok(()),
        }
    }

    fn on_ack(&mut self, from: SocketAddr, seq: u32, ack: u32, now: Instant) {
        let Some(session) = self.senders.get_mut(&from) else {
            tracing::trace!(%from, seq, ack, "ACK without an upload session");
            return;
        };

        let outcome = session.on_ack(seq, ack, now);
        let retransmits = outcome
            .transmit
            .iter()
            .filter(|seq| session.transmissions(**seq) > 1)
            .count();
        let hash = session.hash().clone();

        if let Some(sample) = outcome.rtt_sample {
            self.sample_rtt(from, sample);
        }

        if outcome.complete {
            tracing::info!(%from, %hash, "upload complete");
            self.senders.remove(&from);
            return;
        }

        if outcome.transmit.is_empty() {
            return;
        }

        match self.store.get(&hash).cloned() {
            Some(data) => self.send_units(from, &data, &outcome.transmit, retransmits),
            None => {
                tracing::error!(%from, %hash, "uploaded chunk vanished from store");
                self.senders.remove(&from);
            }
        }
    }

    fn on_denied(&mut self, from: SocketAddr, hash: ChunkHash) {
        let in_flight = self
            .receivers
            .get(&from)
            .is_some_and(|session| session.hash() == &hash);

        if !in_flight {
            tracing::trace!(%from, %hash, "DENIED for no in-flight GET");
            return;
        }

        tracing::warn!(%from, %hash, "GET denied, trying another peer");
        self.receivers.remove(&from);
        self.reassign(from, &hash);
    }

    fn sample_rtt(&mut self, peer: SocketAddr, sample: Duration) {
        let fixed = self.config.fixed_timeout;
        self.rtt
            .entry(peer)
            .or_insert_with(|| RttEstimator::new(fixed))
            .sample(sample);
    }

    fn reassign(&mut self, peer: SocketAddr, hash: &ChunkHash) {
        self.counters.downloads_reassigned += 1;
        self.directory.demote(hash, peer);
        self.download.requeue(hash);
    }

    // ------------------------------------------------------------------
    // Periodic maintenance
    // ------------------------------------------------------------------

    /// Run one scheduler tick
    pub fn tick(&mut self, now: Instant) {
        self.retransmit_expired(now);
        self.issue_gets(now);
        self.detect_failures(now);
        self.expire_ihaves(now);
    }

    /// Forget IHAVE timestamps too old to sample
    fn expire_ihaves(&mut self, now: Instant) {
        let max_age = self.config.ihave_max_age;
        self.ihave_sent
            .retain(|_, sent_at| now.saturating_duration_since(*sent_at) <= max_age);
    }

    /// Number of IHAVE timestamps awaiting a GET
    pub fn pending_ihaves(&self) -> usize {
        self.ihave_sent.len()
    }

    /// Retransmit every unit whose timer expired
    pub fn retransmit_expired(&mut self, now: Instant) {
        let fixed = self.config.fixed_timeout;
        let mut expired = Vec::new();

        for (peer, session) in self.senders.iter_mut() {
            let timeout = peer_timeout(&self.rtt, fixed, peer);
            let seqs = session.poll_timeouts(now, timeout);
            if !seqs.is_empty() {
                expired.push((*peer, session.hash().clone(), seqs));
            }
        }

        for (peer, hash, seqs) in expired {
            if let Some(data) = self.store.get(&hash).cloned() {
                let count = seqs.len();
                self.send_units(peer, &data, &seqs, count);
            }
        }
    }

    /// Send GETs for unfetched targets to idle candidates
    pub fn issue_gets(&mut self, now: Instant) {
        let requests = self
            .download
            .issue_gets(&mut self.directory, &mut self.receivers, now);

        for (peer, hash) in requests {
            tracing::debug!(%peer, %hash, "sending GET");
            self.send_packet(peer, &Packet::get(self.config.team_id, &hash));
        }
    }

    /// Drop uploads to unresponsive peers and reassign stalled downloads
    pub fn detect_failures(&mut self, now: Instant) {
        let max_retransmits = self.config.max_retransmits;
        let dead: Vec<SocketAddr> = self
            .senders
            .iter()
            .filter(|(_, session)| session.is_unresponsive(max_retransmits))
            .map(|(peer, _)| *peer)
            .collect();

        for peer in dead {
            if let Some(session) = self.senders.remove(&peer) {
                tracing::warn!(%peer, hash = %session.hash(), "receiver unresponsive, abandoning upload");
                self.counters.uploads_abandoned += 1;
            }
        }

        let stalled: Vec<SocketAddr> = self
            .receivers
            .iter()
            .filter(|(peer, session)| {
                now.saturating_duration_since(session.last_activity()) > self.stall_threshold(peer)
            })
            .map(|(peer, _)| *peer)
            .collect();

        for peer in stalled {
            if let Some(session) = self.receivers.remove(&peer) {
                let hash = session.hash().clone();
                tracing::warn!(%peer, %hash, "download stalled, trying another peer");
                self.reassign(peer, &hash);
            }
        }
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    fn send_units(&mut self, peer: SocketAddr, data: &Bytes, seqs: &[u32], retransmits: usize) {
        self.counters.retransmissions += retransmits as u64;

        for &seq in seqs {
            let Some(range) = unit_range(seq, data.len()) else {
                continue;
            };
            self.counters.bytes_uploaded += range.len() as u64;
            let packet = Packet::data(self.config.team_id, seq, data.slice(range));
            self.send_packet(peer, &packet);
        }
    }

    fn send_packet(&mut self, peer: SocketAddr, packet: &Packet) {
        match self.transport.send_to(&packet.to_bytes(), peer) {
            Ok(_) => self.counters.packets_sent += 1,
            Err(e) => {
                tracing::warn!(%peer, packet_type = %packet.packet_type(), "send failed: {}", e)
            }
        }
    }
}

fn peer_timeout(
    rtt: &HashMap<SocketAddr, RttEstimator>,
    fixed: Option<Duration>,
    peer: &SocketAddr,
) -> Duration {
    match (fixed, rtt.get(peer)) {
        (Some(fixed), _) => fixed,
        (None, Some(estimator)) => estimator.timeout(),
        (None, None) => DEFAULT_TIMEOUT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_io::{SimNetwork, SimSocket};
    use swarm_protocol::CHUNK_SIZE;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn hash() -> ChunkHash {
        ChunkHash::new("3b68110847941b84e8d05417a5b2609122a56314").unwrap()
    }

    fn chunk() -> Bytes {
        Bytes::from((0..CHUNK_SIZE).map(|i| (i % 253) as u8).collect::<Vec<u8>>())
    }

    fn peers() -> PeerDirectory {
        PeerDirectory::from_entries((1..=4).map(|id| (id, addr(id as u16))))
    }

    fn uploader(net: &SimNetwork, max_conn: usize) -> Engine<SimSocket> {
        let mut store = ChunkStore::new();
        store.insert(hash(), chunk());
        let config = EngineConfig::new(1).with_max_conn(max_conn);
        Engine::new(config, net.endpoint(addr(1)), peers(), store)
    }

    fn drain(socket: &SimSocket) -> Vec<Packet> {
        let mut buf = [0u8; 1500];
        let mut packets = Vec::new();
        while let Ok((n, _)) = socket.try_recv_from(&mut buf) {
            packets.push(Packet::from_bytes(&buf[..n]).unwrap());
        }
        packets
    }

    fn get_bytes() -> Vec<u8> {
        Packet::get(15, &hash()).to_bytes().to_vec()
    }

    /// Engine downloading `hash()` with addr(2) then addr(3) as candidates,
    /// GET already sent to addr(2) at `now`
    fn downloader(net: &SimNetwork, config: EngineConfig, now: Instant) -> Engine<SimSocket> {
        let mut engine = Engine::new(config, net.endpoint(addr(1)), peers(), ChunkStore::new());
        engine
            .begin_download(vec![hash()], PathBuf::from("unused.chunks"), now)
            .unwrap();
        let ihave = Packet::ihave(15, &hash()).to_bytes();
        engine.handle_datagram(addr(2), &ihave, now).unwrap();
        engine.handle_datagram(addr(3), &ihave, now).unwrap();
        engine.tick(now);
        assert!(engine.receive_session(&addr(2)).is_some());
        engine
    }

    fn data_bytes(seq: u32, payload: Bytes) -> Vec<u8> {
        Packet::data(15, seq, payload).to_bytes().to_vec()
    }

    #[test]
    fn test_foreign_datagram_ignored() {
        let net = SimNetwork::new();
        let mut engine = uploader(&net, 1);

        engine
            .handle_datagram(addr(2), b"definitely not swarm", Instant::now())
            .unwrap();

        assert_eq!(engine.counters().packets_invalid, 1);
        assert_eq!(engine.send_session_count(), 0);
    }

    #[test]
    fn test_whohas_answered_only_for_held_chunks() {
        let net = SimNetwork::new();
        let peer = net.endpoint(addr(2));
        let mut engine = uploader(&net, 1);
        let now = Instant::now();

        let whohas = Packet::whohas(15, &hash()).to_bytes();
        engine.handle_datagram(addr(2), &whohas, now).unwrap();
        let other = Packet::whohas(15, &ChunkHash::new("ffff").unwrap()).to_bytes();
        engine.handle_datagram(addr(2), &other, now).unwrap();

        let replies = drain(&peer);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].packet_type(), PacketType::IHave);
        assert_eq!(replies[0].chunk_hash().unwrap(), hash());
    }

    #[test]
    fn test_admission_control() {
        let net = SimNetwork::new();
        let second = net.endpoint(addr(2));
        let third = net.endpoint(addr(3));
        let mut engine = uploader(&net, 1);
        let now = Instant::now();

        engine.handle_datagram(addr(2), &get_bytes(), now).unwrap();
        assert_eq!(engine.send_session_count(), 1);
        let first_reply = drain(&second);
        assert_eq!(first_reply[0].packet_type(), PacketType::Data);
        assert_eq!(first_reply[0].header.seq, 1);

        engine.handle_datagram(addr(3), &get_bytes(), now).unwrap();
        assert_eq!(engine.send_session_count(), 1);
        let denied = drain(&third);
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].packet_type(), PacketType::Denied);
        assert_eq!(engine.counters().denied_sent, 1);
    }

    #[test]
    fn test_get_for_missing_chunk_denied() {
        let net = SimNetwork::new();
        let peer = net.endpoint(addr(2));
        let mut engine = uploader(&net, 4);

        let get = Packet::get(15, &ChunkHash::new("ffff").unwrap()).to_bytes();
        engine.handle_datagram(addr(2), &get, Instant::now()).unwrap();

        assert_eq!(engine.send_session_count(), 0);
        assert_eq!(drain(&peer)[0].packet_type(), PacketType::Denied);
    }

    #[test]
    fn test_ihave_to_get_samples_rtt() {
        let net = SimNetwork::new();
        let _peer = net.endpoint(addr(2));
        let mut engine = uploader(&net, 1);
        let t0 = Instant::now();

        let whohas = Packet::whohas(15, &hash()).to_bytes();
        engine.handle_datagram(addr(2), &whohas, t0).unwrap();
        engine
            .handle_datagram(addr(2), &get_bytes(), t0 + Duration::from_millis(40))
            .unwrap();

        let estimator = engine.rtt_estimator(&addr(2)).unwrap();
        assert!((estimator.estimated_rtt().as_secs_f64() - 0.040).abs() < 1e-9);
        assert!((engine.timeout_for(&addr(2)).as_secs_f64() - 0.120).abs() < 1e-9);
    }

    #[test]
    fn test_ack_progress_opens_window() {
        let net = SimNetwork::new();
        let peer = net.endpoint(addr(2));
        let mut engine = uploader(&net, 1);
        let t0 = Instant::now();

        engine.handle_datagram(addr(2), &get_bytes(), t0).unwrap();
        drain(&peer);

        let ack = Packet::ack(15, 1, 1).to_bytes();
        engine
            .handle_datagram(addr(2), &ack, t0 + Duration::from_millis(5))
            .unwrap();

        let seqs: Vec<u32> = drain(&peer).iter().map(|p| p.header.seq).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
        assert_eq!(engine.send_session(&addr(2)).unwrap().congestion().cwnd(), 2.0);
    }

    #[test]
    fn test_timeout_retransmission_and_abandon() {
        let net = SimNetwork::new();
        let peer = net.endpoint(addr(2));
        let mut engine = uploader(&net, 1);
        let t0 = Instant::now();

        engine.handle_datagram(addr(2), &get_bytes(), t0).unwrap();
        drain(&peer);

        // No RTT sample: default one second timeout
        for round in 1..=3u64 {
            engine.tick(t0 + Duration::from_millis(1100 * round));
            let resent = drain(&peer);
            assert_eq!(resent.len(), 1);
            assert_eq!(resent[0].header.seq, 1);
        }

        assert_eq!(engine.send_session_count(), 0);
        assert_eq!(engine.counters().uploads_abandoned, 1);
        assert_eq!(engine.counters().retransmissions, 3);
    }

    #[test]
    fn test_stalled_download_reassigned() {
        let net = SimNetwork::new();
        let _first = net.endpoint(addr(2));
        let _second = net.endpoint(addr(3));
        let mut engine = Engine::new(
            EngineConfig::new(1),
            net.endpoint(addr(1)),
            peers(),
            ChunkStore::new(),
        );
        let t0 = Instant::now();

        engine
            .begin_download(vec![hash()], PathBuf::from("unused.chunks"), t0)
            .unwrap();
        let ihave = Packet::ihave(15, &hash()).to_bytes();
        engine.handle_datagram(addr(2), &ihave, t0).unwrap();
        engine.handle_datagram(addr(3), &ihave, t0).unwrap();

        engine.tick(t0);
        assert!(engine.receive_session(&addr(2)).is_some());
        assert!(!engine.download().is_unfetched(&hash()));

        // Fallback threshold is five seconds without any data
        engine.tick(t0 + Duration::from_secs(4));
        assert!(engine.receive_session(&addr(2)).is_some());

        engine.detect_failures(t0 + Duration::from_secs(6));
        assert!(engine.receive_session(&addr(2)).is_none());
        assert!(engine.download().is_unfetched(&hash()));
        assert_eq!(engine.directory().candidates(&hash()), vec![addr(3), addr(2)]);

        engine.tick(t0 + Duration::from_secs(6));
        assert!(engine.receive_session(&addr(3)).is_some());
    }

    #[test]
    fn test_denied_requeues() {
        let net = SimNetwork::new();
        let _first = net.endpoint(addr(2));
        let mut engine = Engine::new(
            EngineConfig::new(1),
            net.endpoint(addr(1)),
            peers(),
            ChunkStore::new(),
        );
        let t0 = Instant::now();

        engine
            .begin_download(vec![hash()], PathBuf::from("unused.chunks"), t0)
            .unwrap();
        engine
            .handle_datagram(addr(2), &Packet::ihave(15, &hash()).to_bytes(), t0)
            .unwrap();
        engine
            .handle_datagram(addr(3), &Packet::ihave(15, &hash()).to_bytes(), t0)
            .unwrap();
        engine.tick(t0);

        engine
            .handle_datagram(addr(2), &Packet::denied(15, &hash()).to_bytes(), t0)
            .unwrap();

        assert!(engine.receive_session(&addr(2)).is_none());
        assert!(engine.download().is_unfetched(&hash()));
        assert_eq!(engine.directory().peek(&hash()), Some(addr(3)));
    }

    #[test]
    fn test_download_of_held_chunk_persists_immediately() {
        let net = SimNetwork::new();
        let mut engine = uploader(&net, 1);
        let output = std::env::temp_dir().join(format!("swarm-held-{}.chunks", std::process::id()));

        engine
            .begin_download(vec![hash()], output.clone(), Instant::now())
            .unwrap();

        let written = ChunkStore::load(&output).unwrap();
        std::fs::remove_file(&output).unwrap();
        assert_eq!(written.get(&hash()), Some(&chunk()));
        assert!(!engine.download().is_downloading());
    }

    #[test]
    fn test_persist_failure_is_fatal() {
        let net = SimNetwork::new();
        let mut engine = uploader(&net, 1);
        let output = PathBuf::from("/nonexistent-dir/for/swarm/out.chunks");

        let err = engine
            .begin_download(vec![hash()], output, Instant::now())
            .unwrap_err();
        assert!(matches!(err, EngineError::Persist { .. }));
    }

    #[test]
    fn test_unknown_command_ignored() {
        let net = SimNetwork::new();
        let mut engine = uploader(&net, 1);

        engine.handle_command("UPLOAD a b", Instant::now()).unwrap();
        engine
            .handle_command("DOWNLOAD /nonexistent/chunkfile out", Instant::now())
            .unwrap();
        assert!(!engine.download().is_downloading());
    }

    #[test]
    fn test_short_chunk_not_served() {
        let net = SimNetwork::new();
        let peer = net.endpoint(addr(2));
        let mut store = ChunkStore::new();
        store.insert(hash(), Bytes::from(vec![7u8; 3000]));
        let mut engine = Engine::new(
            EngineConfig::new(1).with_max_conn(1),
            net.endpoint(addr(1)),
            peers(),
            store,
        );
        let now = Instant::now();

        let whohas = Packet::whohas(15, &hash()).to_bytes();
        engine.handle_datagram(addr(2), &whohas, now).unwrap();
        assert!(drain(&peer).is_empty());
        assert_eq!(engine.pending_ihaves(), 0);

        engine.handle_datagram(addr(2), &get_bytes(), now).unwrap();
        let replies = drain(&peer);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].packet_type(), PacketType::Denied);
        assert_eq!(engine.send_session_count(), 0);
        assert_eq!(engine.counters().denied_sent, 1);
    }

    #[test]
    fn test_refused_unit_not_acked() {
        let net = SimNetwork::new();
        let holder = net.endpoint(addr(2));
        let _other = net.endpoint(addr(3));
        let t0 = Instant::now();
        let mut engine = downloader(&net, EngineConfig::new(1), t0);
        drain(&holder);

        let later = t0 + Duration::from_millis(500);
        let short = data_bytes(1, Bytes::from(vec![0u8; 10]));
        engine.handle_datagram(addr(2), &short, later).unwrap();
        let beyond = data_bytes(600, Bytes::from(vec![0u8; 1024]));
        engine.handle_datagram(addr(2), &beyond, later).unwrap();

        assert!(drain(&holder).is_empty());
        let session = engine.receive_session(&addr(2)).unwrap();
        assert_eq!(session.last_activity(), t0);
        assert_eq!(session.units_received(), 0);
        assert_eq!(engine.counters().bytes_downloaded, 0);
        assert!(engine.rtt_estimator(&addr(2)).is_none());
    }

    #[test]
    fn test_first_data_samples_rtt() {
        let net = SimNetwork::new();
        let holder = net.endpoint(addr(2));
        let _other = net.endpoint(addr(3));
        let t0 = Instant::now();
        let mut engine = downloader(&net, EngineConfig::new(1), t0);
        drain(&holder);

        let data = chunk();
        let first = data_bytes(1, data.slice(0..1024));
        engine
            .handle_datagram(addr(2), &first, t0 + Duration::from_millis(30))
            .unwrap();
        let second = data_bytes(2, data.slice(1024..2048));
        engine
            .handle_datagram(addr(2), &second, t0 + Duration::from_millis(90))
            .unwrap();

        let acks = drain(&holder);
        assert_eq!(acks.len(), 2);
        assert_eq!(acks[1].header.ack, 2);

        // Only the GET to first DATA gap is sampled
        let estimator = engine.rtt_estimator(&addr(2)).unwrap();
        assert_eq!(estimator.sample_count(), 1);
        assert!((estimator.estimated_rtt().as_secs_f64() - 0.030).abs() < 1e-9);
        assert!((engine.stall_threshold(&addr(2)).as_secs_f64() - 0.450).abs() < 1e-9);
    }

    #[test]
    fn test_verification_failure_reassigns() {
        let net = SimNetwork::new();
        let holder = net.endpoint(addr(2));
        let _other = net.endpoint(addr(3));
        let t0 = Instant::now();
        let config = EngineConfig::new(1).with_verify_chunks(true);
        let mut engine = downloader(&net, config, t0);

        // chunk() does not hash to hash()
        let data = chunk();
        for seq in 1..=512u32 {
            let range = unit_range(seq, CHUNK_SIZE).unwrap();
            engine
                .handle_datagram(addr(2), &data_bytes(seq, data.slice(range)), t0)
                .unwrap();
        }
        drain(&holder);

        assert!(engine.receive_session(&addr(2)).is_none());
        assert!(!engine.store().contains(&hash()));
        assert!(engine.download().is_unfetched(&hash()));
        assert_eq!(engine.directory().candidates(&hash()), vec![addr(3), addr(2)]);
        assert_eq!(engine.counters().downloads_reassigned, 1);
        assert_eq!(engine.counters().chunks_received, 0);

        engine.tick(t0);
        assert!(engine.receive_session(&addr(3)).is_some());
    }

    #[test]
    fn test_stall_threshold_follows_fixed_timeout() {
        let net = SimNetwork::new();
        let _holder = net.endpoint(addr(2));
        let _other = net.endpoint(addr(3));
        let t0 = Instant::now();
        let config = EngineConfig::new(1).with_fixed_timeout(Some(Duration::from_millis(200)));
        let mut engine = downloader(&net, config, t0);

        assert_eq!(engine.stall_threshold(&addr(2)), Duration::from_secs(1));

        engine.detect_failures(t0 + Duration::from_millis(900));
        assert!(engine.receive_session(&addr(2)).is_some());

        engine.detect_failures(t0 + Duration::from_millis(1100));
        assert!(engine.receive_session(&addr(2)).is_none());
        assert!(engine.download().is_unfetched(&hash()));
        assert_eq!(engine.counters().downloads_reassigned, 1);
    }

    #[test]
    fn test_stale_ihave_not_sampled() {
        let net = SimNetwork::new();
        let _peer = net.endpoint(addr(2));
        let _third = net.endpoint(addr(3));
        let mut engine = uploader(&net, 2);
        let t0 = Instant::now();

        let whohas = Packet::whohas(15, &hash()).to_bytes();
        engine.handle_datagram(addr(2), &whohas, t0).unwrap();
        engine
            .handle_datagram(addr(2), &get_bytes(), t0 + Duration::from_secs(60))
            .unwrap();

        assert_eq!(engine.send_session_count(), 1);
        assert!(engine.rtt_estimator(&addr(2)).is_none());
        assert_eq!(engine.timeout_for(&addr(2)), DEFAULT_TIMEOUT);

        // Unanswered IHAVEs are forgotten once too old
        let t1 = t0 + Duration::from_secs(60);
        engine.handle_datagram(addr(3), &whohas, t1).unwrap();
        assert_eq!(engine.pending_ihaves(), 1);
        engine.tick(t1 + Duration::from_secs(5));
        assert_eq!(engine.pending_ihaves(), 1);
        engine.tick(t1 + Duration::from_secs(11));
        assert_eq!(engine.pending_ihaves(), 0);
    }
}
