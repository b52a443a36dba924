//! Swarm Peer - chunk swarm node
//!
//! Serves the chunks in its local store to other peers and downloads new ones
//! on `DOWNLOAD <chunkfile> <outputfile>` commands read from stdin.

use anyhow::Context;
use clap::Parser;
use std::io::{self, BufReader};
use swarm_cli::{init_logging, Args, FileConfig, NodeSettings};
use swarm_io::PeerSocket;
use swarm_node::{
    run, spawn_command_reader, spawn_receiver, ChunkStore, Engine, PeerDirectory, Shutdown,
};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let file = match &args.config {
        Some(path) => FileConfig::from_file(path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?,
        None => FileConfig::default(),
    };
    let settings = NodeSettings::resolve(&args, file)?;

    init_logging(settings.verbose);
    tracing::info!("Swarm peer {} starting...", settings.identity);

    let peers = PeerDirectory::load(&settings.peer_file).with_context(|| {
        format!("Failed to load peer file '{}'", settings.peer_file.display())
    })?;
    let listen_addr = peers.address_of(settings.identity).ok_or_else(|| {
        anyhow::anyhow!(
            "Identity {} is not listed in '{}'",
            settings.identity,
            settings.peer_file.display()
        )
    })?;

    let store = ChunkStore::load(&settings.chunk_file).with_context(|| {
        format!("Failed to load chunk store '{}'", settings.chunk_file.display())
    })?;
    tracing::info!("Serving {} chunks", store.len());

    let socket = PeerSocket::bind(listen_addr)?;
    tracing::info!("Listening on: {}", listen_addr);

    let shutdown = Shutdown::new();
    let interrupt = shutdown.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Interrupted, shutting down");
        interrupt.trigger();
    })
    .context("Failed to install interrupt handler")?;

    let (inbound, pump) = spawn_receiver(socket.try_clone()?, shutdown.clone());
    let (commands, _reader) = spawn_command_reader(BufReader::new(io::stdin()));

    let mut engine = Engine::new(settings.engine_config(), socket, peers, store);
    run(
        &mut engine,
        inbound,
        commands,
        &shutdown,
        &settings.run_options(),
    )?;

    // Stdin may still be blocked in a read; only the pump is joined
    shutdown.trigger();
    if pump.join().is_err() {
        tracing::warn!("Receive pump panicked");
    }
    tracing::info!("Swarm peer {} stopped", settings.identity);

    Ok(())
}
