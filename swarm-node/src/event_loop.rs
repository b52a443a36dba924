//! Single-threaded node driver
//!
//! All engine state lives on the thread that calls [`run`]. A receive pump
//! thread blocks on the transport and forwards datagrams over a channel, and
//! command lines arrive over a second channel. The loop wakes on either, or
//! after one tick interval with nothing to do, and then runs the engine's
//! periodic maintenance.

use crate::engine::{Engine, EngineError};
use bytes::Bytes;
use crossbeam::channel::{self, select, Receiver};
use std::io::BufRead;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use swarm_io::{DatagramTransport, SocketError};
use swarm_protocol::MAX_DATAGRAM_SIZE;

/// Scheduler cadence
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// One datagram handed from the receive pump to the loop
#[derive(Debug, Clone)]
pub struct Datagram {
    pub from: SocketAddr,
    pub payload: Bytes,
}

/// Cooperative stop signal shared between the loop and its helper threads
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder to stop
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Loop timing
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum wait between maintenance passes
    pub tick: Duration,
    /// Interval between stats log lines; `None` disables them
    pub stats_interval: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            tick: DEFAULT_TICK,
            stats_interval: None,
        }
    }
}

/// Spawn the receive pump for `transport`
///
/// The transport must report [`SocketError::TimedOut`] periodically so the
/// pump can notice `shutdown`. The pump exits when the transport closes or
/// the loop drops its receiver.
pub fn spawn_receiver<R>(transport: R, shutdown: Shutdown) -> (Receiver<Datagram>, JoinHandle<()>)
where
    R: DatagramTransport + Send + 'static,
{
    let (tx, rx) = channel::unbounded();

    let handle = thread::spawn(move || {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        while !shutdown.is_triggered() {
            match transport.recv_from(&mut buf) {
                Ok((n, from)) => {
                    let datagram = Datagram {
                        from,
                        payload: Bytes::copy_from_slice(&buf[..n]),
                    };
                    if tx.send(datagram).is_err() {
                        break;
                    }
                }
                Err(SocketError::TimedOut) => continue,
                Err(SocketError::Closed) => break,
                Err(e) => tracing::warn!("Receive error: {}", e),
            }
        }

        tracing::debug!("receive pump stopped");
    });

    (rx, handle)
}

/// Spawn a thread forwarding each line of `reader` as a command
///
/// The channel disconnects at end of input.
pub fn spawn_command_reader<B>(reader: B) -> (Receiver<String>, JoinHandle<()>)
where
    B: BufRead + Send + 'static,
{
    let (tx, rx) = channel::unbounded();

    let handle = thread::spawn(move || {
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Command input error: {}", e);
                    break;
                }
            }
        }
    });

    (rx, handle)
}

/// Drive `engine` until `shutdown` fires or the receive pump stops
///
/// Closing the command channel does not stop the node; it keeps serving
/// uploads until shut down.
pub fn run<T: DatagramTransport>(
    engine: &mut Engine<T>,
    inbound: Receiver<Datagram>,
    commands: Receiver<String>,
    shutdown: &Shutdown,
    options: &RunOptions,
) -> Result<(), EngineError> {
    let mut commands = commands;
    let mut last_stats = Instant::now();

    tracing::info!("Node running, tick {:?}", options.tick);

    while !shutdown.is_triggered() {
        let mut commands_closed = false;
        let mut inbound_closed = false;

        select! {
            recv(inbound) -> msg => match msg {
                Ok(datagram) => {
                    engine.handle_datagram(datagram.from, &datagram.payload, Instant::now())?;
                    for datagram in inbound.try_iter() {
                        engine.handle_datagram(datagram.from, &datagram.payload, Instant::now())?;
                    }
                }
                Err(_) => inbound_closed = true,
            },
            recv(commands) -> msg => match msg {
                Ok(line) => engine.handle_command(&line, Instant::now())?,
                Err(_) => commands_closed = true,
            },
            default(options.tick) => {}
        }

        if inbound_closed {
            tracing::info!("Receive pump stopped, shutting down");
            break;
        }
        if commands_closed {
            tracing::debug!("Command input closed, serving only");
            commands = channel::never();
        }

        let now = Instant::now();
        engine.tick(now);

        if let Some(interval) = options.stats_interval {
            if now.duration_since(last_stats) >= interval {
                tracing::info!("{}", engine.stats());
                last_stats = now;
            }
        }
    }

    Ok(())
}
