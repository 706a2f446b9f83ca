//! UDP front end: a single event loop over one socket.
//!
//! Every datagram is fed through the [`Reassembler`] keyed by source address
//! and completed messages go to the [`Dispatcher`]. One datagram is processed
//! fully before the next receive. Outbound messages are fragmented and sent by
//! a small writer task per peer so a slow send never stalls the loop.
//!
//! A periodic tick expires stale reassemblies and tears down addresses that
//! have been silent longer than the idle timeout.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::{NetworkConfig, TransportConfig};
use crate::core::fragment::{Fragmenter, Reassembler};
use crate::error::Result;
use crate::protocol::dispatcher::{Dispatcher, Disposition, PeerSession};
use crate::protocol::message::Message;
use crate::service::registry::PeerHandle;
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::HOUSEKEEPING_INTERVAL;

/// Largest UDP payload; receive buffers are sized to it
const MAX_DATAGRAM: usize = 65_535;

/// Settings for the datagram loop
#[derive(Debug, Clone)]
pub struct DatagramOptions {
    pub transport: TransportConfig,
    pub backpressure_limit: usize,
    pub idle_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub housekeeping_interval: Duration,
}

impl DatagramOptions {
    pub fn from_config(config: &NetworkConfig) -> Self {
        Self {
            transport: config.transport.clone(),
            backpressure_limit: config.server.backpressure_limit,
            idle_timeout: config.server.idle_timeout,
            shutdown_timeout: config.server.shutdown_timeout,
            housekeeping_interval: HOUSEKEEPING_INTERVAL,
        }
    }
}

impl Default for DatagramOptions {
    fn default() -> Self {
        Self::from_config(&NetworkConfig::default())
    }
}

struct DatagramPeer {
    session: PeerSession,
    last_seen: Instant,
    writer: JoinHandle<()>,
}

/// State owned by the event loop
struct DatagramServer {
    socket: Arc<UdpSocket>,
    dispatcher: Arc<Dispatcher>,
    fragmenter: Fragmenter,
    reassembler: Reassembler<SocketAddr>,
    peers: HashMap<SocketAddr, DatagramPeer>,
    /// Writers of torn-down peers still flushing
    retired: Vec<JoinHandle<()>>,
    options: DatagramOptions,
}

/// Run the datagram loop on `socket` until `shutdown` fires.
#[instrument(skip_all, fields(address = ?socket.local_addr().ok()))]
pub async fn serve(
    socket: UdpSocket,
    dispatcher: Arc<Dispatcher>,
    options: DatagramOptions,
    shutdown: CancellationToken,
) -> Result<()> {
    info!(
        budget = options.transport.datagram_budget,
        order = ?options.transport.reassembly_order,
        "Datagram transport listening"
    );
    let mut server = DatagramServer {
        socket: Arc::new(socket),
        dispatcher,
        fragmenter: Fragmenter::from_config(&options.transport),
        reassembler: Reassembler::from_config(&options.transport),
        peers: HashMap::new(),
        retired: Vec::new(),
        options,
    };

    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut tick = tokio::time::interval(server.options.housekeeping_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(peers = server.peers.len(), "Shutting down datagram transport");
                server.shutdown().await;
                return Ok(());
            }

            _ = tick.tick() => server.housekeeping(Instant::now()),

            recv = server.socket.recv_from(&mut buf) => match recv {
                Ok((len, addr)) => server.on_datagram(addr, &buf[..len], Instant::now()),
                // ICMP errors from earlier sends surface here; the socket stays usable
                Err(e) => debug!(error = %e, "Receive failed"),
            }
        }
    }
}

impl DatagramServer {
    fn on_datagram(&mut self, addr: SocketAddr, frame: &[u8], now: Instant) {
        trace!(peer = %addr, bytes = frame.len(), "Datagram received");
        if !self.peers.contains_key(&addr) {
            let peer = self.spawn_peer(addr, now);
            self.peers.insert(addr, peer);
        }

        let outcome = self.reassembler.accept_at(&addr, frame, now);
        let Some(peer) = self.peers.get_mut(&addr) else {
            return;
        };
        peer.last_seen = now;

        let msg = match outcome {
            Ok(Some(msg)) => msg,
            Ok(None) => return,
            Err(e) => {
                global_metrics().protocol_error();
                warn!(peer = %addr, error = %e, "Dropping peer after bad datagram");
                // Best effort; the peer is dropped either way
                let _ = peer.session.handle().send(Arc::new(Message::error(&e)));
                self.teardown(&addr);
                return;
            }
        };

        global_metrics().message_received();
        match self.dispatcher.on_message(&mut peer.session, msg) {
            Ok(Disposition::Continue) => {}
            Ok(Disposition::Close) => self.teardown(&addr),
            Err(e) => {
                warn!(peer = %addr, error = %e, "Session ended with error");
                self.teardown(&addr);
            }
        }
    }

    fn spawn_peer(&self, addr: SocketAddr, now: Instant) -> DatagramPeer {
        let (handle, mut outbound) = PeerHandle::channel(self.options.backpressure_limit);
        let socket = Arc::clone(&self.socket);
        let fragmenter = self.fragmenter;

        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound.recv().await {
                let frames = match fragmenter.fragment(&msg) {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!(peer = %addr, kind = %msg.kind(), error = %e, "Cannot fragment message");
                        continue;
                    }
                };
                for frame in frames {
                    match socket.send_to(&frame, addr).await {
                        Ok(sent) => global_metrics().frame_sent(sent as u64),
                        Err(e) => {
                            global_metrics().connection_error();
                            debug!(peer = %addr, error = %e, "Send failed");
                            break;
                        }
                    }
                }
            }
        });

        debug!(peer = %addr, "New datagram peer");
        DatagramPeer {
            session: PeerSession::new(handle),
            last_seen: now,
            writer,
        }
    }

    /// End the session at `addr`; its writer flushes what is queued and exits.
    fn teardown(&mut self, addr: &SocketAddr) {
        self.reassembler.forget(addr);
        if let Some(mut peer) = self.peers.remove(addr) {
            self.dispatcher.end_session(&mut peer.session);
            debug!(peer = %addr, identity = ?peer.session.identity(), "Datagram peer removed");
            self.retired.push(peer.writer);
        }
    }

    fn housekeeping(&mut self, now: Instant) {
        let expired = self.reassembler.expire(now);
        if expired > 0 {
            debug!(expired, "Expired stale reassemblies");
        }

        let idle = self.options.idle_timeout;
        let silent: Vec<SocketAddr> = self
            .peers
            .iter()
            .filter(|(_, peer)| now.saturating_duration_since(peer.last_seen) >= idle)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in silent {
            info!(peer = %addr, "Idle timeout");
            self.teardown(&addr);
        }

        self.retired.retain(|writer| !writer.is_finished());
    }

    async fn shutdown(&mut self) {
        let addrs: Vec<SocketAddr> = self.peers.keys().copied().collect();
        for addr in addrs {
            self.teardown(&addr);
        }

        let writers = std::mem::take(&mut self.retired);
        let drained = tokio::time::timeout(
            self.options.shutdown_timeout,
            futures::future::join_all(writers),
        )
        .await;
        if drained.is_err() {
            warn!("Shutdown timeout reached while flushing datagram peers");
        }
    }
}
