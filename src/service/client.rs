//! Clients for both transports.
//!
//! Each client enforces a send and a receive deadline; a missed deadline is
//! reported as [`ProtocolError::Timeout`]. The user-facing command surface is
//! left to callers, which build [`Message`] values and render what comes back.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::codec::Framed;
use tracing::{debug, instrument, trace};

use crate::config::{ClientConfig, NetworkConfig};
use crate::core::codec::MessageCodec;
use crate::core::fragment::{Fragmenter, Reassembler};
use crate::error::{ProtocolError, Result};
use crate::protocol::message::Message;
use crate::utils::timeout::with_timeout_error;

/// Client over the stream transport.
pub struct StreamClient {
    framed: Framed<TcpStream, MessageCodec>,
    send_timeout: Duration,
    recv_timeout: Duration,
    last_activity: Instant,
}

impl StreamClient {
    /// Connect to `addr` within the configured connection timeout.
    #[instrument(skip(config))]
    pub async fn connect(addr: SocketAddr, config: &ClientConfig) -> Result<Self> {
        let stream = with_timeout_error(
            async { Ok(TcpStream::connect(addr).await?) },
            config.connection_timeout,
        )
        .await?;
        debug!("Stream client connected");
        Ok(Self {
            framed: Framed::new(stream, MessageCodec::default()),
            send_timeout: config.connection_timeout,
            recv_timeout: config.response_timeout,
            last_activity: Instant::now(),
        })
    }

    /// Set custom timeout durations
    pub fn with_timeouts(mut self, send_timeout: Duration, recv_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self.recv_timeout = recv_timeout;
        self
    }

    /// Get the time since the last activity (send or receive)
    pub fn time_since_last_activity(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub async fn send(&mut self, msg: Message) -> Result<()> {
        trace!(kind = %msg.kind(), "Sending");
        with_timeout_error(self.framed.send(msg), self.send_timeout).await?;
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Claim `identity`. The server only answers a refusal.
    pub async fn register(&mut self, identity: &str) -> Result<()> {
        self.send(Message::Register {
            identity: identity.to_string(),
        })
        .await
    }

    /// Next message from the server within the receive timeout.
    pub async fn recv(&mut self) -> Result<Message> {
        let timeout = self.recv_timeout;
        self.recv_within(timeout).await
    }

    pub async fn recv_within(&mut self, timeout: Duration) -> Result<Message> {
        let msg = with_timeout_error(
            async {
                self.framed
                    .next()
                    .await
                    .ok_or(ProtocolError::ConnectionClosed)?
            },
            timeout,
        )
        .await?;
        self.last_activity = Instant::now();
        Ok(msg)
    }
}

/// Client over the datagram transport.
pub struct DatagramClient {
    socket: UdpSocket,
    server: SocketAddr,
    fragmenter: Fragmenter,
    reassembler: Reassembler<SocketAddr>,
    recv_timeout: Duration,
    buf: Vec<u8>,
}

impl DatagramClient {
    /// Bind an ephemeral local port and associate it with `server`.
    #[instrument(skip(config))]
    pub async fn connect(server: SocketAddr, config: &NetworkConfig) -> Result<Self> {
        let local: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;
        debug!(local = ?socket.local_addr().ok(), "Datagram client ready");
        Ok(Self {
            socket,
            server,
            fragmenter: Fragmenter::from_config(&config.transport),
            reassembler: Reassembler::from_config(&config.transport),
            recv_timeout: config.client.response_timeout,
            buf: vec![0u8; config.transport.datagram_budget.max(1)],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn with_recv_timeout(mut self, recv_timeout: Duration) -> Self {
        self.recv_timeout = recv_timeout;
        self
    }

    /// Fragment `msg` and send every frame in order.
    pub async fn send(&mut self, msg: &Message) -> Result<()> {
        let frames = self.fragmenter.fragment(msg)?;
        trace!(kind = %msg.kind(), frames = frames.len(), "Sending");
        self.send_frames(&frames).await
    }

    /// Send pre-built frames as they are, for callers controlling order.
    pub async fn send_frames(&self, frames: &[bytes::Bytes]) -> Result<()> {
        for frame in frames {
            self.socket.send(frame).await?;
        }
        Ok(())
    }

    pub fn fragmenter(&self) -> &Fragmenter {
        &self.fragmenter
    }

    pub async fn register(&mut self, identity: &str) -> Result<()> {
        self.send(&Message::Register {
            identity: identity.to_string(),
        })
        .await
    }

    /// Next complete message from the server within the receive timeout.
    pub async fn recv(&mut self) -> Result<Message> {
        let timeout = self.recv_timeout;
        self.recv_within(timeout).await
    }

    pub async fn recv_within(&mut self, timeout: Duration) -> Result<Message> {
        let Self {
            socket,
            server,
            reassembler,
            buf,
            ..
        } = self;
        with_timeout_error(
            async {
                loop {
                    let len = socket.recv(buf).await?;
                    if let Some(msg) = reassembler.accept(server, &buf[..len])? {
                        return Ok(msg);
                    }
                }
            },
            timeout,
        )
        .await
    }
}
