//! Chat server binding both transports over one shared dispatcher.
//!
//! ```no_run
//! use chat_protocol::config::NetworkConfig;
//! use chat_protocol::service::server::ChatServer;
//!
//! # async fn run() -> chat_protocol::error::Result<()> {
//! let server = ChatServer::bind(NetworkConfig::default()).await?;
//! server.run_until_ctrl_c().await
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::NetworkConfig;
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::transport::datagram::{self, DatagramOptions};
use crate::transport::stream::{self, StreamOptions};
use crate::utils::metrics::global_metrics;

/// Bound but not yet running server.
pub struct ChatServer {
    config: NetworkConfig,
    dispatcher: Arc<Dispatcher>,
    listener: TcpListener,
    socket: UdpSocket,
}

impl ChatServer {
    /// Validate `config` and bind both transports.
    #[instrument(skip_all, fields(stream = %config.server.stream_address, datagram = %config.server.datagram_address))]
    pub async fn bind(config: NetworkConfig) -> Result<Self> {
        config.validate_strict()?;
        let listener = TcpListener::bind(&config.server.stream_address).await?;
        let socket = UdpSocket::bind(&config.server.datagram_address).await?;
        info!(
            stream = ?listener.local_addr().ok(),
            datagram = ?socket.local_addr().ok(),
            "Chat server bound"
        );
        Ok(Self {
            config,
            dispatcher: Arc::new(Dispatcher::new()),
            listener,
            socket,
        })
    }

    pub fn stream_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn datagram_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Shared dispatcher, for inspecting the registry and games
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Serve both transports until `shutdown` is cancelled.
    pub async fn run_until(self, shutdown: CancellationToken) -> Result<()> {
        let ChatServer {
            config,
            dispatcher,
            listener,
            socket,
        } = self;

        let stream_task = tokio::spawn(stream::serve(
            listener,
            Arc::clone(&dispatcher),
            StreamOptions::from_config(&config),
            shutdown.child_token(),
        ));
        let datagram_task = tokio::spawn(datagram::serve(
            socket,
            Arc::clone(&dispatcher),
            DatagramOptions::from_config(&config),
            shutdown.child_token(),
        ));

        let (stream_result, datagram_result) = tokio::join!(stream_task, datagram_task);
        global_metrics().log_metrics();
        info!("Chat server stopped");

        flatten(stream_result)?;
        flatten(datagram_result)
    }

    /// Serve until Ctrl+C.
    pub async fn run_until_ctrl_c(self) -> Result<()> {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received CTRL+C signal, shutting down");
                    trigger.cancel();
                }
                Err(e) => warn!(error = %e, "Failed to listen for CTRL+C"),
            }
        });
        self.run_until(shutdown).await
    }
}

fn flatten(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.map_err(|e| ProtocolError::Custom(format!("Transport task failed: {e}")))?
}
