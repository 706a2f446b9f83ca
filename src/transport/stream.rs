//! TCP front end: one task per connection.
//!
//! Each connection is split into a reader loop, which decodes messages and
//! hands them to the [`Dispatcher`], and a writer task draining the peer's
//! bounded outbound queue through the same [`MessageCodec`]. The writer
//! finishes once every handle to the queue is gone, so anything queued before
//! teardown (such as the `X` acknowledging a close) is still flushed. A
//! message that fails to encode is dropped on its own; only a socket error
//! stops the writer, and that tears the whole session down.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::NetworkConfig;
use crate::core::codec::MessageCodec;
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::{Dispatcher, Disposition, PeerSession};
use crate::protocol::message::Message;
use crate::service::registry::PeerHandle;
use crate::utils::metrics::global_metrics;

/// Limits applied by the stream server
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub backpressure_limit: usize,
    pub max_connections: usize,
    pub max_message_size: usize,
    pub shutdown_timeout: Duration,
}

impl StreamOptions {
    pub fn from_config(config: &NetworkConfig) -> Self {
        Self {
            backpressure_limit: config.server.backpressure_limit,
            max_connections: config.server.max_connections,
            max_message_size: config.transport.max_message_size,
            shutdown_timeout: config.server.shutdown_timeout,
        }
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self::from_config(&NetworkConfig::default())
    }
}

/// Accept connections on `listener` until `shutdown` fires, then give open
/// connections up to the shutdown timeout to finish.
#[instrument(skip_all, fields(address = ?listener.local_addr().ok()))]
pub async fn serve(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    options: StreamOptions,
    shutdown: CancellationToken,
) -> Result<()> {
    info!("Stream transport listening");
    let active = Arc::new(AtomicUsize::new(0));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutting down stream transport. Waiting for connections to close...");
                wait_for_drain(&active, options.shutdown_timeout).await;
                return Ok(());
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, addr)) => {
                        if active.load(Ordering::SeqCst) >= options.max_connections {
                            warn!(peer = %addr, limit = options.max_connections, "Connection limit reached, refusing");
                            global_metrics().connection_rejected();
                            drop(stream);
                            continue;
                        }

                        active.fetch_add(1, Ordering::SeqCst);
                        global_metrics().connection_established();
                        let active = Arc::clone(&active);
                        let dispatcher = Arc::clone(&dispatcher);
                        let shutdown = shutdown.child_token();

                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, dispatcher, options, shutdown).await {
                                global_metrics().connection_error();
                                warn!(peer = %addr, error = %e, "Connection ended with error");
                            }
                            active.fetch_sub(1, Ordering::SeqCst);
                            global_metrics().connection_closed();
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                    }
                }
            }
        }
    }
}

async fn wait_for_drain(active: &AtomicUsize, limit: Duration) {
    let timeout = tokio::time::sleep(limit);
    tokio::pin!(timeout);

    loop {
        let connections = active.load(Ordering::SeqCst);
        if connections == 0 {
            info!("All connections closed");
            return;
        }
        tokio::select! {
            _ = &mut timeout => {
                warn!(connections, "Shutdown timeout reached, forcing exit");
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                debug!(connections, "Waiting for connections to close");
            }
        }
    }
}

#[instrument(skip(stream, dispatcher, options, shutdown), fields(peer = %addr))]
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    options: StreamOptions,
    shutdown: CancellationToken,
) -> Result<()> {
    debug!("Connection established");
    let framed = Framed::new(stream, MessageCodec::new(options.max_message_size));
    let (mut sink, mut incoming) = framed.split();

    let (handle, mut outbound) = PeerHandle::channel(options.backpressure_limit);
    let mut writer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            match sink.send(msg).await {
                Ok(()) => {}
                Err(ProtocolError::Io(e)) => return Err(ProtocolError::Io(e)),
                // Encoding failed before anything hit the socket
                Err(e) => {
                    global_metrics().delivery_dropped();
                    warn!(error = %e, "Dropping undeliverable message");
                }
            }
        }
        sink.close().await
    });
    let mut writer_joined = false;

    let mut session = PeerSession::new(handle);
    let result = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),

            // The session holds a queue handle, so the writer only ends early on failure
            joined = &mut writer => {
                writer_joined = true;
                break match joined {
                    Ok(Err(e)) => Err(e),
                    Ok(Ok(())) => Err(ProtocolError::ConnectionClosed),
                    Err(e) => {
                        warn!(error = %e, "Writer task failed");
                        Err(ProtocolError::ConnectionClosed)
                    }
                };
            }

            next = incoming.next() => match next {
                None => break Ok(()),
                Some(Err(e)) => {
                    if matches!(e, ProtocolError::MalformedFrame(_) | ProtocolError::UnknownMessageType(_) | ProtocolError::OversizedPacket(_)) {
                        global_metrics().protocol_error();
                        // Best effort; the session ends either way
                        let _ = session.handle().send(Arc::new(Message::error(&e)));
                    }
                    break Err(e);
                }
                Some(Ok(msg)) => {
                    global_metrics().message_received();
                    match dispatcher.on_message(&mut session, msg) {
                        Ok(Disposition::Continue) => {}
                        Ok(Disposition::Close) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
            }
        }
    };

    let identity = session.identity().map(str::to_owned);
    dispatcher.end_session(&mut session);
    drop(session);

    if !writer_joined {
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Writer stopped early"),
            Err(e) => warn!(error = %e, "Writer task failed"),
        }
    }
    info!(identity = ?identity, "Connection closed");
    result
}
