use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::error::{ProtocolError, Result};
use crate::protocol::message::Message;
use crate::service::game::GameCoordinator;
use crate::service::registry::{PeerHandle, Registry};
use crate::utils::metrics::{global_metrics, Timer};

/// What the transport should do with the connection after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    /// The peer asked to leave; flush its queue and tear down
    Close,
}

/// Per-connection state held by a transport.
#[derive(Debug)]
pub struct PeerSession {
    handle: PeerHandle,
    identity: Option<String>,
}

impl PeerSession {
    pub fn new(handle: PeerHandle) -> Self {
        Self {
            handle,
            identity: None,
        }
    }

    /// Registered identity, once the peer has one
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn handle(&self) -> &PeerHandle {
        &self.handle
    }
}

/// Routes decoded messages from peers to the registry and the game coordinator.
///
/// Shared by both transports so a stream peer and a datagram peer see one
/// directory and can chat or play with each other.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    games: GameCoordinator,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_registry(Arc::new(Registry::new()))
    }

    pub fn with_registry(registry: Arc<Registry>) -> Self {
        Self {
            games: GameCoordinator::new(Arc::clone(&registry)),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn games(&self) -> &GameCoordinator {
        &self.games
    }

    /// Handle one message from a transport.
    ///
    /// Refusals a peer can recover from are answered with an `E` message and
    /// the session continues. Any other error is returned and ends the session.
    pub fn on_message(&self, session: &mut PeerSession, msg: Message) -> Result<Disposition> {
        let _timer = Timer::start("dispatch");
        let outcome = match session.identity.as_deref() {
            None => self.register(&msg, &session.handle).map(|identity| {
                session.identity = Some(identity);
                Disposition::Continue
            }),
            Some(identity) => self.dispatch(identity, msg),
        };

        match outcome {
            Err(e) if e.is_recoverable() => {
                global_metrics().protocol_error();
                debug!(identity = ?session.identity, error = %e, "Refused request");
                if let Err(send_err) = session.handle.send(Arc::new(Message::error(&e))) {
                    warn!(error = %send_err, "Could not report error to peer");
                }
                Ok(Disposition::Continue)
            }
            other => other,
        }
    }

    /// Release whatever the session holds. Safe to call more than once.
    pub fn end_session(&self, session: &mut PeerSession) {
        if let Some(identity) = session.identity.take() {
            self.disconnect(&identity);
        }
    }

    /// Registration gate for a peer without an identity.
    fn register(&self, msg: &Message, handle: &PeerHandle) -> Result<String> {
        match msg {
            Message::Register { identity } => {
                self.registry.register(identity, handle.clone())?;
                Ok(identity.clone())
            }
            _ => Err(ProtocolError::NotRegistered),
        }
    }

    /// Route one message from the registered peer `from`.
    #[instrument(skip(self, msg), fields(kind = %msg.kind()), level = "debug")]
    pub fn dispatch(&self, from: &str, msg: Message) -> Result<Disposition> {
        if !msg.kind().is_client_to_server() {
            return Err(ProtocolError::UnexpectedMessage);
        }

        match msg {
            Message::Register { .. } => return Err(ProtocolError::AlreadyRegistered),
            Message::Broadcast { text } => {
                let deliver = Arc::new(Message::BroadcastDeliver {
                    from: from.to_string(),
                    text,
                });
                self.registry.broadcast(deliver, Some(from))?;
            }
            Message::Private { to, text } => self.route(
                &to,
                Message::PrivateDeliver {
                    from: from.to_string(),
                    text,
                },
            )?,
            Message::ListRequest => {
                let identities = self.registry.identities()?;
                self.route(from, Message::List { identities })?;
            }
            Message::Close => {
                self.route(from, Message::CloseAck)?;
                return Ok(Disposition::Close);
            }
            Message::File { to, filename, data } => self.route(
                &to,
                Message::FileDeliver {
                    from: from.to_string(),
                    filename,
                    data,
                },
            )?,
            Message::Object { to, data } => self.route(
                &to,
                Message::ObjectDeliver {
                    from: from.to_string(),
                    data,
                },
            )?,
            Message::GameInvite { peer } => self.games.invite(from, &peer)?,
            Message::GameResponse { peer, accept } => self.games.respond(from, &peer, accept)?,
            Message::Move { position } => self.games.make_move(from, position)?,
            _ => return Err(ProtocolError::UnexpectedMessage),
        }
        Ok(Disposition::Continue)
    }

    /// Unicast where only an unknown destination is the sender's problem.
    fn route(&self, to: &str, msg: Message) -> Result<()> {
        match self.registry.unicast(to, Arc::new(msg)) {
            Err(ProtocolError::Backpressure) | Err(ProtocolError::ConnectionClosed) => Ok(()),
            other => other,
        }
    }

    /// Remove `identity` from the directory and abort its game.
    pub fn disconnect(&self, identity: &str) {
        if let Err(e) = self.registry.unregister(identity) {
            warn!(identity, error = %e, "Failed to unregister");
        }
        if let Err(e) = self.games.on_disconnect(identity) {
            warn!(identity, error = %e, "Failed to release game state");
        }
    }
}
