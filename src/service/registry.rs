//! # Session Registry & Router
//!
//! Single source of truth for which identities are connected and how to reach
//! them. Each registered peer owns a bounded outbound queue drained by its
//! transport's writer; the registry only ever enqueues, so no transport I/O
//! happens while its lock is held.
//!
//! ```
//! use chat_protocol::protocol::message::Message;
//! use chat_protocol::service::registry::{PeerHandle, Registry};
//! use std::sync::Arc;
//!
//! let registry = Registry::new();
//! let (alice, _alice_rx) = PeerHandle::channel(8);
//! let (bob, mut bob_rx) = PeerHandle::channel(8);
//! registry.register("alice", alice).unwrap();
//! registry.register("bob", bob).unwrap();
//!
//! let hi = Arc::new(Message::BroadcastDeliver { from: "alice".into(), text: "hi".into() });
//! assert_eq!(registry.broadcast(hi.clone(), Some("alice")).unwrap(), 1);
//! assert_eq!(bob_rx.try_recv().unwrap(), hi);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::Message;
use crate::utils::metrics::global_metrics;

/// Sending half of a peer's outbound queue.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    tx: mpsc::Sender<Arc<Message>>,
}

impl PeerHandle {
    pub fn new(tx: mpsc::Sender<Arc<Message>>) -> Self {
        Self { tx }
    }

    /// Create a handle together with the queue its writer drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<Message>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Enqueue without waiting.
    pub fn send(&self, msg: Arc<Message>) -> Result<()> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ProtocolError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => ProtocolError::ConnectionClosed,
        })?;
        global_metrics().message_sent();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Whether both handles feed the same queue
    pub fn same_peer(&self, other: &PeerHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Identity to handle mapping behind a single lock.
#[derive(Debug, Default)]
pub struct Registry {
    peers: Mutex<HashMap<String, PeerHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, PeerHandle>>> {
        self.peers
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))
    }

    /// Claim `identity` for `handle`. Fails if the identity is already present.
    pub fn register(&self, identity: &str, handle: PeerHandle) -> Result<()> {
        if identity.is_empty() {
            return Err(ProtocolError::EmptyIdentity);
        }
        let mut peers = self.lock()?;
        if peers.contains_key(identity) {
            global_metrics().name_conflict();
            return Err(ProtocolError::NameConflict(identity.to_string()));
        }
        peers.insert(identity.to_string(), handle);
        let total = peers.len();
        drop(peers);

        global_metrics().session_registered();
        info!(identity, total, "Peer registered");
        Ok(())
    }

    /// Remove `identity`. Returns whether it was present.
    pub fn unregister(&self, identity: &str) -> Result<bool> {
        let removed = self.lock()?.remove(identity).is_some();
        if removed {
            global_metrics().session_closed();
            info!(identity, "Peer unregistered");
        }
        Ok(removed)
    }

    pub fn contains(&self, identity: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(identity))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    /// All registered identities, sorted.
    pub fn identities(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.lock()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Deliver `msg` to one identity.
    ///
    /// Fails with `UserNotFound` if the identity is absent. A full or closed
    /// queue drops the message and is reported as `Backpressure` or
    /// `ConnectionClosed`.
    pub fn unicast(&self, identity: &str, msg: Arc<Message>) -> Result<()> {
        let handle = self
            .lock()?
            .get(identity)
            .cloned()
            .ok_or_else(|| ProtocolError::UserNotFound(identity.to_string()))?;

        handle.send(msg).inspect_err(|e| {
            global_metrics().delivery_dropped();
            warn!(identity, error = %e, "Dropped delivery");
        })
    }

    /// Deliver `msg` to every identity except `excluding`. Returns how many
    /// queues accepted it.
    pub fn broadcast(&self, msg: Arc<Message>, excluding: Option<&str>) -> Result<usize> {
        let targets: Vec<(String, PeerHandle)> = self
            .lock()?
            .iter()
            .filter(|(name, _)| Some(name.as_str()) != excluding)
            .map(|(name, handle)| (name.clone(), handle.clone()))
            .collect();

        let mut delivered = 0;
        for (identity, handle) in targets {
            match handle.send(Arc::clone(&msg)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    global_metrics().delivery_dropped();
                    warn!(identity = %identity, error = %e, "Dropped broadcast delivery");
                }
            }
        }
        debug!(kind = %msg.kind(), delivered, "Broadcast");
        Ok(delivered)
    }
}
