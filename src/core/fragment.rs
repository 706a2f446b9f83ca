//! # Fragmentation Engine
//!
//! Carries encoded messages across a transport whose units have a fixed
//! maximum size (the datagram *budget*).
//!
//! ## Frame Layout
//! ```text
//! leading:      [Marker(1)] [Tag(1)] [Header...] [ChunkLen(w)] [Chunk] [Pad...]
//! continuation: [Marker(1)] [ChunkLen(w)] [Chunk] [Pad...]
//! ```
//! Markers count `1, 2, ...` for non-terminal frames; the last frame carries `0`.
//! A message that fits one frame is therefore `[0]` followed by its ordinary
//! stream encoding. `w` is the width of the message kind's body length field.
//! Every frame is padded to exactly the budget.
//!
//! ## Reassembly
//! Fragments are accumulated per (peer, kind). Continuations carry no tag, so
//! they are attributed to the peer's open entry. With [`ReassemblyOrder::Arrival`]
//! chunks are concatenated as received; [`ReassemblyOrder::Sequence`] sorts them
//! by marker and rejects gaps or duplicates. The terminal fragment must arrive
//! last in both modes. Entries idle longer than the TTL are dropped by
//! [`Reassembler::expire`].

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::config::TransportConfig;
use crate::core::frame;
use crate::core::wire::{self, WireReader};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{Message, MessageKind};
use crate::utils::metrics::global_metrics;

/// Marker of the terminal (or only) frame
pub const TERMINAL_MARKER: u8 = 0;

/// Markers are one byte: 255 non-terminal frames plus the terminal one
pub const MAX_FRAGMENTS: usize = 256;

/// How a completed entry's chunks are ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReassemblyOrder {
    /// Concatenate in arrival order
    #[default]
    Arrival,
    /// Sort by marker, reject gaps and duplicates
    Sequence,
}

/// Splits encoded messages into padded frames of a fixed size.
#[derive(Debug, Clone, Copy)]
pub struct Fragmenter {
    budget: usize,
    pad: u8,
}

impl Fragmenter {
    pub fn new(budget: usize, pad: u8) -> Self {
        Self { budget, pad }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.datagram_budget, config.pad_byte)
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Body bytes carried per frame for a header of `header_len` bytes (tag
    /// included) and a body length field of `width` bytes.
    pub fn capacity(&self, header_len: usize, width: usize) -> Result<usize> {
        let overhead = 1 + header_len + width;
        if overhead >= self.budget {
            return Err(ProtocolError::OversizedPacket(overhead));
        }
        Ok(self.budget - overhead)
    }

    pub fn fragment(&self, msg: &Message) -> Result<Vec<Bytes>> {
        let encoded = frame::encode(msg)?;
        self.fragment_encoded(&encoded)
    }

    /// Split one encoded message into frames, in transmission order.
    pub fn fragment_encoded(&self, encoded: &[u8]) -> Result<Vec<Bytes>> {
        let tag = *encoded
            .first()
            .ok_or_else(|| ProtocolError::malformed("empty message"))?;
        let kind = MessageKind::from_tag(tag).ok_or(ProtocolError::UnknownMessageType(tag))?;

        let Some(width) = kind.body_width() else {
            if 1 + encoded.len() > self.budget {
                return Err(ProtocolError::OversizedPacket(encoded.len()));
            }
            let mut frame = BytesMut::with_capacity(self.budget);
            frame.put_u8(TERMINAL_MARKER);
            frame.put_slice(encoded);
            self.pad_out(&mut frame);
            return Ok(vec![frame.freeze()]);
        };

        let header_len = frame::header_len(encoded)?;
        let body = encoded
            .get(header_len + width..)
            .ok_or_else(|| ProtocolError::malformed("message shorter than its header"))?;
        let capacity = self.capacity(header_len, width)?;
        let count = body.len().div_ceil(capacity).max(1);
        if count > MAX_FRAGMENTS {
            return Err(ProtocolError::OversizedPacket(encoded.len()));
        }

        let mut frames = Vec::with_capacity(count);
        for index in 0..count {
            let start = index * capacity;
            let end = (start + capacity).min(body.len());
            let chunk = &body[start..end];

            let mut frame = BytesMut::with_capacity(self.budget);
            let marker = if index + 1 == count {
                TERMINAL_MARKER
            } else {
                (index + 1) as u8
            };
            frame.put_u8(marker);
            if index == 0 {
                frame.put_slice(&encoded[..header_len]);
            }
            wire::put_uint(&mut frame, chunk.len() as u64, width);
            frame.put_slice(chunk);
            self.pad_out(&mut frame);
            frames.push(frame.freeze());
        }

        trace!(kind = %kind, frames = count, body = body.len(), "Fragmented message");
        Ok(frames)
    }

    fn pad_out(&self, frame: &mut BytesMut) {
        let missing = self.budget.saturating_sub(frame.len());
        frame.put_bytes(self.pad, missing);
    }
}

/// Identifies one in-flight reassembly
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReassemblyKey<P> {
    pub peer: P,
    pub kind: MessageKind,
}

#[derive(Debug)]
struct ReassemblyEntry {
    /// Tag and header fields from the leading fragment
    header: Bytes,
    width: usize,
    fragments: Vec<(u8, Bytes)>,
    body_len: usize,
    last_update: Instant,
}

/// Receiving side of the fragmentation engine, one per datagram endpoint.
///
/// Owned by a single event loop; it holds no lock of its own.
#[derive(Debug)]
pub struct Reassembler<P> {
    entries: HashMap<ReassemblyKey<P>, ReassemblyEntry>,
    /// Kind of each peer's open entry, used to attribute continuations
    open: HashMap<P, MessageKind>,
    order: ReassemblyOrder,
    ttl: Duration,
    max_message_size: usize,
}

impl<P> Reassembler<P>
where
    P: Eq + Hash + Clone + fmt::Debug,
{
    pub fn new(order: ReassemblyOrder, ttl: Duration, max_message_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            open: HashMap::new(),
            order,
            ttl,
            max_message_size,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(
            config.reassembly_order,
            config.reassembly_ttl,
            config.max_message_size,
        )
    }

    /// Number of reassemblies waiting for more fragments
    pub fn in_flight(&self) -> usize {
        self.entries.len()
    }

    pub fn accept(&mut self, peer: &P, frame: &[u8]) -> Result<Option<Message>> {
        self.accept_at(peer, frame, Instant::now())
    }

    /// Feed one received frame. Returns the message once it is complete.
    ///
    /// An error discards whatever the peer had in flight.
    pub fn accept_at(&mut self, peer: &P, frame: &[u8], now: Instant) -> Result<Option<Message>> {
        let (&marker, rest) = frame
            .split_first()
            .ok_or_else(|| ProtocolError::malformed("empty datagram"))?;
        global_metrics().frame_received(frame.len() as u64);

        let open = self.open.get(peer).map(|kind| ReassemblyKey {
            peer: peer.clone(),
            kind: *kind,
        });

        let result = match (marker, open) {
            (TERMINAL_MARKER, None) => frame::decode_prefix(rest).map(|(msg, _)| Some(msg)),
            (1, prior) => {
                if let Some(key) = prior {
                    warn!(peer = ?peer, kind = %key.kind, "Discarding unfinished reassembly");
                    self.remove(&key);
                    global_metrics().reassembly_rejected();
                }
                self.open_entry(peer, rest, now).map(|_| None)
            }
            (seq, Some(key)) => self.append(&key, seq, rest, now).and_then(|_| {
                if seq == TERMINAL_MARKER {
                    self.complete(&key).map(Some)
                } else {
                    Ok(None)
                }
            }),
            (_, None) => Err(ProtocolError::malformed(constants::ERR_ORPHAN_FRAGMENT)),
        };

        if result.is_err() {
            if let Some(kind) = self.open.get(peer).copied() {
                self.remove(&ReassemblyKey {
                    peer: peer.clone(),
                    kind,
                });
            }
            global_metrics().reassembly_rejected();
        }
        result
    }

    /// Drop entries idle for at least the TTL. Returns how many were dropped.
    pub fn expire(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let stale: Vec<ReassemblyKey<P>> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_update) >= ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            debug!(peer = ?key.peer, kind = %key.kind, "Expiring stale reassembly");
            self.remove(key);
            global_metrics().reassembly_expired();
        }
        stale.len()
    }

    /// Forget anything in flight from `peer`.
    pub fn forget(&mut self, peer: &P) {
        if let Some(kind) = self.open.remove(peer) {
            self.entries.remove(&ReassemblyKey {
                peer: peer.clone(),
                kind,
            });
        }
    }

    fn remove(&mut self, key: &ReassemblyKey<P>) -> Option<ReassemblyEntry> {
        self.open.remove(&key.peer);
        self.entries.remove(key)
    }

    fn open_entry(&mut self, peer: &P, rest: &[u8], now: Instant) -> Result<()> {
        let tag = *rest
            .first()
            .ok_or_else(|| ProtocolError::malformed("leading fragment without a tag"))?;
        let kind = MessageKind::from_tag(tag).ok_or(ProtocolError::UnknownMessageType(tag))?;
        let width = kind.body_width().ok_or_else(|| {
            ProtocolError::malformed(format!("kind {kind} cannot be fragmented"))
        })?;
        let header_len = frame::header_len(rest)?;
        let chunk = WireReader::new(&rest[header_len..]).prefixed(width)?;
        if chunk.len() > self.max_message_size {
            return Err(ProtocolError::OversizedPacket(chunk.len()));
        }

        let key = ReassemblyKey {
            peer: peer.clone(),
            kind,
        };
        self.entries.insert(
            key,
            ReassemblyEntry {
                header: Bytes::copy_from_slice(&rest[..header_len]),
                width,
                fragments: vec![(1, Bytes::copy_from_slice(chunk))],
                body_len: chunk.len(),
                last_update: now,
            },
        );
        self.open.insert(peer.clone(), kind);
        trace!(peer = ?peer, kind = %kind, "Opened reassembly");
        Ok(())
    }

    fn append(&mut self, key: &ReassemblyKey<P>, seq: u8, rest: &[u8], now: Instant) -> Result<()> {
        let max = self.max_message_size;
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| ProtocolError::malformed(constants::ERR_ORPHAN_FRAGMENT))?;
        let chunk = WireReader::new(rest).prefixed(entry.width)?;
        entry.body_len += chunk.len();
        if entry.body_len > max {
            return Err(ProtocolError::OversizedPacket(entry.body_len));
        }
        entry.fragments.push((seq, Bytes::copy_from_slice(chunk)));
        entry.last_update = now;
        Ok(())
    }

    fn complete(&mut self, key: &ReassemblyKey<P>) -> Result<Message> {
        let mut entry = self
            .remove(key)
            .ok_or_else(|| ProtocolError::malformed(constants::ERR_ORPHAN_FRAGMENT))?;

        if self.order == ReassemblyOrder::Sequence {
            // Terminal sorts after every numbered fragment
            entry
                .fragments
                .sort_by_key(|(seq, _)| if *seq == TERMINAL_MARKER { 256 } else { u16::from(*seq) });
            let numbered = entry.fragments.len() - 1;
            let contiguous = entry.fragments[..numbered]
                .iter()
                .enumerate()
                .all(|(i, (seq, _))| usize::from(*seq) == i + 1);
            if !contiguous {
                return Err(ProtocolError::malformed(constants::ERR_FRAGMENT_SEQUENCE));
            }
        }

        if entry.body_len as u64 > wire::max_for_width(entry.width) {
            return Err(ProtocolError::OversizedPacket(entry.body_len));
        }
        let mut message =
            BytesMut::with_capacity(entry.header.len() + entry.width + entry.body_len);
        message.put_slice(&entry.header);
        wire::put_uint(&mut message, entry.body_len as u64, entry.width);
        for (_, chunk) in &entry.fragments {
            message.put_slice(chunk);
        }

        let msg = frame::decode(&message)?;
        debug!(
            peer = ?key.peer,
            kind = %key.kind,
            fragments = entry.fragments.len(),
            bytes = entry.body_len,
            "Reassembled message"
        );
        global_metrics().reassembly_completed();
        Ok(msg)
    }
}
