//! # Chat Protocol
//!
//! A multi-peer chat service over a hand-rolled binary wire protocol, carried
//! over a reliable stream transport (TCP) and a bounded datagram transport (UDP).
//!
//! Peers register a unique identity, exchange broadcast and private text,
//! request the directory listing, transfer opaque files and objects, and play
//! a two-player board game whose state lives on the server.
//!
//! ## Layout
//! - [`core`]: field primitives, frame codec, stream codec, fragmentation
//! - [`protocol`]: message types and the ingress dispatcher
//! - [`service`]: registry, game coordinator, server and clients
//! - [`transport`]: TCP and UDP front ends
//! - [`config`], [`error`], [`utils`]: ambient concerns
//!
//! ```
//! use chat_protocol::core::fragment::{Fragmenter, Reassembler, ReassemblyOrder};
//! use chat_protocol::protocol::message::Message;
//! use std::time::Duration;
//!
//! let msg = Message::BroadcastDeliver { from: "alice".into(), text: "x".repeat(2000) };
//! let frames = Fragmenter::new(777, b'#').fragment(&msg).unwrap();
//! assert_eq!(frames.len(), 3);
//!
//! let mut rx = Reassembler::new(ReassemblyOrder::Sequence, Duration::from_secs(30), 1 << 20);
//! let mut out = None;
//! for frame in &frames {
//!     out = rx.accept(&"server", frame).unwrap();
//! }
//! assert_eq!(out, Some(msg));
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use error::{ProtocolError, Result};
