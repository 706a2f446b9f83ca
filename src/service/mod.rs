//! # Services
//!
//! Shared server state and the high-level server and client entry points.
//!
//! ## Components
//! - **Registry**: identity to outbound queue mapping, unicast and broadcast
//! - **Game**: two-player game coordinator layered on the registry
//! - **Server**: binds the stream and datagram transports over one dispatcher
//! - **Client**: stream and datagram clients with timeouts

pub mod client;
pub mod game;
pub mod registry;
pub mod server;
