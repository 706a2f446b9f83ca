//! # Protocol Layer
//!
//! Logical chat messages and the routing of messages received from peers.
//!
//! ## Components
//! - **Message**: typed messages, their kinds, and the game board
//! - **Dispatcher**: registration gate and per-kind routing shared by both transports
//!
//! ## Session Flow
//! ```text
//! n (register) -> m t l f o J j P ... -> x (close, answered with X)
//! ```
//! Anything sent before `n` is answered with `E "Register first"`.

pub mod dispatcher;
pub mod message;
