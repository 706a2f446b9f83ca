//! # Transport Layer
//!
//! Network front ends feeding the shared dispatcher.
//!
//! ## Transports
//! - **Stream**: TCP, one task per connection, one message per codec frame
//! - **Datagram**: UDP, one event loop, fixed-size fragmented frames
//!
//! Both honor a [`CancellationToken`](tokio_util::sync::CancellationToken) for shutdown.

pub mod datagram;
pub mod stream;
