//! # Core Protocol Components
//!
//! Byte-level handling of chat messages: field primitives, the per-kind frame
//! codec, the stream codec, and datagram fragmentation.
//!
//! ## Components
//! - **Wire**: short/long length-prefixed fields and a bounded reader
//! - **Frame**: deterministic encode/decode of one message
//! - **Codec**: Tokio codec for framing messages over byte streams
//! - **Fragment**: fixed-size datagram frames and their reassembly
//!
//! ## Wire Format
//! ```text
//! stream:   [Tag(1)] [Field...]
//! datagram: [Marker(1)] [Tag(1) Header (first fragment only)] [ChunkLen(w)] [Chunk] [Pad...]
//! ```
//!
//! ## Safety
//! - Declared lengths are checked against the configured maximum before allocation
//! - Decoders stop at declared lengths and never scan for delimiters

pub mod codec;
pub mod fragment;
pub mod frame;
pub mod wire;
