use bytes::BytesMut;
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_MESSAGE_SIZE;
use crate::core::frame;
use crate::error::{ProtocolError, Result};
use crate::protocol::message::Message;
use crate::utils::metrics::global_metrics;

/// Stream-transport codec: one message per frame, no envelope.
///
/// Decoding walks the message schema's length fields to find where the
/// message ends; a partially received message leaves the buffer untouched.
#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    max_message_size: usize,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_SIZE)
    }
}

impl MessageCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        match frame::measure(src, self.max_message_size)? {
            Some(len) => {
                let bytes = src.split_to(len);
                let msg = frame::decode(&bytes)?;
                global_metrics().bytes_read(len as u64);
                Ok(Some(msg))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        self.encode_message(&item, dst)
    }
}

impl Encoder<Arc<Message>> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Arc<Message>, dst: &mut BytesMut) -> Result<()> {
        self.encode_message(item.as_ref(), dst)
    }
}

impl Encoder<&Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> Result<()> {
        self.encode_message(item, dst)
    }
}

impl MessageCodec {
    fn encode_message(&self, item: &Message, dst: &mut BytesMut) -> Result<()> {
        let start = dst.len();
        if let Err(e) = frame::encode_into(item, dst) {
            dst.truncate(start);
            return Err(e);
        }
        let len = dst.len() - start;
        if len > self.max_message_size {
            dst.truncate(start);
            return Err(ProtocolError::OversizedPacket(len));
        }
        global_metrics().bytes_written(len as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_decode_preserves_buffer() {
        let mut codec = MessageCodec::default();
        let mut buf = BytesMut::from(&[b't', 0, 3, b'b', b'o'][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_back_to_back_messages() {
        let mut codec = MessageCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(Message::ListRequest, &mut buf).unwrap();
        codec
            .encode(
                Message::Broadcast {
                    text: "hello".into(),
                },
                &mut buf,
            )
            .unwrap();
        codec.encode(Message::Close, &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::ListRequest));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Message::Broadcast {
                text: "hello".into()
            })
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::Close));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_encode_leaves_buffer_clean() {
        let mut codec = MessageCodec::new(16);
        let mut buf = BytesMut::new();
        let err = codec
            .encode(
                Message::Broadcast {
                    text: "x".repeat(64),
                },
                &mut buf,
            )
            .unwrap_err();
        assert!(matches!(err, ProtocolError::OversizedPacket(_)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unknown_tag_is_an_error() {
        let mut codec = MessageCodec::default();
        let mut buf = BytesMut::from(&b"#"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::UnknownMessageType(b'#'))
        ));
    }
}
