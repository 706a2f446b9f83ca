//! # Frame Codec
//!
//! Deterministic encoding of one [`Message`] to bytes and back.
//!
//! ## Wire Format
//! ```text
//! [Tag(1)] [Field...]
//!
//! Field := Prefixed(w) = [Len(w, BE)] [Len bytes]
//!        | Fixed(n)    = [n bytes]
//! ```
//!
//! | Tag | Fields |
//! |-----|--------|
//! | `n` `J` | short identity |
//! | `j` | short identity, `y`/`n` |
//! | `P` | u32 position |
//! | `m` `E` | long text |
//! | `t` `M` `T` | short identity, long text |
//! | `f` `F` | short identity, long filename, u64-prefixed data |
//! | `o` `O` | short identity, u32-prefixed data |
//! | `L` | short-prefixed list of short identities |
//! | `B` | short-prefixed 9 cells, short identity |
//! | `W` | result code |
//! | `l` `x` `X` | (none) |
//!
//! The last prefixed field of a body-bearing kind is its *body*; everything
//! before it is the *header* the fragmentation layer repeats only once.

use bytes::{BufMut, Bytes, BytesMut};

use crate::core::wire::{self, WireReader, LONG, SHORT};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{Board, GameResult, Message, MessageKind};

/// One field of a message schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Length prefix of the given width, then that many bytes
    Prefixed(usize),
    /// Exactly this many bytes
    Fixed(usize),
}

/// Field layout following the tag byte.
pub fn schema(kind: MessageKind) -> &'static [Field] {
    use Field::*;
    use MessageKind::*;
    match kind {
        Register | GameInvite => &[Prefixed(SHORT)],
        GameResponse => &[Prefixed(SHORT), Fixed(1)],
        Move => &[Fixed(4)],
        Broadcast | Error => &[Prefixed(LONG)],
        Private | BroadcastDeliver | PrivateDeliver => &[Prefixed(SHORT), Prefixed(LONG)],
        File | FileDeliver => &[Prefixed(SHORT), Prefixed(LONG), Prefixed(8)],
        Object | ObjectDeliver => &[Prefixed(SHORT), Prefixed(4)],
        List => &[Prefixed(SHORT)],
        MessageKind::Board => &[Prefixed(SHORT), Prefixed(SHORT)],
        GameOver => &[Fixed(1)],
        ListRequest | Close | CloseAck => &[],
    }
}

fn kind_of(buf: &[u8]) -> Result<MessageKind> {
    let tag = *buf
        .first()
        .ok_or_else(|| ProtocolError::malformed("empty frame"))?;
    MessageKind::from_tag(tag).ok_or(ProtocolError::UnknownMessageType(tag))
}

/// Length of the complete message at the start of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed. Declared lengths above
/// `max_len` are rejected before anything is allocated.
pub fn measure(buf: &[u8], max_len: usize) -> Result<Option<usize>> {
    if buf.is_empty() {
        return Ok(None);
    }
    let kind = kind_of(buf)?;
    let mut pos = 1usize;
    for field in schema(kind) {
        let len = match *field {
            Field::Fixed(n) => n,
            Field::Prefixed(width) => {
                if buf.len() < pos + width {
                    return Ok(None);
                }
                let declared = wire::read_uint(&buf[pos..pos + width]);
                if declared > max_len as u64 {
                    return Err(ProtocolError::OversizedPacket(
                        usize::try_from(declared).unwrap_or(usize::MAX),
                    ));
                }
                pos += width;
                declared as usize
            }
        };
        pos += len;
        if pos > max_len {
            return Err(ProtocolError::OversizedPacket(pos));
        }
        if buf.len() < pos {
            return Ok(None);
        }
    }
    Ok(Some(pos))
}

/// Offset of the body's length prefix within an encoded message (tag included).
///
/// Only body-bearing kinds have a header in this sense.
pub fn header_len(buf: &[u8]) -> Result<usize> {
    let kind = kind_of(buf)?;
    let fields = schema(kind);
    if kind.body_width().is_none() {
        return Err(ProtocolError::malformed(format!("kind {kind} has no body")));
    }
    let mut reader = WireReader::new(&buf[1..]);
    for field in &fields[..fields.len() - 1] {
        match *field {
            Field::Fixed(n) => {
                reader.take(n)?;
            }
            Field::Prefixed(width) => {
                reader.prefixed(width)?;
            }
        }
    }
    Ok(1 + reader.position())
}

/// Encode `msg` into a fresh buffer.
pub fn encode(msg: &Message) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    encode_into(msg, &mut buf)?;
    Ok(buf.freeze())
}

/// Append the encoding of `msg` to `dst`. On error `dst` may hold a partial message.
pub fn encode_into(msg: &Message, dst: &mut BytesMut) -> Result<()> {
    dst.put_u8(msg.kind().tag());
    match msg {
        Message::Register { identity } => wire::put_prefixed(dst, identity.as_bytes(), SHORT)?,
        Message::GameInvite { peer } => wire::put_prefixed(dst, peer.as_bytes(), SHORT)?,
        Message::GameResponse { peer, accept } => {
            wire::put_prefixed(dst, peer.as_bytes(), SHORT)?;
            dst.put_u8(if *accept { b'y' } else { b'n' });
        }
        Message::Move { position } => dst.put_u32(*position),
        Message::Broadcast { text } | Message::Error { text } => {
            wire::put_prefixed(dst, text.as_bytes(), LONG)?
        }
        Message::Private { to: peer, text }
        | Message::BroadcastDeliver { from: peer, text }
        | Message::PrivateDeliver { from: peer, text } => {
            wire::put_prefixed(dst, peer.as_bytes(), SHORT)?;
            wire::put_prefixed(dst, text.as_bytes(), LONG)?;
        }
        Message::File {
            to: peer,
            filename,
            data,
        }
        | Message::FileDeliver {
            from: peer,
            filename,
            data,
        } => {
            wire::put_prefixed(dst, peer.as_bytes(), SHORT)?;
            wire::put_prefixed(dst, filename.as_bytes(), LONG)?;
            wire::put_prefixed(dst, data, 8)?;
        }
        Message::Object { to: peer, data } | Message::ObjectDeliver { from: peer, data } => {
            wire::put_prefixed(dst, peer.as_bytes(), SHORT)?;
            wire::put_prefixed(dst, data, 4)?;
        }
        Message::List { identities } => {
            let mut entries = BytesMut::new();
            for identity in identities {
                wire::put_prefixed(&mut entries, identity.as_bytes(), SHORT)?;
            }
            wire::put_prefixed(dst, &entries, SHORT)?;
        }
        Message::Board { board, turn } => {
            wire::put_prefixed(dst, &board.to_bytes(), SHORT)?;
            wire::put_prefixed(dst, turn.as_bytes(), SHORT)?;
        }
        Message::GameOver(result) => dst.put_u8(result.code()),
        Message::ListRequest | Message::Close | Message::CloseAck => {}
    }
    Ok(())
}

/// Decode a buffer holding exactly one message.
pub fn decode(buf: &[u8]) -> Result<Message> {
    let (msg, used) = decode_prefix(buf)?;
    if used != buf.len() {
        return Err(ProtocolError::malformed(format!(
            "{}: {} extra",
            constants::ERR_TRAILING_BYTES,
            buf.len() - used
        )));
    }
    Ok(msg)
}

/// Decode the message at the start of `buf`, returning it with the bytes consumed.
///
/// Anything after the message (such as datagram padding) is left untouched.
pub fn decode_prefix(buf: &[u8]) -> Result<(Message, usize)> {
    let kind = kind_of(buf)?;
    let mut r = WireReader::new(&buf[1..]);
    let msg = match kind {
        MessageKind::Register => Message::Register {
            identity: r.short_string()?,
        },
        MessageKind::Broadcast => Message::Broadcast {
            text: r.long_string()?,
        },
        MessageKind::Private => Message::Private {
            to: r.short_string()?,
            text: r.long_string()?,
        },
        MessageKind::ListRequest => Message::ListRequest,
        MessageKind::Close => Message::Close,
        MessageKind::File => Message::File {
            to: r.short_string()?,
            filename: r.long_string()?,
            data: r.prefixed_bytes(8)?,
        },
        MessageKind::Object => Message::Object {
            to: r.short_string()?,
            data: r.prefixed_bytes(4)?,
        },
        MessageKind::GameInvite => Message::GameInvite {
            peer: r.short_string()?,
        },
        MessageKind::GameResponse => {
            let peer = r.short_string()?;
            let accept = match r.u8()? {
                b'y' => true,
                b'n' => false,
                other => {
                    return Err(ProtocolError::malformed(format!(
                        "invite response byte {other:#04x}"
                    )))
                }
            };
            Message::GameResponse { peer, accept }
        }
        MessageKind::Move => Message::Move {
            position: r.uint(4)? as u32,
        },
        MessageKind::Error => Message::Error {
            text: r.long_string()?,
        },
        MessageKind::BroadcastDeliver => Message::BroadcastDeliver {
            from: r.short_string()?,
            text: r.long_string()?,
        },
        MessageKind::PrivateDeliver => Message::PrivateDeliver {
            from: r.short_string()?,
            text: r.long_string()?,
        },
        MessageKind::List => {
            let mut entries = WireReader::new(r.prefixed(SHORT)?);
            let mut identities = Vec::new();
            while entries.remaining() > 0 {
                identities.push(entries.short_string()?);
            }
            Message::List { identities }
        }
        MessageKind::CloseAck => Message::CloseAck,
        MessageKind::FileDeliver => Message::FileDeliver {
            from: r.short_string()?,
            filename: r.long_string()?,
            data: r.prefixed_bytes(8)?,
        },
        MessageKind::ObjectDeliver => Message::ObjectDeliver {
            from: r.short_string()?,
            data: r.prefixed_bytes(4)?,
        },
        MessageKind::Board => Message::Board {
            board: Board::from_bytes(r.prefixed(SHORT)?)?,
            turn: r.short_string()?,
        },
        MessageKind::GameOver => Message::GameOver(GameResult::from_code(r.u8()?)?),
    };
    Ok((msg, 1 + r.position()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::Mark;

    #[test]
    fn test_broadcast_deliver_layout() {
        let msg = Message::BroadcastDeliver {
            from: "alice".into(),
            text: "hi".into(),
        };
        let bytes = encode(&msg).unwrap();
        assert_eq!(
            &bytes[..],
            &[b'M', 0, 5, b'a', b'l', b'i', b'c', b'e', 0, 0, 2, b'h', b'i']
        );
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_file_uses_eight_byte_size() {
        let msg = Message::File {
            to: "bob".into(),
            filename: "a.txt".into(),
            data: Bytes::from_static(b"xyz"),
        };
        let bytes = encode(&msg).unwrap();
        // tag + (2+3) + (3+5) + (8+3)
        assert_eq!(bytes.len(), 1 + 5 + 8 + 11);
        assert_eq!(&bytes[14..22], &[0, 0, 0, 0, 0, 0, 0, 3]);
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_list_entries_are_nested_short_fields() {
        let msg = Message::List {
            identities: vec!["al".into(), "b".into()],
        };
        let bytes = encode(&msg).unwrap();
        assert_eq!(&bytes[..], &[b'L', 0, 7, 0, 2, b'a', b'l', 0, 1, b'b']);
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_board_and_move_layout() {
        let mut board = Board::new();
        board.place(4, Mark::A);
        let msg = Message::Board {
            board,
            turn: "bob".into(),
        };
        let bytes = encode(&msg).unwrap();
        assert_eq!(&bytes[..3], &[b'B', 0, 9]);
        assert_eq!(&bytes[3..12], b"    X    ");
        assert_eq!(decode(&bytes).unwrap(), msg);

        let mv = encode(&Message::Move { position: 4 }).unwrap();
        assert_eq!(&mv[..], &[b'P', 0, 0, 0, 4]);
    }

    #[test]
    fn test_game_response_byte() {
        let bytes = encode(&Message::GameResponse {
            peer: "al".into(),
            accept: true,
        })
        .unwrap();
        assert_eq!(&bytes[..], &[b'j', 0, 2, b'a', b'l', b'y']);
        assert!(decode(&[b'j', 0, 2, b'a', b'l', b'?']).is_err());
    }

    #[test]
    fn test_decode_prefix_ignores_padding() {
        let mut bytes = encode(&Message::Register {
            identity: "carol".into(),
        })
        .unwrap()
        .to_vec();
        let len = bytes.len();
        bytes.extend_from_slice(b"#####");
        let (msg, used) = decode_prefix(&bytes).unwrap();
        assert_eq!(used, len);
        assert_eq!(
            msg,
            Message::Register {
                identity: "carol".into()
            }
        );
        assert!(matches!(decode(&bytes), Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_unknown_tag_and_bad_utf8() {
        assert!(matches!(
            decode(&[b'#']),
            Err(ProtocolError::UnknownMessageType(b'#'))
        ));
        assert!(matches!(
            decode(&[b'm', 0, 0, 1, 0xFF]),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_measure_waits_for_complete_message() {
        let bytes = encode(&Message::Private {
            to: "bob".into(),
            text: "hello".into(),
        })
        .unwrap();
        for cut in 0..bytes.len() {
            assert_eq!(measure(&bytes[..cut], 1 << 20).unwrap(), None);
        }
        assert_eq!(measure(&bytes, 1 << 20).unwrap(), Some(bytes.len()));
        assert_eq!(measure(b"l", 16).unwrap(), Some(1));
    }

    #[test]
    fn test_measure_rejects_oversized_declaration() {
        let mut bytes = vec![b'o', 0, 1, b'b'];
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            measure(&bytes, 1024),
            Err(ProtocolError::OversizedPacket(_))
        ));
    }

    #[test]
    fn test_header_len_stops_before_body_prefix() {
        let bytes = encode(&Message::FileDeliver {
            from: "bob".into(),
            filename: "f".into(),
            data: Bytes::from_static(b"data"),
        })
        .unwrap();
        // tag + (2+3) + (3+1)
        assert_eq!(header_len(&bytes).unwrap(), 10);
        assert_eq!(header_len(b"m\x00\x00\x00").unwrap(), 1);
        assert!(header_len(b"l").is_err());
    }
}
