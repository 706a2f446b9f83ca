//! Logical messages exchanged between peers and the server.
//!
//! Each [`Message`] maps to exactly one ASCII type tag ([`MessageKind`]) and a
//! fixed field schema; the byte layout lives in [`crate::core::frame`].

use bytes::Bytes;
use std::fmt;

use crate::error::{ProtocolError, Result};

/// Number of cells on the game board.
pub const BOARD_CELLS: usize = 9;

/// One-byte type tag identifying a message's schema.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    // Client -> server
    Register = b'n',
    Broadcast = b'm',
    Private = b't',
    ListRequest = b'l',
    Close = b'x',
    File = b'f',
    Object = b'o',
    GameInvite = b'J',
    GameResponse = b'j',
    Move = b'P',

    // Server -> client
    Error = b'E',
    BroadcastDeliver = b'M',
    PrivateDeliver = b'T',
    List = b'L',
    CloseAck = b'X',
    FileDeliver = b'F',
    ObjectDeliver = b'O',
    Board = b'B',
    GameOver = b'W',
}

impl MessageKind {
    /// Convert from the wire tag, returns None for unknown tags
    pub fn from_tag(tag: u8) -> Option<Self> {
        use MessageKind::*;
        let kind = match tag {
            b'n' => Register,
            b'm' => Broadcast,
            b't' => Private,
            b'l' => ListRequest,
            b'x' => Close,
            b'f' => File,
            b'o' => Object,
            b'J' => GameInvite,
            b'j' => GameResponse,
            b'P' => Move,
            b'E' => Error,
            b'M' => BroadcastDeliver,
            b'T' => PrivateDeliver,
            b'L' => List,
            b'X' => CloseAck,
            b'F' => FileDeliver,
            b'O' => ObjectDeliver,
            b'B' => Board,
            b'W' => GameOver,
            _ => return None,
        };
        Some(kind)
    }

    /// The ASCII tag byte
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Whether clients send this kind to the server.
    ///
    /// `J` and `j` travel in both directions.
    pub fn is_client_to_server(self) -> bool {
        use MessageKind::*;
        matches!(
            self,
            Register
                | Broadcast
                | Private
                | ListRequest
                | Close
                | File
                | Object
                | GameInvite
                | GameResponse
                | Move
        )
    }

    /// Width in bytes of the length prefix of this kind's body, if it has one.
    ///
    /// The body is the last length-prefixed field of the schema and is the part
    /// a datagram transport splits across fragments.
    pub fn body_width(self) -> Option<usize> {
        use MessageKind::*;
        match self {
            Broadcast | Private | Error | BroadcastDeliver | PrivateDeliver => Some(3),
            List => Some(2),
            File | FileDeliver => Some(8),
            Object | ObjectDeliver => Some(4),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag() as char)
    }
}

/// Outcome code carried by a `W` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameResult {
    Win,
    Loss,
    Draw,
    OpponentDisconnected,
}

impl GameResult {
    pub fn code(self) -> u8 {
        match self {
            GameResult::Loss => b'0',
            GameResult::Win => b'1',
            GameResult::Draw => b'2',
            GameResult::OpponentDisconnected => b'3',
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            b'0' => Ok(GameResult::Loss),
            b'1' => Ok(GameResult::Win),
            b'2' => Ok(GameResult::Draw),
            b'3' => Ok(GameResult::OpponentDisconnected),
            other => Err(ProtocolError::malformed(format!(
                "unknown game result code {other:#04x}"
            ))),
        }
    }
}

/// Content of one board cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mark {
    #[default]
    Empty,
    /// Played by the inviter
    A,
    /// Played by the invitee
    B,
}

impl Mark {
    pub fn to_byte(self) -> u8 {
        match self {
            Mark::Empty => b' ',
            Mark::A => b'X',
            Mark::B => b'O',
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            b' ' => Ok(Mark::Empty),
            b'X' => Ok(Mark::A),
            b'O' => Ok(Mark::B),
            other => Err(ProtocolError::malformed(format!(
                "invalid board cell {other:#04x}"
            ))),
        }
    }
}

/// 3x3 board, cells indexed row-major 0..=8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Board {
    cells: [Mark; BOARD_CELLS],
}

impl Board {
    /// Rows, columns, then both diagonals.
    pub const LINES: [[usize; 3]; 8] = [
        [0, 1, 2],
        [3, 4, 5],
        [6, 7, 8],
        [0, 3, 6],
        [1, 4, 7],
        [2, 5, 8],
        [0, 4, 8],
        [2, 4, 6],
    ];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cells(cells: [Mark; BOARD_CELLS]) -> Self {
        Self { cells }
    }

    pub fn cells(&self) -> &[Mark; BOARD_CELLS] {
        &self.cells
    }

    pub fn get(&self, position: usize) -> Option<Mark> {
        self.cells.get(position).copied()
    }

    /// Write `mark` into an empty cell. Returns false if the cell is taken or out of range.
    pub fn place(&mut self, position: usize, mark: Mark) -> bool {
        match self.cells.get_mut(position) {
            Some(cell) if *cell == Mark::Empty => {
                *cell = mark;
                true
            }
            _ => false,
        }
    }

    pub fn has_line(&self, mark: Mark) -> bool {
        mark != Mark::Empty
            && Self::LINES
                .iter()
                .any(|line| line.iter().all(|&i| self.cells[i] == mark))
    }

    pub fn is_full(&self) -> bool {
        self.cells.iter().all(|c| *c != Mark::Empty)
    }

    pub fn to_bytes(&self) -> [u8; BOARD_CELLS] {
        self.cells.map(Mark::to_byte)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != BOARD_CELLS {
            return Err(ProtocolError::malformed(format!(
                "board has {} cells, expected {BOARD_CELLS}",
                bytes.len()
            )));
        }
        let mut cells = [Mark::Empty; BOARD_CELLS];
        for (cell, byte) in cells.iter_mut().zip(bytes) {
            *cell = Mark::from_byte(*byte)?;
        }
        Ok(Self { cells })
    }
}

/// A logical protocol message.
///
/// Client-to-server variants carry a destination, server-to-client variants the
/// originating identity. File and object bodies are opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `n`: claim an identity
    Register { identity: String },
    /// `m`: text to everyone else
    Broadcast { text: String },
    /// `t`: text to one peer
    Private { to: String, text: String },
    /// `l`: ask for the directory listing
    ListRequest,
    /// `x`: leave
    Close,
    /// `f`: file transfer to one peer
    File {
        to: String,
        filename: String,
        data: Bytes,
    },
    /// `o`: serialized object to one peer
    Object { to: String, data: Bytes },
    /// `J`: game invite; `peer` is the invitee client-side and the inviter server-side
    GameInvite { peer: String },
    /// `j`: invite response; `peer` is the inviter client-side and the responder server-side
    GameResponse { peer: String, accept: bool },
    /// `P`: place a mark
    Move { position: u32 },

    /// `E`
    Error { text: String },
    /// `M`
    BroadcastDeliver { from: String, text: String },
    /// `T`
    PrivateDeliver { from: String, text: String },
    /// `L`
    List { identities: Vec<String> },
    /// `X`
    CloseAck,
    /// `F`
    FileDeliver {
        from: String,
        filename: String,
        data: Bytes,
    },
    /// `O`
    ObjectDeliver { from: String, data: Bytes },
    /// `B`: board plus the identity whose turn it is
    Board { board: Board, turn: String },
    /// `W`
    GameOver(GameResult),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Register { .. } => MessageKind::Register,
            Message::Broadcast { .. } => MessageKind::Broadcast,
            Message::Private { .. } => MessageKind::Private,
            Message::ListRequest => MessageKind::ListRequest,
            Message::Close => MessageKind::Close,
            Message::File { .. } => MessageKind::File,
            Message::Object { .. } => MessageKind::Object,
            Message::GameInvite { .. } => MessageKind::GameInvite,
            Message::GameResponse { .. } => MessageKind::GameResponse,
            Message::Move { .. } => MessageKind::Move,
            Message::Error { .. } => MessageKind::Error,
            Message::BroadcastDeliver { .. } => MessageKind::BroadcastDeliver,
            Message::PrivateDeliver { .. } => MessageKind::PrivateDeliver,
            Message::List { .. } => MessageKind::List,
            Message::CloseAck => MessageKind::CloseAck,
            Message::FileDeliver { .. } => MessageKind::FileDeliver,
            Message::ObjectDeliver { .. } => MessageKind::ObjectDeliver,
            Message::Board { .. } => MessageKind::Board,
            Message::GameOver(_) => MessageKind::GameOver,
        }
    }

    /// Build the `E` frame reporting `err` to a peer.
    pub fn error(err: &ProtocolError) -> Self {
        Message::Error {
            text: err.wire_text(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_roundtrip_for_every_kind() {
        for tag in b"nmtlxfoJjPEMTLXFOBW" {
            let kind = MessageKind::from_tag(*tag).expect("known tag");
            assert_eq!(kind.tag(), *tag);
        }
        assert_eq!(MessageKind::from_tag(b'#'), None);
        assert_eq!(MessageKind::from_tag(0), None);
    }

    #[test]
    fn test_body_widths_follow_length_conventions() {
        assert_eq!(MessageKind::Broadcast.body_width(), Some(3));
        assert_eq!(MessageKind::List.body_width(), Some(2));
        assert_eq!(MessageKind::FileDeliver.body_width(), Some(8));
        assert_eq!(MessageKind::Object.body_width(), Some(4));
        assert_eq!(MessageKind::Board.body_width(), None);
        assert_eq!(MessageKind::Register.body_width(), None);
    }

    #[test]
    fn test_board_detects_every_line() {
        for line in Board::LINES {
            let mut board = Board::new();
            for i in line {
                assert!(board.place(i, Mark::B));
            }
            assert!(board.has_line(Mark::B));
            assert!(!board.has_line(Mark::A));
        }
    }

    #[test]
    fn test_board_cell_written_once() {
        let mut board = Board::new();
        assert!(board.place(4, Mark::A));
        assert!(!board.place(4, Mark::B));
        assert!(!board.place(9, Mark::B));
        assert_eq!(board.get(4), Some(Mark::A));
    }

    #[test]
    fn test_board_bytes_use_ascii_marks() {
        let mut board = Board::new();
        board.place(0, Mark::A);
        board.place(8, Mark::B);
        assert_eq!(&board.to_bytes(), b"X       O");
        assert_eq!(Board::from_bytes(b"X       O").unwrap(), board);
        assert!(Board::from_bytes(b"X#      O").is_err());
        assert!(Board::from_bytes(b"X").is_err());
    }

    #[test]
    fn test_result_codes() {
        assert_eq!(GameResult::Win.code(), b'1');
        assert_eq!(GameResult::from_code(b'3').unwrap(), GameResult::OpponentDisconnected);
        assert!(GameResult::from_code(b'9').is_err());
    }
}
