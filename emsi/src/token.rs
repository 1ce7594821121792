//! EMSI tokens (spec §3's "EMSI Token" entity, §9's "sum type for reader
//! outputs" that folds real I/O errors into the same switch the FSM uses).

use std::fmt;

/// One unit of output from [`crate::reader::CharReader::read_token`].
///
/// `Dat` carries no payload at token level — its payload is read separately
/// via `read_emsi_dat` (invariant 5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Inq,
    Req,
    Ack,
    Nak,
    Cli,
    Hbt,
    Dat,
    Timeout,
    CarrierLost,
    IoError(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Inq => write!(f, "INQ"),
            Token::Req => write!(f, "REQ"),
            Token::Ack => write!(f, "ACK"),
            Token::Nak => write!(f, "NAK"),
            Token::Cli => write!(f, "CLI"),
            Token::Hbt => write!(f, "HBT"),
            Token::Dat => write!(f, "DAT"),
            Token::Timeout => write!(f, "Timeout"),
            Token::CarrierLost => write!(f, "CarrierLost"),
            Token::IoError(e) => write!(f, "IoError({e})"),
        }
    }
}

/// The six fixed command packet types that carry a literal CRC tail.
/// `Dat` is handled separately since it has no fixed CRC (its CRC covers
/// the variable-length payload) and is followed by a length field instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Inq,
    Req,
    Ack,
    Nak,
    Cli,
    Hbt,
}

impl CommandKind {
    #[must_use]
    pub fn word(self) -> &'static str {
        match self {
            CommandKind::Inq => "INQ",
            CommandKind::Req => "REQ",
            CommandKind::Ack => "ACK",
            CommandKind::Nak => "NAK",
            CommandKind::Cli => "CLI",
            CommandKind::Hbt => "HBT",
        }
    }

    #[must_use]
    pub fn token(self) -> Token {
        match self {
            CommandKind::Inq => Token::Inq,
            CommandKind::Req => Token::Req,
            CommandKind::Ack => Token::Ack,
            CommandKind::Nak => Token::Nak,
            CommandKind::Cli => Token::Cli,
            CommandKind::Hbt => Token::Hbt,
        }
    }

    /// All six kinds, in a fixed order used for suffix scanning.
    #[must_use]
    pub fn all() -> [CommandKind; 6] {
        [
            CommandKind::Inq,
            CommandKind::Req,
            CommandKind::Ack,
            CommandKind::Nak,
            CommandKind::Cli,
            CommandKind::Hbt,
        ]
    }
}
