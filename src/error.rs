//! Error types for the agent-protocol boundary.
//!
//! A small, closed enum at a protocol boundary with a hand-written `Display`
//! impl rather than a derive macro.

use std::fmt;
use std::io;

/// Errors that can occur while decoding or relaying agent-protocol messages.
///
/// `MessageTruncated` is deliberately absent: an incomplete frame
/// is not an error, it's [`crate::proto::frame::decode_one`] returning
/// `Ok(None)`.
#[derive(Debug)]
pub enum GubingeError {
    /// Zero-length payload, or an opcode outside the closed inventory.
    MessageInvalid(String),
    /// Frame length exceeds `MAX_MESSAGE_SIZE`. Fatal to the connection.
    StreamException(String),
    /// I/O failure on a client or upstream socket. Fatal to the affected
    /// connection only.
    Io(io::Error),
}

impl fmt::Display for GubingeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MessageInvalid(msg) => write!(f, "invalid agent message: {msg}"),
            Self::StreamException(msg) => write!(f, "stream exception: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for GubingeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for GubingeError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, GubingeError>;
