//! Error types for framing, transport and payload decoding.

use std::io;
use thiserror::Error;

use crate::codec::{HeaderError, MessageType};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The peer closed or reset the connection.
    #[error("peer unreachable")]
    Unreachable,

    /// Header failed validation; the message is dropped, the connection
    /// survives.
    #[error("malformed header: {0}")]
    MalformedHeader(#[from] HeaderError),

    /// The connection ended inside a frame.
    #[error("connection closed mid-frame: received {received} of {expected} bytes")]
    Truncated { expected: usize, received: usize },

    #[error("cannot allocate a {0} byte payload")]
    Allocation(usize),

    #[error("payload of {0} bytes is too large to frame")]
    PayloadTooLarge(usize),

    #[error("payload decode failed: {0}")]
    Decode(#[from] bincode::Error),

    #[error("unexpected {0} message")]
    UnexpectedType(MessageType),

    #[error(transparent)]
    Io(io::Error),
}

impl Error {
    /// Map an I/O error, folding every "the other side is gone" kind into
    /// [`Error::Unreachable`].
    pub fn from_io(err: io::Error) -> Self {
        if is_disconnect(&err) {
            Error::Unreachable
        } else {
            Error::Io(err)
        }
    }
}

pub(crate) fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}
