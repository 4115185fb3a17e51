//! Wire layer for the rendezvous protocol.
//!
//! This crate provides the framing, transport and payload schemas:
//! - Fixed-header message codec with header validation
//! - Blocking and resumable non-blocking socket I/O
//! - Typed request / reply payloads

pub mod codec;
pub mod error;
pub mod io;
pub mod protocol;

pub use codec::{
    Header, HeaderError, Message, MessageType, DEFAULT_MAX_PAYLOAD, HEADER_LEN, MAX_PAYLOAD_LIMIT,
};
pub use error::{Error, Result};
pub use io::{FrameReader, ReadEvent, Recv};
pub use protocol::{AuthReply, Credential, Reply, ReplyBody, Request};
