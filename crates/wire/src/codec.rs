//! Framed message codec.
//!
//! Every message is a fixed 16-byte header followed by a payload whose
//! length the header declares:
//!
//! ```text
//! [magic:u16][version:u8][type:u8][tag:u32][payload_len:u32][check:u32][payload...]
//! ```
//!
//! All header fields are big-endian. `check` is the low 32 bits of
//! `xxh3_64` over the first 12 header bytes, so a header can be validated
//! before its length field is trusted.
//!
//! [`Message`] exposes its raw header and payload buffers so the I/O layer
//! can fill them in place; [`Message::fix_header`] is the only step that
//! turns received header bytes into a sized payload buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

use corelib::Verb;

use crate::error::{Error, Result};

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = 16;

/// First two header bytes, "RV".
pub const MAGIC: u16 = 0x5256;

pub const PROTOCOL_VERSION: u8 = 1;

/// Default cap on a declared payload length.
pub const DEFAULT_MAX_PAYLOAD: u32 = 1024 * 1024;

/// No configuration may raise the payload cap above this.
pub const MAX_PAYLOAD_LIMIT: u32 = 16 * 1024 * 1024;

const CHECKED_LEN: usize = 12;

/// Message type carried in the header.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum MessageType {
    /// Client → server: first message of the handshake.
    Credential,
    /// Server → client: handshake verdict.
    AuthReply,
    Finalize,
    Abort,
    Fence,
    StoreModex,
    DirectModex,
    JobInfo,
    Publish,
    Lookup,
    Unpublish,
    Spawn,
    Connect,
    Disconnect,
    /// Server → client: answer to any verb, echoing the request tag.
    Reply,
}

impl MessageType {
    pub const fn to_u8(self) -> u8 {
        match self {
            Self::Credential => 1,
            Self::AuthReply => 2,
            Self::Finalize => 3,
            Self::Abort => 4,
            Self::Fence => 5,
            Self::StoreModex => 6,
            Self::DirectModex => 7,
            Self::JobInfo => 8,
            Self::Publish => 9,
            Self::Lookup => 10,
            Self::Unpublish => 11,
            Self::Spawn => 12,
            Self::Connect => 13,
            Self::Disconnect => 14,
            Self::Reply => 15,
        }
    }

    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Credential),
            2 => Some(Self::AuthReply),
            3 => Some(Self::Finalize),
            4 => Some(Self::Abort),
            5 => Some(Self::Fence),
            6 => Some(Self::StoreModex),
            7 => Some(Self::DirectModex),
            8 => Some(Self::JobInfo),
            9 => Some(Self::Publish),
            10 => Some(Self::Lookup),
            11 => Some(Self::Unpublish),
            12 => Some(Self::Spawn),
            13 => Some(Self::Connect),
            14 => Some(Self::Disconnect),
            15 => Some(Self::Reply),
            _ => None,
        }
    }

    /// The verb a request of this type invokes, if any.
    pub const fn verb(self) -> Option<Verb> {
        match self {
            Self::Finalize => Some(Verb::Finalize),
            Self::Abort => Some(Verb::Abort),
            Self::Fence => Some(Verb::Fence),
            Self::StoreModex => Some(Verb::StoreModex),
            Self::DirectModex => Some(Verb::DirectModex),
            Self::JobInfo => Some(Verb::JobInfo),
            Self::Publish => Some(Verb::Publish),
            Self::Lookup => Some(Verb::Lookup),
            Self::Unpublish => Some(Verb::Unpublish),
            Self::Spawn => Some(Verb::Spawn),
            Self::Connect => Some(Verb::Connect),
            Self::Disconnect => Some(Verb::Disconnect),
            Self::Credential | Self::AuthReply | Self::Reply => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.verb() {
            Some(verb) => f.write_str(verb.name()),
            None => match self {
                Self::Credential => f.write_str("credential"),
                Self::AuthReply => f.write_str("auth_reply"),
                _ => f.write_str("reply"),
            },
        }
    }
}

/// Reasons a received header is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("bad magic {0:#06x}")]
    BadMagic(u16),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("header check mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CheckMismatch { expected: u32, actual: u32 },
    /// The check word matched, so `len` is trusted and can be skipped.
    #[error("unknown message type {kind} with {len} payload bytes")]
    UnknownType { kind: u8, len: u32 },
    /// The header itself is sound, so `len` payload bytes can be skipped.
    #[error("declared payload of {len} bytes exceeds cap {max}")]
    Oversize { len: u32, max: u32 },
}

impl HeaderError {
    /// Payload bytes that follow the rejected header and must be discarded
    /// to stay aligned. `None` when the length field cannot be trusted.
    pub fn skip_len(&self) -> Option<u32> {
        match *self {
            HeaderError::UnknownType { len, .. } | HeaderError::Oversize { len, .. } => Some(len),
            _ => None,
        }
    }
}

/// Decoded header.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Header {
    pub kind: MessageType,
    pub tag: u32,
    pub payload_len: u32,
}

impl Header {
    pub fn new(kind: MessageType, tag: u32, payload_len: u32) -> Self {
        Self {
            kind,
            tag,
            payload_len,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        buf.put_u16(MAGIC);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(self.kind.to_u8());
        buf.put_u32(self.tag);
        buf.put_u32(self.payload_len);
        let check = check_word(&buf[..CHECKED_LEN]);
        buf.put_u32(check);

        let mut out = [0u8; HEADER_LEN];
        out.copy_from_slice(&buf);
        out
    }

    /// Validate raw header bytes. The length is checked against `max_payload`
    /// only after everything else has been verified.
    pub fn decode(
        bytes: &[u8; HEADER_LEN],
        max_payload: u32,
    ) -> std::result::Result<Self, HeaderError> {
        let mut buf = &bytes[..];
        let magic = buf.get_u16();
        if magic != MAGIC {
            return Err(HeaderError::BadMagic(magic));
        }
        let version = buf.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(HeaderError::UnsupportedVersion(version));
        }
        let raw_kind = buf.get_u8();
        let tag = buf.get_u32();
        let payload_len = buf.get_u32();
        let actual = buf.get_u32();

        let expected = check_word(&bytes[..CHECKED_LEN]);
        if actual != expected {
            return Err(HeaderError::CheckMismatch { expected, actual });
        }
        let kind = MessageType::from_u8(raw_kind).ok_or(HeaderError::UnknownType {
            kind: raw_kind,
            len: payload_len,
        })?;
        if payload_len > max_payload {
            return Err(HeaderError::Oversize {
                len: payload_len,
                max: max_payload,
            });
        }
        Ok(Self {
            kind,
            tag,
            payload_len,
        })
    }
}

fn check_word(bytes: &[u8]) -> u32 {
    xxh3_64(bytes) as u32
}

/// One message: header buffer, decoded header once fixed, payload buffer.
#[derive(Debug)]
pub struct Message {
    raw_header: [u8; HEADER_LEN],
    header: Option<Header>,
    payload: Vec<u8>,
}

impl Message {
    /// Empty message ready to receive a header.
    pub fn new() -> Self {
        Self {
            raw_header: [0u8; HEADER_LEN],
            header: None,
            payload: Vec::new(),
        }
    }

    /// Outgoing message with an already valid header.
    pub fn encode(kind: MessageType, tag: u32, payload: Vec<u8>) -> Result<Self> {
        let payload_len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= MAX_PAYLOAD_LIMIT)
            .ok_or(Error::PayloadTooLarge(payload.len()))?;
        let header = Header::new(kind, tag, payload_len);
        Ok(Self {
            raw_header: header.encode(),
            header: Some(header),
            payload,
        })
    }

    pub fn header_size(&self) -> usize {
        HEADER_LEN
    }

    pub fn header_bytes(&self) -> &[u8] {
        &self.raw_header
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.raw_header
    }

    /// Size of the payload buffer; zero until the header is fixed.
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.payload
    }

    /// Validate the received header bytes and size the payload buffer to
    /// exactly the declared length.
    pub fn fix_header(&mut self, max_payload: u32) -> Result<Header> {
        let header = Header::decode(&self.raw_header, max_payload)?;
        let len = header.payload_len as usize;
        let mut payload = Vec::new();
        payload
            .try_reserve_exact(len)
            .map_err(|_| Error::Allocation(len))?;
        payload.resize(len, 0);
        self.payload = payload;
        self.header = Some(header);
        Ok(header)
    }

    /// The decoded header, once [`fix_header`](Self::fix_header) succeeded.
    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Header and payload in one contiguous buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_slice(&self.raw_header);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}
