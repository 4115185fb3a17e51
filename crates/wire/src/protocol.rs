//! Typed payloads.
//!
//! The header's message type selects the payload schema; payloads are
//! bincode-encoded. Requests carry a tag that the matching [`Reply`] echoes,
//! so a client may have several verbs in flight.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use corelib::{AppSpec, Info, LookupData, Persistence, ProcId, Scope, Status};

use crate::codec::{Message, MessageType};
use crate::error::{Error, Result};

pub fn encode_payload<T: Serialize>(body: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(body)?)
}

pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(payload)?)
}

/// First message of a connection.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Credential {
    pub credential: String,
    /// Identity the client claims; becomes the owner of what it publishes.
    pub proc: ProcId,
}

/// Handshake verdict.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct AuthReply {
    pub status: Status,
}

impl Credential {
    pub fn to_message(&self) -> Result<Message> {
        Message::encode(MessageType::Credential, 0, encode_payload(self)?)
    }
}

impl AuthReply {
    pub fn to_message(&self) -> Result<Message> {
        Message::encode(MessageType::AuthReply, 0, encode_payload(self)?)
    }
}

/// A verb invocation.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum Request {
    Finalize,
    Abort {
        status: i32,
        message: String,
        procs: Vec<ProcId>,
    },
    Fence {
        procs: Vec<ProcId>,
        barrier: bool,
        collect: bool,
        data: Vec<u8>,
    },
    StoreModex {
        scope: Scope,
        blob: Vec<u8>,
    },
    DirectModex {
        target: ProcId,
    },
    JobInfo,
    Publish {
        scope: Scope,
        persistence: Persistence,
        infos: Vec<Info>,
    },
    Lookup {
        scope: Scope,
        wait: bool,
        keys: Vec<String>,
    },
    Unpublish {
        scope: Scope,
        keys: Option<Vec<String>>,
    },
    Spawn {
        apps: Vec<AppSpec>,
    },
    Connect {
        procs: Vec<ProcId>,
    },
    Disconnect {
        procs: Vec<ProcId>,
    },
}

impl Request {
    pub fn kind(&self) -> MessageType {
        match self {
            Request::Finalize => MessageType::Finalize,
            Request::Abort { .. } => MessageType::Abort,
            Request::Fence { .. } => MessageType::Fence,
            Request::StoreModex { .. } => MessageType::StoreModex,
            Request::DirectModex { .. } => MessageType::DirectModex,
            Request::JobInfo => MessageType::JobInfo,
            Request::Publish { .. } => MessageType::Publish,
            Request::Lookup { .. } => MessageType::Lookup,
            Request::Unpublish { .. } => MessageType::Unpublish,
            Request::Spawn { .. } => MessageType::Spawn,
            Request::Connect { .. } => MessageType::Connect,
            Request::Disconnect { .. } => MessageType::Disconnect,
        }
    }

    pub fn to_message(&self, tag: u32) -> Result<Message> {
        Message::encode(self.kind(), tag, encode_payload(self)?)
    }

    /// Decode a received request, cross-checking the header type.
    pub fn from_message(kind: MessageType, payload: &[u8]) -> Result<Self> {
        if kind.verb().is_none() {
            return Err(Error::UnexpectedType(kind));
        }
        let request: Request = decode_payload(payload)?;
        if request.kind() != kind {
            return Err(Error::UnexpectedType(kind));
        }
        Ok(request)
    }
}

/// Verb-specific result data.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub enum ReplyBody {
    #[default]
    Empty,
    Data(Vec<u8>),
    Lookup(LookupData),
    JobInfo(Vec<Info>),
    Namespace(String),
}

impl From<()> for ReplyBody {
    fn from(_: ()) -> Self {
        ReplyBody::Empty
    }
}

impl From<Vec<u8>> for ReplyBody {
    fn from(data: Vec<u8>) -> Self {
        ReplyBody::Data(data)
    }
}

impl From<LookupData> for ReplyBody {
    fn from(slots: LookupData) -> Self {
        ReplyBody::Lookup(slots)
    }
}

impl From<Vec<Info>> for ReplyBody {
    fn from(infos: Vec<Info>) -> Self {
        ReplyBody::JobInfo(infos)
    }
}

impl From<String> for ReplyBody {
    fn from(namespace: String) -> Self {
        ReplyBody::Namespace(namespace)
    }
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Reply {
    pub status: Status,
    pub body: ReplyBody,
}

impl Reply {
    pub fn new(status: Status, body: impl Into<ReplyBody>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn status_only(status: Status) -> Self {
        Self::new(status, ReplyBody::Empty)
    }

    pub fn to_message(&self, tag: u32) -> Result<Message> {
        Message::encode(MessageType::Reply, tag, encode_payload(self)?)
    }
}
