//! Minimal client for the rendezvous protocol.
//!
//! Used by the integration tests and by the CLI smoke client. Requests are
//! tagged with an increasing counter so several may be in flight; [`call`]
//! is the one-at-a-time form.
//!
//! [`call`]: Client::call

use std::path::Path;
use tokio::net::UnixStream;

use corelib::{Info, LookupData, Persistence, ProcId, Scope, Status, WILDCARD_RANK};
use wire::io::{recv_message, send_all, send_message};
use wire::protocol::decode_payload;
use wire::{AuthReply, Credential, MessageType, Reply, ReplyBody, Request, DEFAULT_MAX_PAYLOAD};

use crate::error::ClientError;

pub struct Client {
    stream: UnixStream,
    proc: ProcId,
    next_tag: u32,
    max_payload: u32,
}

impl Client {
    /// Connect and authenticate as `proc`.
    pub async fn connect(path: &Path, credential: &str, proc: ProcId) -> Result<Self, ClientError> {
        let mut stream = UnixStream::connect(path)
            .await
            .map_err(|source| ClientError::Connect {
                path: path.to_owned(),
                source,
            })?;

        let hello = Credential {
            credential: credential.to_owned(),
            proc: proc.clone(),
        };
        send_message(&mut stream, &hello.to_message()?).await?;

        let answer = recv_message(&mut stream, DEFAULT_MAX_PAYLOAD).await?;
        match answer.header().map(|h| h.kind) {
            Some(MessageType::AuthReply) => {}
            Some(kind) => return Err(wire::Error::UnexpectedType(kind).into()),
            None => return Err(wire::Error::Unreachable.into()),
        }
        let AuthReply { status } = decode_payload(answer.payload())?;
        if !status.is_success() {
            return Err(ClientError::Rejected(status));
        }
        tracing::debug!(proc = %proc, "authenticated");

        Ok(Self {
            stream,
            proc,
            next_tag: 1,
            max_payload: DEFAULT_MAX_PAYLOAD,
        })
    }

    pub fn proc(&self) -> &ProcId {
        &self.proc
    }

    /// Send `request` without waiting; returns its tag.
    pub async fn send(&mut self, request: &Request) -> Result<u32, ClientError> {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1);
        send_message(&mut self.stream, &request.to_message(tag)?).await?;
        Ok(tag)
    }

    /// Write bytes verbatim, bypassing framing.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        send_all(&mut self.stream, bytes).await?;
        Ok(())
    }

    /// Next reply, in arrival order.
    pub async fn recv_reply(&mut self) -> Result<(u32, Reply), ClientError> {
        let msg = recv_message(&mut self.stream, self.max_payload).await?;
        let header = msg.header().copied().ok_or(wire::Error::Unreachable)?;
        if header.kind != MessageType::Reply {
            return Err(wire::Error::UnexpectedType(header.kind).into());
        }
        let reply: Reply = decode_payload(msg.payload())?;
        Ok((header.tag, reply))
    }

    pub async fn call(&mut self, request: &Request) -> Result<Reply, ClientError> {
        let expected = self.send(request).await?;
        let (got, reply) = self.recv_reply().await?;
        if got != expected {
            return Err(ClientError::TagMismatch { expected, got });
        }
        Ok(reply)
    }

    pub async fn publish(&mut self, infos: Vec<Info>) -> Result<Status, ClientError> {
        let request = Request::Publish {
            scope: Scope::Global,
            persistence: Persistence::Indefinite,
            infos,
        };
        Ok(self.call(&request).await?.status)
    }

    pub async fn lookup(&mut self, keys: &[&str]) -> Result<(Status, LookupData), ClientError> {
        let request = Request::Lookup {
            scope: Scope::Global,
            wait: false,
            keys: keys.iter().map(|k| k.to_string()).collect(),
        };
        let reply = self.call(&request).await?;
        let slots = match reply.body {
            ReplyBody::Lookup(slots) => slots,
            _ => Vec::new(),
        };
        Ok((reply.status, slots))
    }

    /// `None` removes everything this client published.
    pub async fn unpublish(&mut self, keys: Option<&[&str]>) -> Result<Status, ClientError> {
        let request = Request::Unpublish {
            scope: Scope::Global,
            keys: keys.map(|keys| keys.iter().map(|k| k.to_string()).collect()),
        };
        Ok(self.call(&request).await?.status)
    }

    pub async fn fence(&mut self, data: Vec<u8>) -> Result<(Status, Vec<u8>), ClientError> {
        let request = Request::Fence {
            procs: vec![ProcId {
                namespace: self.proc.namespace.clone(),
                rank: WILDCARD_RANK,
            }],
            barrier: true,
            collect: !data.is_empty(),
            data,
        };
        let reply = self.call(&request).await?;
        let data = match reply.body {
            ReplyBody::Data(data) => data,
            _ => Vec::new(),
        };
        Ok((reply.status, data))
    }

    pub async fn finalize(&mut self) -> Result<Status, ClientError> {
        Ok(self.call(&Request::Finalize).await?.status)
    }
}
