//! Connection handshake.
//!
//! Exactly one exchange per accepted connection, before it is registered
//! with the event loop:
//!
//! 1. receive a `Credential` message (header, then payload)
//! 2. ask the [`Authenticator`] for a verdict
//! 3. send an `AuthReply` carrying that status
//!
//! The handshake reaches `Complete` whatever the verdict; only a successful
//! status lets the caller proceed.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

use corelib::{ProcId, Status};
use wire::io::{recv_message, send_message};
use wire::protocol::decode_payload;
use wire::{AuthReply, Credential, MessageType};

use crate::auth::Authenticator;
use crate::error::HandshakeError;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum HandshakeState {
    AwaitingCredential,
    Complete,
}

pub struct Handshake<'a> {
    authenticator: &'a dyn Authenticator,
    max_payload: u32,
    timeout: Duration,
    state: HandshakeState,
}

impl<'a> Handshake<'a> {
    pub fn new(authenticator: &'a dyn Authenticator, max_payload: u32, timeout: Duration) -> Self {
        Self {
            authenticator,
            max_payload,
            timeout,
            state: HandshakeState::AwaitingCredential,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Run the exchange on `stream`, returning the identity the client
    /// authenticated as.
    pub async fn run<S>(&mut self, stream: &mut S) -> Result<ProcId, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.exchange(stream).await;
        self.state = HandshakeState::Complete;
        result
    }

    async fn exchange<S>(&self, stream: &mut S) -> Result<ProcId, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let msg = tokio::time::timeout(self.timeout, recv_message(stream, self.max_payload))
            .await
            .map_err(|_| HandshakeError::Timeout)??;

        let kind = msg.header().map(|h| h.kind);
        let credential = match kind {
            Some(MessageType::Credential) => decode_payload::<Credential>(msg.payload()).ok(),
            _ => None,
        };

        let (status, proc) = match credential {
            Some(Credential { credential, proc }) => {
                (self.authenticator.authenticate(&credential), Some(proc))
            }
            None => {
                tracing::warn!(kind = ?kind, "first message is not a valid credential");
                (Status::BadParam, None)
            }
        };

        send_message(stream, &AuthReply { status }.to_message()?).await?;

        match proc {
            Some(proc) if status.is_success() => Ok(proc),
            _ => Err(HandshakeError::Rejected(status)),
        }
    }
}
