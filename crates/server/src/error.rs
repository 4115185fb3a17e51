//! Server error types.
//!
//! [`FatalSessionError`] marks conditions that end the whole process; every
//! other peer failure is absorbed by the reactor as a disconnect.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use corelib::Status;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("timed out waiting for the credential")]
    Timeout,
    #[error("handshake transport: {0}")]
    Wire(#[from] wire::Error),
    #[error("credential rejected: {0}")]
    Rejected(Status),
}

#[derive(Debug, Error)]
pub enum FatalSessionError {
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("payload transfer from {proc} failed: {source}")]
    PayloadTransfer { proc: String, source: wire::Error },
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("cannot read config {path}: {source}")]
    ConfigIo { path: PathBuf, source: io::Error },
    #[error("cannot parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),
    #[error("cannot listen on {path}: {source}")]
    Bind { path: PathBuf, source: io::Error },
    #[error("accept failed: {0}")]
    Accept(io::Error),
    #[error(transparent)]
    Fatal(#[from] FatalSessionError),
    #[error("teardown failed: {0}")]
    Teardown(io::Error),
}

impl ServerError {
    pub fn is_fatal_session(&self) -> bool {
        matches!(self, ServerError::Fatal(_))
    }

    /// Process exit code for this error.
    ///
    /// Session-fatal errors exit cleanly: the harness treats a broken peer as
    /// the end of the run, not as a server failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            ServerError::Fatal(_) => 0,
            ServerError::Teardown(err) => err.raw_os_error().filter(|c| *c != 0).unwrap_or(1),
            _ => 1,
        }
    }
}

/// Errors seen by [`crate::Client`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot connect to {path}: {source}")]
    Connect { path: PathBuf, source: io::Error },
    #[error("server rejected credential: {0}")]
    Rejected(Status),
    #[error(transparent)]
    Wire(#[from] wire::Error),
    #[error("reply tag {got} does not match request tag {expected}")]
    TagMismatch { expected: u32, got: u32 },
}
