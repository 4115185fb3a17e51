//! Rendezvous server.
//!
//! This crate ties the wire layer to the verb module:
//! - Listening socket, handshake and the single-threaded event loop
//! - Verb dispatch with completion-driven replies
//! - Configuration, authentication and a small protocol client

pub mod auth;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod reactor;

pub use auth::{Authenticator, SharedSecret};
pub use client::Client;
pub use config::{ServerConfig, CREDENTIAL_ENV, NAMESPACE_ENV, RANK_ENV, URI_ENV};
pub use error::{ClientError, FatalSessionError, HandshakeError, ServerError};
pub use handshake::{Handshake, HandshakeState};
pub use reactor::{Phase, ServerState};
