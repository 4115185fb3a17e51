//! Command-line front end for the rendezvous server.
//!
//! Provides commands for:
//! - Serving one peer session, optionally launching the peer
//! - A smoke-test client for a running server

pub mod commands;
pub mod config;
pub mod spawn;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;
