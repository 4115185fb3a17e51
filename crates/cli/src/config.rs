//! Command-line configuration.

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

use server::{ServerConfig, CREDENTIAL_ENV, NAMESPACE_ENV, RANK_ENV, URI_ENV};

#[derive(Debug, Parser)]
#[command(name = "rendezvous", version, about = "Single-peer rendezvous server")]
pub struct CliConfig {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace). `RUST_LOG`
    /// takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub action: Action,
}

#[derive(Debug, Subcommand)]
pub enum Action {
    /// Listen for one peer and serve it until it disconnects.
    Serve(ServeArgs),
    /// Connect to a running server and exercise a few verbs.
    Client(ClientArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// JSON file with server settings; flags override it.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub session: Option<String>,

    #[arg(long)]
    pub runtime_dir: Option<PathBuf>,

    #[arg(long)]
    pub credential: Option<String>,

    #[arg(long)]
    pub max_payload: Option<u32>,

    #[arg(long)]
    pub handshake_timeout_ms: Option<u64>,

    /// Treat a failed payload transfer as a disconnect instead of exiting.
    #[arg(long)]
    pub lenient: bool,

    #[arg(long)]
    pub expected_peers: Option<usize>,

    /// Answer `connect` with "already exists".
    #[arg(long)]
    pub simulate_already_connected: bool,

    /// Namespace handed to the spawned peer.
    #[arg(long, default_value = "job")]
    pub namespace: String,

    /// Shell command for the peer to launch once the socket is listening.
    #[arg(long)]
    pub exec: Option<String>,
}

impl ServeArgs {
    /// Defaults, then the JSON file, then flags.
    pub fn server_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_json_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(session) = &self.session {
            config.session = session.clone();
        }
        if let Some(dir) = &self.runtime_dir {
            config.runtime_dir = dir.clone();
        }
        if let Some(credential) = &self.credential {
            config.credential = credential.clone();
        }
        if let Some(max) = self.max_payload {
            config.max_payload = max;
        }
        if let Some(ms) = self.handshake_timeout_ms {
            config.handshake_timeout_ms = ms;
        }
        if self.lenient {
            config.strict = false;
        }
        if let Some(n) = self.expected_peers {
            config.module.expected_peers = n;
        }
        if self.simulate_already_connected {
            config.module.simulate_already_connected = true;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Connection settings default to the environment a spawned peer receives.
#[derive(Debug, Args)]
pub struct ClientArgs {
    /// Socket path (default: $RENDEZVOUS_URI).
    #[arg(long)]
    pub uri: Option<PathBuf>,

    #[arg(long)]
    pub credential: Option<String>,

    #[arg(long)]
    pub namespace: Option<String>,

    #[arg(long)]
    pub rank: Option<u32>,

    #[arg(long, default_value = "color")]
    pub key: String,

    #[arg(long, default_value = "red")]
    pub value: String,

    /// Skip the final `finalize`.
    #[arg(long)]
    pub no_finalize: bool,
}

impl ClientArgs {
    pub fn uri(&self) -> Result<PathBuf> {
        or_env(self.uri.clone(), URI_ENV)
    }

    pub fn credential(&self) -> Result<String> {
        or_env(self.credential.clone(), CREDENTIAL_ENV)
    }

    pub fn namespace(&self) -> Result<String> {
        or_env(self.namespace.clone(), NAMESPACE_ENV)
    }

    pub fn rank(&self) -> Result<u32> {
        or_env(self.rank, RANK_ENV)
    }
}

fn or_env<T>(value: Option<T>, var: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = value {
        return Ok(value);
    }
    let raw = std::env::var(var)
        .with_context(|| format!("no value given and ${} is not set", var))?;
    raw.parse()
        .with_context(|| format!("cannot parse ${}={:?}", var, raw))
}
