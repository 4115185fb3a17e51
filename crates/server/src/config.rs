//! Server configuration.
//!
//! Everything has a default so an empty JSON object is a valid config file;
//! command-line flags are layered on top by the binary.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use corelib::ModuleConfig;
use wire::{DEFAULT_MAX_PAYLOAD, MAX_PAYLOAD_LIMIT};

use crate::error::ServerError;

/// Environment variable carrying the socket path to a spawned peer.
pub const URI_ENV: &str = "RENDEZVOUS_URI";
pub const NAMESPACE_ENV: &str = "RENDEZVOUS_NAMESPACE";
pub const RANK_ENV: &str = "RENDEZVOUS_RANK";
pub const CREDENTIAL_ENV: &str = "RENDEZVOUS_CREDENTIAL";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Session identifier; the socket address is derived from it.
    pub session: String,
    /// Directory holding the socket.
    pub runtime_dir: PathBuf,
    /// Credential the shared-secret authenticator accepts.
    pub credential: String,
    /// Largest payload a peer may declare.
    pub max_payload: u32,
    pub handshake_timeout_ms: u64,
    /// Treat a failed payload transfer as fatal to the whole process rather
    /// than as an ordinary disconnect.
    pub strict: bool,
    pub module: ModuleConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            session: "1234".to_owned(),
            runtime_dir: std::env::temp_dir(),
            credential: "T35T".to_owned(),
            max_payload: DEFAULT_MAX_PAYLOAD,
            handshake_timeout_ms: 5_000,
            strict: true,
            module: ModuleConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ServerError> {
        let text = std::fs::read_to_string(path).map_err(|source| ServerError::ConfigIo {
            path: path.to_owned(),
            source,
        })?;
        let config: ServerConfig = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.session.is_empty() || self.session.contains('/') {
            return Err(ServerError::Config(format!(
                "session id {:?} must be non-empty and must not contain '/'",
                self.session
            )));
        }
        if self.max_payload == 0 || self.max_payload > MAX_PAYLOAD_LIMIT {
            return Err(ServerError::Config(format!(
                "max_payload must be in 1..={}, got {}",
                MAX_PAYLOAD_LIMIT, self.max_payload
            )));
        }
        if self.module.expected_peers == 0 {
            return Err(ServerError::Config("expected_peers must be at least 1".to_owned()));
        }
        Ok(())
    }

    /// Listening address derived from the session id.
    pub fn socket_path(&self) -> PathBuf {
        self.runtime_dir.join(format!("rendezvous-{}.sock", self.session))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
