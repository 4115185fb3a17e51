//! Values exchanged through the publish/lookup directory and job info.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::proc::ProcId;

/// Maximum key length in bytes.
pub const MAX_KEY_LEN: usize = 511;

/// Opaque typed value. The server never interprets it, it only stores and
/// returns copies.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// A key/value pair as submitted by `publish` and returned by job info.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Info {
    pub key: String,
    pub value: Value,
}

impl Info {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Reject empty or oversized keys.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(Error::InvalidKey(key.to_owned()));
    }
    Ok(())
}

/// One slot of a lookup result.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct PublishedData {
    /// Process that published the key.
    pub proc: ProcId,
    pub key: String,
    pub value: Value,
}

/// Visibility qualifier attached to published entries. Stored and reported
/// but not otherwise interpreted by a single server.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum Scope {
    #[default]
    Undefined,
    Local,
    Remote,
    Global,
}

/// How long a published entry lives.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum Persistence {
    /// Until unpublished or the store is torn down.
    #[default]
    Indefinite,
    /// Removed as soon as one lookup has returned it.
    FirstRead,
    /// Until the publishing process finalizes.
    Process,
    /// Until the whole session ends.
    Session,
}

/// Application description carried by `spawn`.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct AppSpec {
    pub command: String,
    pub argv: Vec<String>,
    pub env: Vec<String>,
    pub max_procs: u32,
}
