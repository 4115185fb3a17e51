//! Process identity.
//!
//! Every participant is addressed by a namespace (the job it belongs to) and
//! a rank within that namespace. Published entries and modex blobs are owned
//! by a `ProcId`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Maximum namespace length in bytes.
pub const MAX_NAMESPACE_LEN: usize = 255;

/// Rank within a namespace.
pub type Rank = u32;

/// Rank value meaning "every rank of the namespace".
pub const WILDCARD_RANK: Rank = Rank::MAX;

/// Identity of one process.
///
/// Cheap enough to clone; used as a map key by the modex store and the peer
/// table.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct ProcId {
    pub namespace: String,
    pub rank: Rank,
}

impl ProcId {
    /// Construct a process identity, validating the namespace.
    pub fn new(namespace: impl Into<String>, rank: Rank) -> Result<Self> {
        let namespace = namespace.into();
        if namespace.is_empty() || namespace.len() > MAX_NAMESPACE_LEN {
            return Err(Error::InvalidNamespace(namespace));
        }
        Ok(Self { namespace, rank })
    }

    /// Identity covering every rank of `namespace`.
    pub fn wildcard(namespace: impl Into<String>) -> Result<Self> {
        Self::new(namespace, WILDCARD_RANK)
    }

    #[inline]
    pub fn is_wildcard(&self) -> bool {
        self.rank == WILDCARD_RANK
    }
}

impl fmt::Display for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard() {
            write!(f, "{}:*", self.namespace)
        } else {
            write!(f, "{}:{}", self.namespace, self.rank)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proc_display() {
        let proc = ProcId::new("job-1", 3).unwrap();
        assert_eq!(proc.to_string(), "job-1:3");
        assert_eq!(ProcId::wildcard("job-1").unwrap().to_string(), "job-1:*");
    }

    #[test]
    fn test_invalid_namespace() {
        assert!(matches!(ProcId::new("", 0), Err(Error::InvalidNamespace(_))));
        let long = "n".repeat(MAX_NAMESPACE_LEN + 1);
        assert!(ProcId::new(long, 0).is_err());
    }
}
