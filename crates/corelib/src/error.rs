//! Error types for the core library.

use thiserror::Error;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Key is empty or longer than [`crate::MAX_KEY_LEN`].
    #[error("invalid key: {0:?}")]
    InvalidKey(String),
    /// Namespace is empty or longer than [`crate::MAX_NAMESPACE_LEN`].
    #[error("invalid namespace: {0:?}")]
    InvalidNamespace(String),
}
