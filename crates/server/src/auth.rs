//! Credential check used by the handshake.

use corelib::Status;

/// Validates the credential string a client presents.
pub trait Authenticator {
    fn authenticate(&self, credential: &str) -> Status;
}

/// Accepts exactly one preconfigured string.
#[derive(Clone, Debug)]
pub struct SharedSecret {
    expected: String,
}

impl SharedSecret {
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
        }
    }
}

impl Authenticator for SharedSecret {
    fn authenticate(&self, credential: &str) -> Status {
        if credential == self.expected {
            Status::Success
        } else {
            Status::AuthFailed
        }
    }
}

impl<F> Authenticator for F
where
    F: Fn(&str) -> Status,
{
    fn authenticate(&self, credential: &str) -> Status {
        self(credential)
    }
}
