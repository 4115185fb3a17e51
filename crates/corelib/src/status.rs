//! Status codes carried in replies.
//!
//! The wire only ever sees the integer form (`Status::code`); unknown codes
//! decode to [`Status::Error`] so a newer peer can never produce a status we
//! cannot represent.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum Status {
    #[default]
    Success,
    Error,
    NotFound,
    /// Returned by `connect` when the harness simulates an existing connection.
    Exists,
    Unreachable,
    WouldBlock,
    ResourceBusy,
    BadParam,
    AuthFailed,
}

impl Status {
    pub const fn code(self) -> i32 {
        match self {
            Status::Success => 0,
            Status::Error => -1,
            Status::NotFound => -2,
            Status::Exists => -3,
            Status::Unreachable => -4,
            Status::WouldBlock => -5,
            Status::ResourceBusy => -6,
            Status::BadParam => -7,
            Status::AuthFailed => -8,
        }
    }

    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Status::Success,
            -2 => Status::NotFound,
            -3 => Status::Exists,
            -4 => Status::Unreachable,
            -5 => Status::WouldBlock,
            -6 => Status::ResourceBusy,
            -7 => Status::BadParam,
            -8 => Status::AuthFailed,
            _ => Status::Error,
        }
    }

    #[inline]
    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Status::from_code(code)
    }
}

impl From<Status> for i32 {
    fn from(status: Status) -> Self {
        status.code()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Success => "SUCCESS",
            Status::Error => "ERROR",
            Status::NotFound => "NOT_FOUND",
            Status::Exists => "EXISTS",
            Status::Unreachable => "UNREACHABLE",
            Status::WouldBlock => "WOULD_BLOCK",
            Status::ResourceBusy => "RESOURCE_BUSY",
            Status::BadParam => "BAD_PARAM",
            Status::AuthFailed => "AUTH_FAILED",
        };
        write!(f, "{}({})", label, self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        for status in [
            Status::Success,
            Status::Error,
            Status::NotFound,
            Status::Exists,
            Status::Unreachable,
            Status::WouldBlock,
            Status::ResourceBusy,
            Status::BadParam,
            Status::AuthFailed,
        ] {
            assert_eq!(Status::from_code(status.code()), status);
        }
    }

    #[test]
    fn test_unknown_code_is_error() {
        assert_eq!(Status::from_code(42), Status::Error);
        assert_eq!(Status::from_code(-1000), Status::Error);
    }
}
