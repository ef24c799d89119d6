//! Crate-wide error taxonomy.
//!
//! Each component owns a focused error enum (`DriverError`, `IndexError`,
//! `AuthError`); [`DbError`] is the umbrella mutators return, wrapping the
//! others. Read-oriented operations never return `DbError` — per the
//! propagation policy in the specification they degrade to a default value
//! and emit a [`tracing::warn!`] instead, so `CycleSkipped` and
//! `ResolveFailed` are not `Error` variants at all; they are log events.

use thiserror::Error;

use crate::driver::DriverError;
use crate::index::IndexError;

/// The access level requested of a driver or checked against an
/// [`crate::auth::AuthContext`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccessLevel {
    /// Read access.
    Read,
    /// Write access.
    Write,
    /// Delete access.
    Delete,
}

impl AccessLevel {
    /// Parses the single-character level codes used by the wire format
    /// (`r`, `w`, `d`).
    #[must_use]
    pub fn from_char(ch: char) -> Option<Self> {
        match ch {
            'r' => Some(Self::Read),
            'w' => Some(Self::Write),
            'd' => Some(Self::Delete),
            _ => None,
        }
    }

    /// Renders the level back to its single-character code.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Read => 'r',
            Self::Write => 'w',
            Self::Delete => 'd',
        }
    }
}

/// Errors raised while checking or enforcing access control.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum AuthError {
    /// Raised when a requested access level is not one of `r`, `w`, `d`.
    #[error("invalid access level: {0:?}")]
    InvalidLevel(char),
    /// Raised when the driver denies access outright.
    #[error("access denied for {uri} (level {level})")]
    AccessDenied {
        /// URI the caller attempted to access.
        uri: String,
        /// Level that was denied.
        level: char,
    },
}

/// Errors surfaced by the DB engine's mutating operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Raised by [`crate::db::Db::require_connected`] when the engine could
    /// not reach a connected state.
    #[error("database is not connected")]
    NotConnected,
    /// Raised by `attach` when given a value that is neither a [`crate::db::Db`]
    /// nor a duck-typed equivalent.
    #[error("value passed to attach() does not implement the DB surface")]
    AttachTypeError,
    /// Raised by `mount` when given a value that is not DB-like.
    #[error("value passed to mount() does not implement the DB surface")]
    MountTypeError,
    /// Access control failure.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// Underlying driver failure.
    #[error(transparent)]
    Driver(#[from] DriverError),
    /// Directory index encode/decode failure.
    #[error(transparent)]
    Index(#[from] IndexError),
}
