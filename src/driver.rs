//! The abstract I/O surface every storage backend implements.
//!
//! A [`Driver`] is the single capability seam between the engine and raw
//! bytes. Every method is asynchronous and returns a boxed future the way
//! [`crate::backend::Backend`]-style traits do in the rest of this
//! workspace's lineage, rather than reaching for `async-trait`: the pattern
//! is already idiomatic here and needs no extra dependency.
//!
//! Drivers may delegate to an inner driver (a linked-list chain) by
//! overriding [`Driver::inner`]; the default method bodies forward to it
//! when present and otherwise signal "no opinion" (`access`) or a driver
//! error (everything else).

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use thiserror::Error;

use crate::error::AccessLevel;
use crate::stat::DocumentStat;

/// A boxed, `Send` future, used as the return type of every [`Driver`]
/// method so the trait stays object-safe.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors raised by a concrete driver implementation.
#[derive(Debug, Error)]
pub enum DriverError {
    /// A local I/O operation failed.
    #[error("I/O failure for {uri}: {source}")]
    Io {
        /// The URI being operated on.
        uri: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// An HTTP request failed.
    #[error("HTTP failure for {uri}: {source}")]
    Http {
        /// The URI being operated on.
        uri: String,
        /// The underlying HTTP error.
        #[source]
        source: reqwest::Error,
    },
    /// The driver does not support this operation at all (as opposed to
    /// "no opinion", which `access` signals with `None`).
    #[error("unsupported operation on this driver: {0}")]
    Unsupported(String),
    /// The document content could not be decoded as JSON when a structured
    /// read was requested.
    #[error("malformed document at {uri}: {message}")]
    Malformed {
        /// The URI whose content failed to parse.
        uri: String,
        /// A human-readable description of the parse failure.
        message: String,
    },
}

/// The abstract storage capability set. Implementors back the DB engine
/// with a concrete transport (in-memory, local filesystem, HTTP, ...).
///
/// All URIs passed to driver methods are already absolute (normalized and
/// resolved against `cwd`/`root` by the caller).
pub trait Driver: Send + Sync {
    /// Returns the inner driver this one delegates to, if any.
    fn inner(&self) -> Option<&dyn Driver> {
        None
    }

    /// Establishes any resources the driver needs (connections, handles).
    fn connect(&self) -> DriverFuture<'_, Result<bool, DriverError>> {
        match self.inner() {
            Some(inner) => inner.connect(),
            None => Box::pin(async { Ok(true) }),
        }
    }

    /// Releases any resources acquired by [`Driver::connect`].
    fn disconnect(&self) -> DriverFuture<'_, Result<bool, DriverError>> {
        match self.inner() {
            Some(inner) => inner.disconnect(),
            None => Box::pin(async { Ok(true) }),
        }
    }

    /// Checks whether `context` may access `uri` at `level`.
    ///
    /// Returns `Some(true)` to explicitly allow, `Some(false)` to deny, and
    /// `None` to express "no opinion" (the engine continues as if
    /// unrestricted).
    fn access<'a>(
        &'a self,
        uri: &'a str,
        level: AccessLevel,
        context: &'a crate::auth::AuthContext,
    ) -> DriverFuture<'a, Option<bool>> {
        match self.inner() {
            Some(inner) => inner.access(uri, level, context),
            None => Box::pin(async { None }),
        }
    }

    /// Reads the document at `uri`, if present.
    fn read<'a>(&'a self, uri: &'a str) -> DriverFuture<'a, Result<Option<Value>, DriverError>> {
        match self.inner() {
            Some(inner) => inner.read(uri),
            None => Box::pin(async { Ok(None) }),
        }
    }

    /// Writes `value` at `uri`, creating or replacing it.
    fn write<'a>(
        &'a self,
        uri: &'a str,
        value: Value,
    ) -> DriverFuture<'a, Result<bool, DriverError>> {
        match self.inner() {
            Some(inner) => inner.write(uri, value),
            None => {
                let uri = uri.to_owned();
                Box::pin(async move {
                    Err(DriverError::Unsupported(format!(
                        "write not supported for {uri}"
                    )))
                })
            }
        }
    }

    /// Appends `chunk` to the document at `uri`.
    fn append<'a>(
        &'a self,
        uri: &'a str,
        chunk: Value,
    ) -> DriverFuture<'a, Result<bool, DriverError>> {
        match self.inner() {
            Some(inner) => inner.append(uri, chunk),
            None => {
                let uri = uri.to_owned();
                Box::pin(async move {
                    Err(DriverError::Unsupported(format!(
                        "append not supported for {uri}"
                    )))
                })
            }
        }
    }

    /// Returns metadata for `uri`, if it exists.
    fn stat<'a>(
        &'a self,
        uri: &'a str,
    ) -> DriverFuture<'a, Result<Option<DocumentStat>, DriverError>> {
        match self.inner() {
            Some(inner) => inner.stat(uri),
            None => Box::pin(async { Ok(None) }),
        }
    }

    /// Moves the document at `from` to `to`.
    fn move_document<'a>(
        &'a self,
        from: &'a str,
        to: &'a str,
    ) -> DriverFuture<'a, Result<bool, DriverError>> {
        match self.inner() {
            Some(inner) => inner.move_document(from, to),
            None => {
                let from = from.to_owned();
                Box::pin(async move {
                    Err(DriverError::Unsupported(format!(
                        "move not supported for {from}"
                    )))
                })
            }
        }
    }

    /// Deletes the document at `uri`.
    fn delete<'a>(&'a self, uri: &'a str) -> DriverFuture<'a, Result<bool, DriverError>> {
        match self.inner() {
            Some(inner) => inner.delete(uri),
            None => {
                let uri = uri.to_owned();
                Box::pin(async move {
                    Err(DriverError::Unsupported(format!(
                        "delete not supported for {uri}"
                    )))
                })
            }
        }
    }

    /// Lists the immediate children of the directory at `uri`, as bare
    /// names (directories carry a trailing `/`).
    fn list_dir<'a>(&'a self, uri: &'a str) -> DriverFuture<'a, Result<Vec<String>, DriverError>> {
        match self.inner() {
            Some(inner) => inner.list_dir(uri),
            None => Box::pin(async { Ok(Vec::new()) }),
        }
    }
}
