//! A [`crate::driver::Driver`] backed by a remote HTTP endpoint, used to
//! mount `http://`/`https://` roots into the engine.
//!
//! Only the subset of the protocol that maps naturally onto HTTP verbs is
//! implemented: `GET` for [`Driver::read`]/[`Driver::stat`], `PUT` for
//! [`Driver::write`], `PATCH` for [`Driver::append`], and `DELETE` for
//! [`Driver::delete`]. Operations with no natural HTTP analogue
//! (`move_document`, `list_dir`) report [`DriverError::Unsupported`].

use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::auth::AuthContext;
use crate::driver::{Driver, DriverError, DriverFuture};
use crate::error::AccessLevel;
use crate::stat::DocumentStat;

fn http_err(uri: &str, source: reqwest::Error) -> DriverError {
    DriverError::Http {
        uri: uri.to_owned(),
        source,
    }
}

/// A driver that proxies reads and writes to an HTTP server.
pub struct HttpDriver {
    client: Client,
}

impl HttpDriver {
    /// Builds a driver using a freshly constructed [`Client`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Builds a driver around an existing [`Client`], e.g. one configured
    /// with custom headers or timeouts.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for HttpDriver {
    fn access<'a>(
        &'a self,
        _uri: &'a str,
        _level: AccessLevel,
        _context: &'a AuthContext,
    ) -> DriverFuture<'a, Option<bool>> {
        Box::pin(async { None })
    }

    fn read<'a>(&'a self, uri: &'a str) -> DriverFuture<'a, Result<Option<Value>, DriverError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(uri)
                .send()
                .await
                .map_err(|source| http_err(uri, source))?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let response = response
                .error_for_status()
                .map_err(|source| http_err(uri, source))?;
            let bytes = response
                .bytes()
                .await
                .map_err(|source| http_err(uri, source))?;
            let value = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            });
            Ok(Some(value))
        })
    }

    fn write<'a>(
        &'a self,
        uri: &'a str,
        value: Value,
    ) -> DriverFuture<'a, Result<bool, DriverError>> {
        Box::pin(async move {
            self.client
                .put(uri)
                .json(&value)
                .send()
                .await
                .map_err(|source| http_err(uri, source))?
                .error_for_status()
                .map_err(|source| http_err(uri, source))?;
            Ok(true)
        })
    }

    fn append<'a>(
        &'a self,
        uri: &'a str,
        chunk: Value,
    ) -> DriverFuture<'a, Result<bool, DriverError>> {
        Box::pin(async move {
            self.client
                .patch(uri)
                .json(&chunk)
                .send()
                .await
                .map_err(|source| http_err(uri, source))?
                .error_for_status()
                .map_err(|source| http_err(uri, source))?;
            Ok(true)
        })
    }

    fn stat<'a>(
        &'a self,
        uri: &'a str,
    ) -> DriverFuture<'a, Result<Option<DocumentStat>, DriverError>> {
        Box::pin(async move {
            let response = self
                .client
                .head(uri)
                .send()
                .await
                .map_err(|source| http_err(uri, source))?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let size = response
                .content_length()
                .or_else(|| {
                    response
                        .headers()
                        .get(reqwest::header::CONTENT_LENGTH)
                        .and_then(|value| value.to_str().ok())
                        .and_then(|value| value.parse().ok())
                })
                .unwrap_or(0);
            // HTTP has no uniform, dependency-free way to parse `Last-Modified`
            // into a precise millisecond timestamp; callers relying on mtime
            // ordering should prefer the local filesystem or memory drivers.
            Ok(Some(DocumentStat::file(size, 0)))
        })
    }

    fn move_document<'a>(
        &'a self,
        from: &'a str,
        _to: &'a str,
    ) -> DriverFuture<'a, Result<bool, DriverError>> {
        Box::pin(async move {
            Err(DriverError::Unsupported(format!(
                "move not supported over HTTP for {from}"
            )))
        })
    }

    fn delete<'a>(&'a self, uri: &'a str) -> DriverFuture<'a, Result<bool, DriverError>> {
        Box::pin(async move {
            let response = self
                .client
                .delete(uri)
                .send()
                .await
                .map_err(|source| http_err(uri, source))?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(false);
            }
            response
                .error_for_status()
                .map_err(|source| http_err(uri, source))?;
            Ok(true)
        })
    }

    fn list_dir<'a>(&'a self, uri: &'a str) -> DriverFuture<'a, Result<Vec<String>, DriverError>> {
        Box::pin(async move {
            Err(DriverError::Unsupported(format!(
                "list_dir not supported over HTTP for {uri}"
            )))
        })
    }
}
