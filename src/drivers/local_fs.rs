//! A [`crate::driver::Driver`] backed by a capability-secured local
//! directory (`cap_std::fs_utf8::Dir`).
//!
//! Per the specification's scope, only the driver *contract* is load-
//! bearing here; this implementation is complete enough to be useful
//! against a real directory tree but is not the focus of the engine's test
//! suite (that's [`crate::drivers::memory::MemoryDriver`]).

use std::time::UNIX_EPOCH;

use camino::Utf8PathBuf;
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use serde_json::Value;

use crate::auth::AuthContext;
use crate::driver::{Driver, DriverError, DriverFuture};
use crate::error::AccessLevel;
use crate::stat::DocumentStat;

fn relative_path(uri: &str) -> &str {
    uri.strip_prefix('/').unwrap_or(uri)
}

fn io_err(uri: &str, source: std::io::Error) -> DriverError {
    DriverError::Io {
        uri: uri.to_owned(),
        source,
    }
}

/// A driver rooted at a single directory on the local filesystem.
pub struct LocalFsDriver {
    dir: Dir,
}

impl LocalFsDriver {
    /// Opens `root` as the driver's ambient directory.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError::Io`] if `root` cannot be opened.
    pub fn open(root: &Utf8PathBuf) -> Result<Self, DriverError> {
        let dir =
            Dir::open_ambient_dir(root, ambient_authority()).map_err(|source| DriverError::Io {
                uri: root.to_string(),
                source,
            })?;
        Ok(Self { dir })
    }

    fn stat_sync(&self, uri: &str) -> Result<Option<DocumentStat>, DriverError> {
        let path = relative_path(uri);
        match self.dir.metadata(path) {
            Ok(meta) => {
                let mtime_ms = meta
                    .modified()
                    .ok()
                    .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                    .map_or(0, |duration| u64::try_from(duration.as_millis()).unwrap_or(0));
                let size = meta.len();
                let stat = if meta.is_dir() {
                    DocumentStat::directory(mtime_ms)
                } else {
                    DocumentStat::file(size, mtime_ms)
                };
                Ok(Some(stat))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(uri, err)),
        }
    }
}

impl Driver for LocalFsDriver {
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
            let path = relative_path(uri);
            match self.dir.read_to_string(path) {
                Ok(contents) => Ok(Some(
                    serde_json::from_str(&contents).unwrap_or(Value::String(contents)),
                )),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(io_err(uri, err)),
            }
        })
    }

    fn write<'a>(
        &'a self,
        uri: &'a str,
        value: Value,
    ) -> DriverFuture<'a, Result<bool, DriverError>> {
        Box::pin(async move {
            let path = relative_path(uri);
            if let Some(parent) = Utf8PathBuf::from(path).parent() {
                if !parent.as_str().is_empty() {
                    self.dir
                        .create_dir_all(parent)
                        .map_err(|source| io_err(uri, source))?;
                }
            }
            let rendered = match &value {
                Value::String(text) => text.clone(),
                other => serde_json::to_string_pretty(other).unwrap_or_default(),
            };
            self.dir
                .write(path, rendered)
                .map_err(|source| io_err(uri, source))?;
            Ok(true)
        })
    }

    fn append<'a>(
        &'a self,
        uri: &'a str,
        chunk: Value,
    ) -> DriverFuture<'a, Result<bool, DriverError>> {
        Box::pin(async move {
            use std::io::Write;

            let path = relative_path(uri);
            let text = match &chunk {
                Value::String(text) => text.clone(),
                other => serde_json::to_string(other).unwrap_or_default(),
            };
            let mut file = self
                .dir
                .append(path)
                .map_err(|source| io_err(uri, source))?;
            file.write_all(text.as_bytes())
                .map_err(|source| io_err(uri, source))?;
            Ok(true)
        })
    }

    fn stat<'a>(
        &'a self,
        uri: &'a str,
    ) -> DriverFuture<'a, Result<Option<DocumentStat>, DriverError>> {
        Box::pin(async move { self.stat_sync(uri) })
    }

    fn move_document<'a>(
        &'a self,
        from: &'a str,
        to: &'a str,
    ) -> DriverFuture<'a, Result<bool, DriverError>> {
        Box::pin(async move {
            let from_path = relative_path(from);
            let to_path = relative_path(to);
            self.dir
                .rename(from_path, &self.dir, to_path)
                .map_err(|source| io_err(from, source))?;
            Ok(true)
        })
    }

    fn delete<'a>(&'a self, uri: &'a str) -> DriverFuture<'a, Result<bool, DriverError>> {
        Box::pin(async move {
            let path = relative_path(uri);
            if uri.ends_with('/') {
                match self.dir.remove_dir(path) {
                    Ok(()) => Ok(true),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
                    Err(err) => Err(io_err(uri, err)),
                }
            } else {
                match self.dir.remove_file(path) {
                    Ok(()) => Ok(true),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
                    Err(err) => Err(io_err(uri, err)),
                }
            }
        })
    }

    fn list_dir<'a>(&'a self, uri: &'a str) -> DriverFuture<'a, Result<Vec<String>, DriverError>> {
        Box::pin(async move {
            let path = relative_path(uri);
            let entries = if path.is_empty() {
                self.dir.entries()
            } else {
                self.dir.read_dir(path)
            }
            .map_err(|source| io_err(uri, source))?;

            let mut names = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|source| io_err(uri, source))?;
                let name = entry.file_name();
                let is_dir = entry
                    .file_type()
                    .map(|file_type| file_type.is_dir())
                    .unwrap_or(false);
                names.push(if is_dir {
                    format!("{name}/")
                } else {
                    name
                });
            }
            names.sort();
            Ok(names)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use serde_json::json;
    use tempfile::TempDir;

    fn temp_root() -> (TempDir, Utf8PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        (tmp, path)
    }

    #[tokio::test]
    async fn write_then_read_round_trips_json() {
        let (_tmp, root) = temp_root();
        let driver = LocalFsDriver::open(&root).unwrap();
        driver.write("/doc.json", json!({"a": 1})).await.unwrap();
        let value = driver.read("/doc.json").await.unwrap();
        assert_eq!(value, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn read_missing_file_returns_none() {
        let (_tmp, root) = temp_root();
        let driver = LocalFsDriver::open(&root).unwrap();
        assert_eq!(driver.read("/missing.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_creates_parent_directories() {
        let (_tmp, root) = temp_root();
        let driver = LocalFsDriver::open(&root).unwrap();
        driver
            .write("/nested/dir/doc.json", json!(1))
            .await
            .unwrap();
        let value = driver.read("/nested/dir/doc.json").await.unwrap();
        assert_eq!(value, Some(json!(1)));
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let (_tmp, root) = temp_root();
        let driver = LocalFsDriver::open(&root).unwrap();
        driver.write("/doc.json", json!(1)).await.unwrap();
        assert!(driver.delete("/doc.json").await.unwrap());
        assert_eq!(driver.read("/doc.json").await.unwrap(), None);
    }
}
