//! An in-memory [`crate::driver::Driver`], the canonical backend used by
//! every unit test in this crate.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde_json::Value;

use crate::auth::AuthContext;
use crate::driver::{Driver, DriverError, DriverFuture};
use crate::error::AccessLevel;
use crate::stat::DocumentStat;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
        .try_into()
        .unwrap_or(u64::MAX)
}

struct Entry {
    value: Value,
    stat: DocumentStat,
}

/// A fully in-memory driver backed by a `HashMap`. Directories are implicit:
/// any key ending in `/` is treated as a directory marker, and `list_dir`
/// derives immediate children from the set of stored keys.
#[derive(Default)]
pub struct MemoryDriver {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryDriver {
    /// Builds an empty in-memory driver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the driver with `value` at `uri`, as if written at construction
    /// time. Used to set up `predefined` fixtures in tests.
    pub fn seed(&self, uri: impl Into<String>, value: Value) {
        let uri = uri.into();
        let mtime = now_ms();
        let stat = if uri.ends_with('/') {
            DocumentStat::directory(mtime)
        } else {
            let size = u64::try_from(value.to_string().len()).unwrap_or(u64::MAX);
            DocumentStat::file(size, mtime)
        };
        self.entries.write().insert(uri, Entry { value, stat });
    }
}

impl Driver for MemoryDriver {
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
            Ok(self
                .entries
                .read()
                .get(uri)
                .map(|entry| entry.value.clone()))
        })
    }

    fn write<'a>(
        &'a self,
        uri: &'a str,
        value: Value,
    ) -> DriverFuture<'a, Result<bool, DriverError>> {
        Box::pin(async move {
            let mtime = now_ms();
            let size = u64::try_from(value.to_string().len()).unwrap_or(u64::MAX);
            let stat = DocumentStat::file(size, mtime);
            self.entries
                .write()
                .insert(uri.to_owned(), Entry { value, stat });
            Ok(true)
        })
    }

    fn append<'a>(
        &'a self,
        uri: &'a str,
        chunk: Value,
    ) -> DriverFuture<'a, Result<bool, DriverError>> {
        Box::pin(async move {
            let mut entries = self.entries.write();
            let mtime = now_ms();
            match entries.get_mut(uri) {
                Some(entry) => {
                    if let (Value::String(existing), Value::String(addition)) =
                        (&mut entry.value, &chunk)
                    {
                        existing.push_str(addition);
                    } else {
                        entry.value = chunk;
                    }
                    entry.stat.mtime_ms = mtime;
                    entry.stat.size = u64::try_from(entry.value.to_string().len())
                        .unwrap_or(entry.stat.size);
                }
                None => {
                    let size = u64::try_from(chunk.to_string().len()).unwrap_or(0);
                    entries.insert(
                        uri.to_owned(),
                        Entry {
                            value: chunk,
                            stat: DocumentStat::file(size, mtime),
                        },
                    );
                }
            }
            Ok(true)
        })
    }

    fn stat<'a>(
        &'a self,
        uri: &'a str,
    ) -> DriverFuture<'a, Result<Option<DocumentStat>, DriverError>> {
        Box::pin(async move { Ok(self.entries.read().get(uri).map(|entry| entry.stat.clone())) })
    }

    fn move_document<'a>(
        &'a self,
        from: &'a str,
        to: &'a str,
    ) -> DriverFuture<'a, Result<bool, DriverError>> {
        Box::pin(async move {
            let mut entries = self.entries.write();
            match entries.remove(from) {
                Some(entry) => {
                    entries.insert(to.to_owned(), entry);
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn delete<'a>(&'a self, uri: &'a str) -> DriverFuture<'a, Result<bool, DriverError>> {
        Box::pin(async move { Ok(self.entries.write().remove(uri).is_some()) })
    }

    fn list_dir<'a>(&'a self, uri: &'a str) -> DriverFuture<'a, Result<Vec<String>, DriverError>> {
        Box::pin(async move {
            let prefix = if uri.ends_with('/') || uri.is_empty() {
                uri.to_owned()
            } else {
                format!("{uri}/")
            };
            let entries = self.entries.read();
            let mut names: Vec<String> = entries
                .keys()
                .filter_map(|key| {
                    let rest = key.strip_prefix(&prefix)?;
                    if rest.is_empty() {
                        return None;
                    }
                    let child = rest.split('/').next().unwrap_or(rest);
                    let is_dir_child = rest.len() > child.len();
                    Some(if is_dir_child {
                        format!("{child}/")
                    } else {
                        child.to_owned()
                    })
                })
                .collect();
            names.sort();
            names.dedup();
            Ok(names)
        })
    }
}
