//! The DB engine (C7): a driver-backed, cached, event-emitting document
//! store with attach/mount fan-out and model hydration.

pub mod cache;
pub mod model;
pub mod watch;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_stream::stream;
use futures::Stream;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::auth::AuthContext;
use crate::driver::Driver;
use crate::error::{AccessLevel, AuthError, DbError};
use crate::fetch::{self, DocumentSource, FetchOptions, InheritanceCache};
use crate::index::{self, IndexRow};
use crate::path;
use crate::stat::{DocumentEntry, DocumentStat, EntryKind};

use cache::{CacheMap, Cached};
use model::ModelRegistry;
use watch::{DbEvent, EventHub};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Construction-time options for [`Db::new`].
pub struct DbOptions {
    /// Working directory URIs are resolved relative to.
    pub cwd: String,
    /// Root prefix every resolved URI is nested under.
    pub root: String,
    /// Cache TTL in milliseconds; `0` disables expiry.
    pub ttl_ms: u64,
    /// The auth context used when none is passed to an operation.
    pub context: AuthContext,
    /// Documents seeded into the cache at `connect()` time, as if already
    /// loaded.
    pub predefined: HashMap<String, Value>,
    /// The reserved inheritance filename.
    pub inheritance_file: String,
    /// Data file extensions recognised for extension-less lookups.
    pub data_extnames: Vec<String>,
    /// A human-readable label used in `fallback` events.
    pub label: String,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            cwd: "/".to_owned(),
            root: "/".to_owned(),
            ttl_ms: 0,
            context: AuthContext::default(),
            predefined: HashMap::new(),
            inheritance_file: fetch::DEFAULT_INHERITANCE_FILE.to_owned(),
            data_extnames: fetch::DATA_EXTNAMES.iter().map(|ext| (*ext).to_owned()).collect(),
            label: "db".to_owned(),
        }
    }
}

/// Options for [`Db::get`].
#[derive(Clone, Debug, Default)]
pub struct GetOptions {
    /// Value returned when the document cannot be found.
    pub default_value: Option<Value>,
}

/// Options for [`Db::read_dir`]/[`Db::read_branch`].
#[derive(Clone)]
pub struct ReadDirOptions {
    /// Recursion depth; `-1` means unlimited.
    pub depth: i64,
    /// Skip issuing `stat` calls for entries (they are yielded unfulfilled).
    pub skip_stat: bool,
    /// Skip symbolic-link entries entirely.
    pub skip_symbolic_link: bool,
    /// Skip `index.txt`/`index.txtl` entries.
    pub skip_index: bool,
    /// Include directory entries in the yielded sequence (not just files).
    pub include_dirs: bool,
    /// Filters entries from both the yielded sequence and recursion.
    pub filter: Option<Arc<dyn Fn(&DocumentEntry) -> bool + Send + Sync>>,
    /// Access context for the walk.
    pub context: Option<AuthContext>,
}

impl Default for ReadDirOptions {
    fn default() -> Self {
        Self {
            depth: -1,
            skip_stat: false,
            skip_symbolic_link: false,
            skip_index: true,
            include_dirs: true,
            filter: None,
            context: None,
        }
    }
}

/// A single entry yielded by [`Db::find_stream`].
#[derive(Clone, Debug)]
pub struct StreamEntry {
    /// The entry just discovered.
    pub file: DocumentEntry,
    /// Every file discovered so far.
    pub files: Vec<DocumentEntry>,
    /// Directories discovered so far, keyed by URI.
    pub dirs: HashMap<String, DocumentEntry>,
    /// Immediate children of the walk's root, keyed by URI.
    pub top: HashMap<String, DocumentEntry>,
    /// URIs that errored while being statted, keyed by URI, valued by
    /// message.
    pub errors: HashMap<String, String>,
    /// Monotonic-ish completion ratio in `[0, 1]`.
    pub progress: f64,
    /// Running total size in bytes of every file discovered so far.
    pub total_size: u64,
}

/// Sort key for [`Db::find_stream`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SortKey {
    /// Sort by entry name.
    Name,
    /// Sort by modification time.
    Mtime,
    /// Sort by size.
    Size,
}

/// Sort direction for [`Db::find_stream`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// Options for [`Db::find_stream`].
#[derive(Clone)]
pub struct FindStreamOptions {
    /// Maximum number of entries to yield.
    pub limit: Option<usize>,
    /// Skip `stat` calls.
    pub skip_stat: bool,
    /// Skip symbolic links.
    pub skip_symbolic_link: bool,
    /// Eagerly load each data file's content into the cache as it is
    /// discovered.
    pub load: bool,
    /// Sort key.
    pub sort: SortKey,
    /// Sort order.
    pub order: SortOrder,
    /// Filters entries from the yielded sequence.
    pub filter: Option<Arc<dyn Fn(&DocumentEntry) -> bool + Send + Sync>>,
    /// Access context for the walk.
    pub context: Option<AuthContext>,
}

impl Default for FindStreamOptions {
    fn default() -> Self {
        Self {
            limit: None,
            skip_stat: false,
            skip_symbolic_link: false,
            load: false,
            sort: SortKey::Name,
            order: SortOrder::Asc,
            filter: None,
            context: None,
        }
    }
}

/// A field-level validation failure reported by [`Db::validate`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationIssue {
    /// The offending field name, or `*` for a whole-document mismatch.
    pub field: String,
    /// A human-readable description of the mismatch.
    pub message: String,
}

/// The driver-backed, cached document store.
pub struct Db {
    cwd: String,
    root: String,
    driver: Box<dyn Driver>,
    data: CacheMap<Value>,
    meta: CacheMap<DocumentStat>,
    context: AuthContext,
    connected: AtomicBool,
    dbs: RwLock<Vec<Arc<Db>>>,
    predefined: HashMap<String, Value>,
    mounts: RwLock<Vec<(String, Arc<Db>)>>,
    models: RwLock<ModelRegistry>,
    events: EventHub,
    inheritance_cache: InheritanceCache,
    inheritance_file: String,
    data_extnames: Vec<String>,
    label: String,
}

impl Db {
    /// Builds a new, disconnected `Db` over `driver`.
    #[must_use]
    pub fn new(driver: Box<dyn Driver>, options: DbOptions) -> Self {
        Self {
            cwd: options.cwd,
            root: options.root,
            driver,
            data: CacheMap::new(options.ttl_ms),
            meta: CacheMap::new(options.ttl_ms),
            context: options.context,
            connected: AtomicBool::new(false),
            dbs: RwLock::new(Vec::new()),
            predefined: options.predefined,
            mounts: RwLock::new(Vec::new()),
            models: RwLock::new(ModelRegistry::new()),
            events: EventHub::new(),
            inheritance_cache: InheritanceCache::new(),
            inheritance_file: options.inheritance_file,
            data_extnames: options.data_extnames,
            label: options.label,
        }
    }

    fn abs(&self, uri: &str) -> String {
        path::absolute(&self.cwd, &self.root, &[uri])
    }

    fn ctx<'a>(&'a self, context: Option<&'a AuthContext>) -> &'a AuthContext {
        context.unwrap_or(&self.context)
    }

    async fn ensure_access(
        &self,
        uri: &str,
        level: AccessLevel,
        context: &AuthContext,
    ) -> Result<(), DbError> {
        match self.driver.access(uri, level, context).await {
            Some(true) | None => Ok(()),
            Some(false) => Err(DbError::Auth(AuthError::AccessDenied {
                uri: uri.to_owned(),
                level: level.as_char(),
            })),
        }
    }

    /// Copies `predefined` into the cache and marks the engine connected.
    /// Idempotent: a second call is a no-op.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<bool, DbError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(true);
        }
        let mtime = now_ms();
        for (uri, value) in &self.predefined {
            let size = u64::try_from(value.to_string().len()).unwrap_or(0);
            self.data.set(uri.clone(), Cached::Hit(value.clone()));
            self.meta
                .set(uri.clone(), Cached::Hit(DocumentStat::file(size, mtime)));

            let mut dir = path::dirname(uri);
            loop {
                if self.meta.get(&dir).is_none() {
                    self.meta
                        .set(dir.clone(), Cached::Hit(DocumentStat::directory(mtime)));
                }
                if dir == "/" {
                    break;
                }
                let parent = path::dirname(dir.trim_end_matches('/'));
                if parent == dir {
                    break;
                }
                dir = parent;
            }
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(true)
    }

    /// Connects if needed, then fails if still not connected.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotConnected`] if the engine could not reach a
    /// connected state.
    pub async fn require_connected(&self) -> Result<(), DbError> {
        self.connect().await?;
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DbError::NotConnected)
        }
    }

    /// Reads the document at `uri`, consulting the cache first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Auth`] if access is denied.
    pub async fn get(
        &self,
        uri: &str,
        opts: Option<GetOptions>,
        context: Option<&AuthContext>,
    ) -> Result<Value, DbError> {
        self.require_connected().await?;
        let uri = self.abs(uri);
        let context = self.ctx(context);

        if let Some((prefix, mount)) = self.find_mount(&uri) {
            let sub_uri = self.sub_uri(&uri, &prefix);
            return Box::pin(mount.get(&sub_uri, opts, Some(context))).await;
        }

        self.ensure_access(&uri, AccessLevel::Read, context).await?;

        let default_value = opts.and_then(|opts| opts.default_value).unwrap_or(Value::Null);

        if let Some(Cached::Hit(value)) = self.data.get(&uri) {
            self.events.emit(&DbEvent::Cache {
                uri: uri.clone(),
                hit: true,
            });
            return Ok(value);
        }
        if let Some(Cached::Absent) = self.data.get(&uri) {
            self.events.emit(&DbEvent::Cache {
                uri: uri.clone(),
                hit: true,
            });
            return Ok(default_value);
        }

        let value = self
            .load_document(&uri, Some(default_value.clone()), Some(context))
            .await?;
        self.events.emit(&DbEvent::Cache {
            uri: uri.clone(),
            hit: false,
        });
        Ok(value)
    }

    /// Writes `value` at `uri`, into the cache only (no driver I/O). Use
    /// [`Db::save_document`] to persist through the driver.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Auth`] if access is denied.
    pub async fn set(
        &self,
        uri: &str,
        value: Value,
        context: Option<&AuthContext>,
    ) -> Result<(), DbError> {
        self.require_connected().await?;
        let uri = self.abs(uri);
        let context = self.ctx(context);

        if let Some((prefix, mount)) = self.find_mount(&uri) {
            let sub_uri = self.sub_uri(&uri, &prefix);
            return Box::pin(mount.set(&sub_uri, value, Some(context))).await;
        }

        self.ensure_access(&uri, AccessLevel::Write, context).await?;

        self.data.set(uri.clone(), Cached::Hit(value.clone()));
        let mtime = now_ms();
        let size = u64::try_from(value.to_string().len()).unwrap_or(0);
        self.meta.set(uri.clone(), Cached::Hit(DocumentStat::file(size, mtime)));

        self.events.emit(&DbEvent::Set {
            uri: uri.clone(),
            value,
        });
        self.events.emit(&DbEvent::Change { uri });
        Ok(())
    }

    /// Returns metadata for `uri`, consulting the cache first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Auth`] if access is denied, or [`DbError::Driver`]
    /// on a driver I/O failure.
    pub async fn stat(
        &self,
        uri: &str,
        context: Option<&AuthContext>,
    ) -> Result<Option<DocumentStat>, DbError> {
        self.require_connected().await?;
        let uri = self.abs(uri);
        let context = self.ctx(context);

        if let Some((prefix, mount)) = self.find_mount(&uri) {
            let sub_uri = self.sub_uri(&uri, &prefix);
            return Box::pin(mount.stat(&sub_uri, Some(context))).await;
        }

        self.ensure_access(&uri, AccessLevel::Read, context).await?;

        match self.meta.get(&uri) {
            Some(cached) => Ok(cached.into_option()),
            None => {
                let stat = self.driver.stat(&uri).await?;
                match &stat {
                    Some(stat) => self.meta.set(uri.clone(), Cached::Hit(stat.clone())),
                    None => self.meta.set(uri.clone(), Cached::Absent),
                }
                Ok(stat)
            }
        }
    }

    /// Loads `uri` via the driver, probing configured data extensions when
    /// `uri` lacks one and the bare URI is not found.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Auth`] if access is denied.
    pub async fn load_document(
        &self,
        uri: &str,
        default_value: Option<Value>,
        context: Option<&AuthContext>,
    ) -> Result<Value, DbError> {
        let abs_uri = self.abs(uri);
        let context = self.ctx(context);
        self.ensure_access(&abs_uri, AccessLevel::Read, context).await?;

        let default_value = default_value.unwrap_or(Value::Null);

        match self.driver.read(&abs_uri).await {
            Ok(Some(value)) => {
                self.data.set(abs_uri, Cached::Hit(value.clone()));
                return Ok(value);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(uri = %abs_uri, error = %err, "driver read failed, degrading to default");
                self.data.set(abs_uri, Cached::Absent);
                return Ok(default_value);
            }
        }

        if path::extname(&abs_uri).is_empty() {
            for ext in &self.data_extnames {
                let candidate = format!("{abs_uri}{ext}");
                if let Ok(Some(value)) = self.driver.read(&candidate).await {
                    self.data.set(abs_uri, Cached::Hit(value.clone()));
                    return Ok(value);
                }
            }
        }

        self.data.set(abs_uri, Cached::Absent);
        Ok(default_value)
    }

    /// Persists `value` at `uri` through the driver, updating the cache and
    /// regenerating every affected directory index.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Auth`]/[`DbError::Driver`] on failure.
    pub async fn save_document(
        &self,
        uri: &str,
        value: Value,
        context: Option<&AuthContext>,
    ) -> Result<(), DbError> {
        self.require_connected().await?;
        let uri = self.abs(uri);
        let context = self.ctx(context);

        if let Some((prefix, mount)) = self.find_mount(&uri) {
            let sub_uri = self.sub_uri(&uri, &prefix);
            return Box::pin(mount.save_document(&sub_uri, value, Some(context))).await;
        }

        self.ensure_access(&uri, AccessLevel::Write, context).await?;

        self.driver.write(&uri, value.clone()).await?;

        let mtime = now_ms();
        let size = u64::try_from(value.to_string().len()).unwrap_or(0);
        self.data.set(uri.clone(), Cached::Hit(value.clone()));
        self.meta.set(uri.clone(), Cached::Hit(DocumentStat::file(size, mtime)));

        self.update_index(&uri).await;

        self.events.emit(&DbEvent::Set {
            uri: uri.clone(),
            value,
        });
        self.events.emit(&DbEvent::Save { uri: uri.clone() });
        self.events.emit(&DbEvent::Change { uri });
        Ok(())
    }

    async fn update_index(&self, uri: &str) {
        for index_uri in index::indexes_to_update(uri) {
            let dir = path::dirname(&index_uri);
            let Ok(children) = self.driver.list_dir(&dir).await else {
                continue;
            };
            let mut entries = Vec::with_capacity(children.len());
            for child in children {
                let child_uri = format!("{dir}{child}");
                if index::is_index(&child_uri) || index::is_full_index(&child_uri) {
                    continue;
                }
                let stat = match self.driver.stat(&child_uri).await.ok().flatten() {
                    Some(stat) => stat,
                    None if child_uri.ends_with('/') => DocumentStat::directory(0),
                    None => DocumentStat::default(),
                };
                entries.push(DocumentEntry::from_path(&child_uri).with_stat(stat));
            }
            let rows: Vec<IndexRow> = index::directory_entries(&entries);
            let encoded = index::encode(&rows);
            if let Err(err) = self.driver.write(&index_uri, Value::String(encoded)).await {
                warn!(uri = %index_uri, error = %err, "failed to update directory index");
            }
        }
    }

    /// Deletes the document at `uri` through the driver, erasing it from
    /// the cache.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Auth`]/[`DbError::Driver`] on failure.
    pub async fn drop_document(
        &self,
        uri: &str,
        context: Option<&AuthContext>,
    ) -> Result<bool, DbError> {
        self.require_connected().await?;
        let uri = self.abs(uri);
        let context = self.ctx(context);

        if let Some((prefix, mount)) = self.find_mount(&uri) {
            let sub_uri = self.sub_uri(&uri, &prefix);
            return Box::pin(mount.drop_document(&sub_uri, Some(context))).await;
        }

        self.ensure_access(&uri, AccessLevel::Delete, context).await?;

        let deleted = self.driver.delete(&uri).await?;
        self.data.remove(&uri);
        self.meta.remove(&uri);

        self.events.emit(&DbEvent::Drop { uri: uri.clone() });
        self.events.emit(&DbEvent::Change { uri });
        Ok(deleted)
    }

    /// Moves the document at `from` to `to`, preferring the driver's native
    /// move when supported, falling back to load-save-drop otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Auth`]/[`DbError::Driver`] on failure.
    pub async fn move_document(
        &self,
        from: &str,
        to: &str,
        context: Option<&AuthContext>,
    ) -> Result<bool, DbError> {
        self.require_connected().await?;
        let from = self.abs(from);
        let to = self.abs(to);
        let context = self.ctx(context);
        self.ensure_access(&from, AccessLevel::Delete, context).await?;
        self.ensure_access(&to, AccessLevel::Write, context).await?;

        let moved = match self.driver.move_document(&from, &to).await {
            Ok(moved) => moved,
            Err(_) => {
                let value = self.load_document(&from, None, Some(context)).await?;
                self.save_document(&to, value, Some(context)).await?;
                self.drop_document(&from, Some(context)).await?
            }
        };

        self.data.remove(&from);
        self.meta.remove(&from);
        self.update_index(&from).await;

        self.events.emit(&DbEvent::Change { uri: to });
        Ok(moved)
    }

    /// Appends `chunk` to the document at `uri`, via the driver when
    /// supported, else accumulating in the cache.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Auth`] if access is denied.
    pub async fn write_document(
        &self,
        uri: &str,
        chunk: Value,
        context: Option<&AuthContext>,
    ) -> Result<bool, DbError> {
        self.require_connected().await?;
        let uri = self.abs(uri);
        let context = self.ctx(context);
        self.ensure_access(&uri, AccessLevel::Write, context).await?;

        match self.driver.append(&uri, chunk.clone()).await {
            Ok(result) => {
                self.data.remove(&uri);
                self.meta.remove(&uri);
                self.events.emit(&DbEvent::Change { uri });
                Ok(result)
            }
            Err(_) => {
                let existing = self.data.get(&uri).and_then(Cached::into_option);
                let merged = match (existing, &chunk) {
                    (Some(Value::String(mut text)), Value::String(addition)) => {
                        text.push_str(addition);
                        Value::String(text)
                    }
                    _ => chunk,
                };
                self.data.set(uri.clone(), Cached::Hit(merged));
                self.events.emit(&DbEvent::Change { uri });
                Ok(true)
            }
        }
    }

    /// Synchronizes cached entries whose cache timestamp is newer than the
    /// driver's stat mtime, writing them back. Returns the URIs saved.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Driver`] if a write fails.
    pub async fn push(&self, context: Option<&AuthContext>) -> Result<Vec<String>, DbError> {
        self.require_connected().await?;
        let context = self.ctx(context).clone();
        let mut saved = Vec::new();
        for uri in self.data.hit_keys() {
            let Some(set_at) = self.data.set_at_ms(&uri) else {
                continue;
            };
            let driver_mtime = self
                .driver
                .stat(&uri)
                .await
                .ok()
                .flatten()
                .map(|stat| stat.mtime_ms)
                .unwrap_or(0);
            if set_at > driver_mtime {
                if let Some(Cached::Hit(value)) = self.data.get(&uri) {
                    self.save_document(&uri, value, Some(&context)).await?;
                    saved.push(uri);
                }
            }
        }
        Ok(saved)
    }

    /// Lists the immediate children of `uri`: every `meta` key one depth
    /// below `uri`, sourced from the driver's own listing plus any
    /// cache-only entries (documents written via [`Db::set`] but never
    /// persisted through the driver).
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Auth`] on denied access.
    pub async fn list_dir(
        &self,
        uri: &str,
        context: Option<&AuthContext>,
    ) -> Result<Vec<DocumentEntry>, DbError> {
        self.require_connected().await?;
        let uri = self.abs(uri);
        let context = self.ctx(context);
        self.ensure_access(&uri, AccessLevel::Read, context).await?;

        let dir = if uri.ends_with('/') { uri.clone() } else { format!("{uri}/") };

        let mut by_path: HashMap<String, DocumentEntry> = HashMap::new();

        if let Ok(children) = self.driver.list_dir(&uri).await {
            for child in children {
                let child_uri = format!("{dir}{child}");
                let stat = self.driver.stat(&child_uri).await.ok().flatten().unwrap_or_default();
                by_path.insert(child_uri.clone(), DocumentEntry::from_path(&child_uri).with_stat(stat));
            }
        }

        for (key, stat) in self.meta.hit_entries() {
            if key != dir && path::dirname(&key) == dir {
                by_path.entry(key.clone()).or_insert_with(|| DocumentEntry::from_path(&key).with_stat(stat));
            }
        }

        let mut entries: Vec<DocumentEntry> = by_path.into_values().collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Walks `uri` down to `opts.depth` (or unbounded, for `-1`), yielding
    /// every matching [`DocumentEntry`] as an async sequence.
    pub fn read_dir<'a>(
        &'a self,
        uri: &'a str,
        opts: ReadDirOptions,
    ) -> Pin<Box<dyn Stream<Item = DocumentEntry> + Send + 'a>> {
        let root = self.abs(uri);
        Box::pin(stream! {
            let mut stack: Vec<(String, i64)> = vec![(root, opts.depth)];
            while let Some((dir, depth)) = stack.pop() {
                let context = opts.context.clone();
                let Ok(entries) = self.list_dir(&dir, context.as_ref()).await else {
                    continue;
                };
                for entry in entries {
                    if opts.skip_symbolic_link && entry.stat.is_symbolic_link {
                        continue;
                    }
                    if opts.skip_index && (index::is_index(&entry.path) || index::is_full_index(&entry.path)) {
                        continue;
                    }
                    if let Some(filter) = &opts.filter {
                        if !filter(&entry) {
                            continue;
                        }
                    }
                    let is_dir = entry.stat.is_directory;
                    if is_dir && (depth < 0 || depth > 0) {
                        stack.push((entry.path.clone(), if depth < 0 { -1 } else { depth - 1 }));
                    }
                    if !is_dir || opts.include_dirs {
                        yield entry;
                    }
                }
            }
        })
    }

    /// Convenience wrapper over [`Db::read_dir`] with a bare depth.
    pub fn read_branch<'a>(
        &'a self,
        uri: &'a str,
        depth: i64,
    ) -> Pin<Box<dyn Stream<Item = DocumentEntry> + Send + 'a>> {
        self.read_dir(
            uri,
            ReadDirOptions {
                depth,
                ..ReadDirOptions::default()
            },
        )
    }

    /// Either yields the exact URI if present (`target = Some(uri)`), or
    /// every URI under `root` for which `predicate` holds.
    pub async fn find(
        &self,
        root: &str,
        predicate: Option<&(dyn Fn(&str) -> bool + Sync)>,
    ) -> Vec<String> {
        use futures::StreamExt;

        let mut out = Vec::new();
        let mut entries = self.read_branch(root, -1);
        while let Some(entry) = entries.next().await {
            let matches = predicate.map_or(true, |predicate| predicate(&entry.path));
            if matches {
                out.push(entry.path);
            }
        }
        out
    }

    /// Walks `uri`, yielding a running [`StreamEntry`] snapshot after each
    /// newly discovered file.
    pub fn find_stream<'a>(
        &'a self,
        uri: &'a str,
        opts: FindStreamOptions,
    ) -> Pin<Box<dyn Stream<Item = StreamEntry> + Send + 'a>> {
        let root = self.abs(uri);
        Box::pin(stream! {
            use futures::StreamExt;

            let top_entries = self.list_dir(&root, opts.context.as_ref()).await.unwrap_or_default();
            let top: HashMap<String, DocumentEntry> = top_entries
                .iter()
                .map(|entry| (entry.path.clone(), entry.clone()))
                .collect();

            let mut files: Vec<DocumentEntry> = Vec::new();
            let mut dirs: HashMap<String, DocumentEntry> = HashMap::new();
            let errors: HashMap<String, String> = HashMap::new();
            let mut total_size: u64 = 0;

            let mut walk = self.read_dir(
                &root,
                ReadDirOptions {
                    depth: -1,
                    skip_stat: opts.skip_stat,
                    skip_symbolic_link: opts.skip_symbolic_link,
                    skip_index: true,
                    include_dirs: true,
                    filter: opts.filter.clone(),
                    context: opts.context.clone(),
                },
            );

            let mut seen_dirs = 0usize;
            while let Some(entry) = walk.next().await {
                if entry.stat.is_directory {
                    dirs.insert(entry.path.clone(), entry.clone());
                    seen_dirs += 1;
                    continue;
                }
                total_size += entry.stat.size;
                if opts.load {
                    let _ = self.load_document(&entry.path, None, opts.context.as_ref()).await;
                }
                files.push(entry.clone());

                if let Some(limit) = opts.limit {
                    if files.len() > limit {
                        break;
                    }
                }

                let progress = progress_ratio(seen_dirs, files.len(), top.len());

                yield StreamEntry {
                    file: entry,
                    files: sort_entries(files.clone(), opts.sort, opts.order),
                    dirs: dirs.clone(),
                    top: top.clone(),
                    errors: errors.clone(),
                    progress,
                    total_size,
                };
            }
        })
    }

    /// Returns a new `Db` holding the subtree under `uri`: every `data`/
    /// `meta` entry whose key starts with the normalized `uri + "/"`, with
    /// that prefix stripped. Does not inherit `driver` or attached `dbs`.
    #[must_use]
    pub fn extract(&self, uri: &str) -> Self {
        let uri = self.abs(uri);
        let prefix = if uri.ends_with('/') { uri.clone() } else { format!("{uri}/") };

        let mut predefined = HashMap::new();
        for key in self.data.hit_keys() {
            if let Some(rest) = key.strip_prefix(&prefix) {
                if let Some(Cached::Hit(value)) = self.data.get(&key) {
                    predefined.insert(format!("/{rest}"), value);
                }
            }
        }

        Self::new(
            Box::new(crate::drivers::MemoryDriver::new()),
            DbOptions {
                cwd: self.cwd.clone(),
                root: format!("{}{}", self.root.trim_end_matches('/'), prefix),
                ttl_ms: 0,
                context: self.context.clone(),
                predefined,
                inheritance_file: self.inheritance_file.clone(),
                data_extnames: self.data_extnames.clone(),
                label: format!("{}:extract:{uri}", self.label),
            },
        )
    }

    /// Attaches `db` as a fallback consulted when this DB misses on
    /// `fetch`.
    pub fn attach(&self, db: Arc<Db>) {
        self.dbs.write().push(db);
    }

    /// Detaches a previously attached fallback DB.
    pub fn detach(&self, db: &Arc<Db>) {
        self.dbs.write().retain(|existing| !Arc::ptr_eq(existing, db));
    }

    fn find_mount(&self, uri: &str) -> Option<(String, Arc<Db>)> {
        let mounts = self.mounts.read();
        mounts
            .iter()
            .filter(|(prefix, _)| uri.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(prefix, db)| (prefix.clone(), Arc::clone(db)))
    }

    fn sub_uri(&self, uri: &str, prefix: &str) -> String {
        let rest = uri.strip_prefix(prefix).unwrap_or(uri);
        if rest.starts_with('/') {
            rest.to_owned()
        } else {
            format!("/{rest}")
        }
    }

    /// Mounts `db` at `prefix`: operations under `prefix` are delegated to
    /// it instead of this DB's local cache.
    pub fn mount(&self, prefix: impl Into<String>, db: Arc<Db>) {
        self.mounts.write().push((prefix.into(), db));
    }

    /// Removes the mount at `prefix`, if any.
    pub fn unmount(&self, prefix: &str) {
        self.mounts.write().retain(|(existing, _)| existing != prefix);
    }

    /// Registers `factory` as the hydration model for every URI under
    /// `prefix`.
    pub fn model(&self, prefix: impl Into<String>, factory: Box<dyn model::ModelFactory>) {
        self.models.write().register(prefix, factory);
    }

    /// Registers a listener for `event`.
    pub fn on(&self, event: impl Into<String>, listener: Box<dyn Fn(&DbEvent) + Send + Sync>) {
        self.events.on(event, listener);
    }

    /// Emits `event` to every matching `on` and `watch` listener.
    pub fn emit(&self, event: &DbEvent) {
        self.events.emit(event);
    }

    /// Registers `listener` for every event under `prefix`. Returns a token
    /// accepted by [`Db::unwatch`].
    pub fn watch(
        &self,
        prefix: impl Into<String>,
        listener: Box<dyn Fn(&DbEvent) + Send + Sync>,
    ) -> usize {
        self.events.watch(prefix, listener)
    }

    /// Removes a watcher previously returned by [`Db::watch`].
    pub fn unwatch(&self, token: usize) {
        self.events.unwatch(token);
    }

    /// Resolves `uri` through the full fetch pipeline (inheritance,
    /// globals, `$ref` resolution), applying mount routing, attached-DB
    /// fallback, and model hydration.
    pub async fn fetch(
        &self,
        uri: &str,
        opts: Option<FetchOptions>,
        context: Option<&AuthContext>,
    ) -> Value {
        let abs_uri = self.abs(uri);
        let opts = opts.unwrap_or_else(|| FetchOptions {
            inheritance_file: self.inheritance_file.clone(),
            ..FetchOptions::default()
        });

        if let Some((prefix, mount)) = self.find_mount(&abs_uri) {
            let sub_uri = self.sub_uri(&abs_uri, &prefix);
            let value = Box::pin(mount.fetch(&sub_uri, Some(opts.clone()), context)).await;
            return self.models.read().hydrate(&abs_uri, value);
        }

        let value = fetch::fetch(self, &self.inheritance_cache, &abs_uri, &opts, context).await;
        if !value.is_null() {
            return self.models.read().hydrate(&abs_uri, value);
        }

        for fallback in self.dbs.read().iter() {
            let result = Box::pin(fallback.fetch(&abs_uri, Some(opts.clone()), context)).await;
            if !result.is_null() {
                self.events.emit(&DbEvent::Fallback {
                    uri: abs_uri.clone(),
                    from: self.label.clone(),
                    to: fallback.label.clone(),
                });
                return self.models.read().hydrate(&abs_uri, result);
            }
        }

        value
    }

    /// Wraps the fetched value at `uri` into a JSON-encoded (or raw string)
    /// byte buffer; missing documents yield an empty buffer.
    pub async fn fetch_stream(&self, uri: &str, context: Option<&AuthContext>) -> Vec<u8> {
        let value = self.fetch(uri, None, context).await;
        match value {
            Value::Null => Vec::new(),
            Value::String(text) => text.into_bytes(),
            other => serde_json::to_vec(&other).unwrap_or_default(),
        }
    }

    /// Batch variant of [`Db::get`].
    pub async fn get_all(
        &self,
        uris: &[String],
        context: Option<&AuthContext>,
    ) -> HashMap<String, Result<Value, DbError>> {
        let mut out = HashMap::new();
        for uri in uris {
            out.insert(uri.clone(), self.get(uri, None, context).await);
        }
        out
    }

    /// Batch variant of [`Db::set`].
    pub async fn set_all(
        &self,
        pairs: &[(String, Value)],
        context: Option<&AuthContext>,
    ) -> HashMap<String, Result<(), DbError>> {
        let mut out = HashMap::new();
        for (uri, value) in pairs {
            out.insert(uri.clone(), self.set(uri, value.clone(), context).await);
        }
        out
    }

    /// Validates `data` (or the stored document at `uri` when `data` is
    /// omitted) against the model registered for `uri`, if any.
    pub async fn validate(
        &self,
        uri: &str,
        data: Option<Value>,
        context: Option<&AuthContext>,
    ) -> Vec<ValidationIssue> {
        let abs_uri = self.abs(uri);
        let data = match data {
            Some(data) => data,
            None => self.get(&abs_uri, None, context).await.unwrap_or(Value::Null),
        };

        if !data.is_object() {
            return vec![ValidationIssue {
                field: "*".to_owned(),
                message: "expected an object document".to_owned(),
            }];
        }

        self.models
            .read()
            .validate_fields(&abs_uri, &data)
            .into_iter()
            .map(|(field, message)| ValidationIssue { field, message })
            .collect()
    }

    /// Reports whether `uri`'s extension (or lack of one) is recognised as
    /// a data file.
    #[must_use]
    pub fn is_data(&self, uri: &str) -> bool {
        let ext = path::extname(uri);
        ext.is_empty() || self.data_extnames.iter().any(|candidate| candidate == &ext)
    }
}

/// Monotonic-ish `[0, 1]` completion ratio for [`Db::find_stream`]: the
/// larger of directories-seen/files-yielded so far, over the top-level
/// child count captured at the start of the walk.
fn progress_ratio(seen_dirs: usize, files_seen: usize, top_count: usize) -> f64 {
    if top_count == 0 {
        return 1.0;
    }
    let numerator = u32::try_from(seen_dirs.max(files_seen)).unwrap_or(u32::MAX);
    let denominator = u32::try_from(top_count).unwrap_or(u32::MAX).max(1);
    #[allow(
        clippy::float_arithmetic,
        reason = "a fractional completion ratio has no integer-only equivalent"
    )]
    let ratio = f64::from(numerator) / f64::from(denominator);
    ratio.min(1.0)
}

fn sort_entries(mut entries: Vec<DocumentEntry>, sort: SortKey, order: SortOrder) -> Vec<DocumentEntry> {
    entries.sort_by(|a, b| {
        let ordering = match sort {
            SortKey::Name => a.name.cmp(&b.name),
            SortKey::Mtime => a.stat.mtime_ms.cmp(&b.stat.mtime_ms),
            SortKey::Size => a.stat.size.cmp(&b.stat.size),
        };
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
    entries
}

impl DocumentSource for Db {
    fn load_document<'a>(
        &'a self,
        uri: &'a str,
        context: Option<&'a AuthContext>,
    ) -> Pin<Box<dyn std::future::Future<Output = Option<Value>> + Send + 'a>> {
        Box::pin(async move {
            match self.load_document(uri, None, context).await {
                Ok(Value::Null) => None,
                Ok(value) => Some(value),
                Err(_) => None,
            }
        })
    }

    fn list_dir<'a>(
        &'a self,
        uri: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Vec<String>> + Send + 'a>> {
        Box::pin(async move {
            self.driver
                .list_dir(uri)
                .await
                .unwrap_or_default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MemoryDriver;
    use serde_json::json;

    fn memory_db() -> (Arc<MemoryDriver>, Db) {
        let driver = Arc::new(MemoryDriver::new());
        let db = Db::new(
            Box::new(MemoryDriverHandle(Arc::clone(&driver))),
            DbOptions::default(),
        );
        (driver, db)
    }

    /// Wraps an `Arc<MemoryDriver>` so the same backing store can be shared
    /// between a `Db` (which owns a `Box<dyn Driver>`) and the test's
    /// assertions.
    struct MemoryDriverHandle(Arc<MemoryDriver>);

    impl Driver for MemoryDriverHandle {
        fn inner(&self) -> Option<&dyn Driver> {
            Some(self.0.as_ref())
        }
    }

    #[tokio::test]
    async fn connect_seeds_predefined_documents() {
        let driver = MemoryDriver::new();
        let mut predefined = HashMap::new();
        predefined.insert("/a/b.json".to_owned(), json!({"x": 1}));
        let db = Db::new(
            Box::new(driver),
            DbOptions {
                predefined,
                ..DbOptions::default()
            },
        );
        db.connect().await.unwrap();
        let value = db.get("/a/b.json", None, None).await.unwrap();
        assert_eq!(value, json!({"x": 1}));
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let (_driver, db) = memory_db();
        db.connect().await.unwrap();
        db.set("/a.json", json!({"x": 1}), None).await.unwrap();
        let value = db.get("/a.json", None, None).await.unwrap();
        assert_eq!(value, json!({"x": 1}));
    }

    #[tokio::test]
    async fn save_document_persists_through_driver() {
        let (driver, db) = memory_db();
        db.connect().await.unwrap();
        db.save_document("/a.json", json!(1), None).await.unwrap();
        let stored = driver.read("/a.json").await.unwrap();
        assert_eq!(stored, Some(json!(1)));
    }

    #[tokio::test]
    async fn drop_document_removes_from_driver_and_cache() {
        let (driver, db) = memory_db();
        db.connect().await.unwrap();
        db.save_document("/a.json", json!(1), None).await.unwrap();
        assert!(db.drop_document("/a.json", None).await.unwrap());
        assert_eq!(driver.read("/a.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn move_document_relocates_value() {
        let (_driver, db) = memory_db();
        db.connect().await.unwrap();
        db.save_document("/a.json", json!(1), None).await.unwrap();
        assert!(db.move_document("/a.json", "/b.json", None).await.unwrap());
        let moved = db.get("/b.json", None, None).await.unwrap();
        assert_eq!(moved, json!(1));
    }

    #[tokio::test]
    async fn attach_falls_back_when_primary_misses() {
        let (_primary_driver, primary) = memory_db();
        primary.connect().await.unwrap();

        let (fallback_driver, _fallback_placeholder) = memory_db();
        fallback_driver.seed("/shared.json", json!({"k": "v"}));
        let fallback = Arc::new(Db::new(
            Box::new(MemoryDriverHandle(fallback_driver)),
            DbOptions {
                label: "fallback".to_owned(),
                ..DbOptions::default()
            },
        ));
        fallback.connect().await.unwrap();

        primary.attach(fallback);
        let value = primary.fetch("/shared.json", None, None).await;
        assert_eq!(value, json!({"k": "v"}));
    }

    #[tokio::test]
    async fn mount_routes_prefixed_uris_to_mounted_db() {
        let (_primary_driver, primary) = memory_db();
        primary.connect().await.unwrap();

        let (_mounted_driver, mounted) = memory_db();
        mounted.connect().await.unwrap();
        let mounted = Arc::new(mounted);
        primary.mount("/ext", Arc::clone(&mounted));

        primary.set("/ext/a.json", json!(42), None).await.unwrap();
        let value = mounted.get("/a.json", None, None).await.unwrap();
        assert_eq!(value, json!(42));
    }

    #[tokio::test]
    async fn is_data_recognises_configured_extensions_and_empty() {
        let (_driver, db) = memory_db();
        assert!(db.is_data("/a.json"));
        assert!(db.is_data("/a/"));
        assert!(!db.is_data("/a.bin"));
    }

    #[tokio::test]
    async fn model_hydrates_fetch_results_under_prefix() {
        let (_driver, db) = memory_db();
        db.connect().await.unwrap();
        db.save_document("/a/doc.json", json!({"title": "hi"}), None)
            .await
            .unwrap();
        db.model(
            "/a",
            Box::new(model::FnModel(|mut data: Value| {
                if let Value::Object(ref mut map) = data {
                    map.insert("hydrated".to_owned(), json!(true));
                }
                data
            })),
        );
        let value = db.fetch("/a/doc.json", None, None).await;
        assert_eq!(value, json!({"title": "hi", "hydrated": true}));
    }

    #[tokio::test]
    async fn on_emits_save_event_after_save_document() {
        let (_driver, db) = memory_db();
        db.connect().await.unwrap();
        let seen = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seen_clone = Arc::clone(&seen);
        db.on(
            "save",
            Box::new(move |_event| {
                seen_clone.store(true, Ordering::SeqCst);
            }),
        );
        db.save_document("/a.json", json!(1), None).await.unwrap();
        assert!(seen.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn mount_longest_prefix_wins_over_overlapping_mount() {
        let (_primary_driver, primary) = memory_db();
        primary.connect().await.unwrap();

        let (_outer_driver, outer) = memory_db();
        outer.connect().await.unwrap();
        let outer = Arc::new(outer);

        let (_inner_driver, inner) = memory_db();
        inner.connect().await.unwrap();
        let inner = Arc::new(inner);

        primary.mount("/ext", Arc::clone(&outer));
        primary.mount("/ext/deep", Arc::clone(&inner));

        primary.set("/ext/deep/a.json", json!("inner"), None).await.unwrap();
        primary.set("/ext/b.json", json!("outer"), None).await.unwrap();

        assert_eq!(inner.get("/a.json", None, None).await.unwrap(), json!("inner"));
        assert_eq!(outer.get("/b.json", None, None).await.unwrap(), json!("outer"));
        assert_eq!(outer.get("/deep/a.json", None, None).await.unwrap(), Value::Null);
    }

    struct DenyAllDriver(Arc<MemoryDriver>);

    impl Driver for DenyAllDriver {
        fn inner(&self) -> Option<&dyn crate::driver::Driver> {
            Some(self.0.as_ref())
        }

        fn access<'a>(
            &'a self,
            _uri: &'a str,
            _level: AccessLevel,
            _context: &'a AuthContext,
        ) -> crate::driver::DriverFuture<'a, Option<bool>> {
            Box::pin(async { Some(false) })
        }
    }

    #[tokio::test]
    async fn write_is_denied_when_driver_access_refuses() {
        let driver = Arc::new(MemoryDriver::new());
        let db = Db::new(Box::new(DenyAllDriver(driver)), DbOptions::default());
        db.connect().await.unwrap();
        let err = db.save_document("/a.json", json!(1), None).await.unwrap_err();
        assert!(matches!(err, DbError::Auth(AuthError::AccessDenied { .. })));
    }

    #[tokio::test]
    async fn validate_reports_schema_type_mismatches() {
        let (_driver, db) = memory_db();
        db.connect().await.unwrap();
        db.model(
            "/users",
            Box::new({
                struct UserModel;
                impl model::ModelFactory for UserModel {
                    fn hydrate(&self, data: Value) -> Value {
                        data
                    }
                    fn schema(&self) -> &[model::FieldSchema] {
                        static FIELDS: std::sync::OnceLock<Vec<model::FieldSchema>> =
                            std::sync::OnceLock::new();
                        FIELDS.get_or_init(|| {
                            vec![model::FieldSchema::new("age", model::FieldType::Number)]
                        })
                    }
                }
                UserModel
            }),
        );
        let issues = db
            .validate("/users/1", Some(json!({"age": "old"})), None)
            .await;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "age");
    }

    #[tokio::test]
    async fn validate_flags_non_object_data() {
        let (_driver, db) = memory_db();
        db.connect().await.unwrap();
        let issues = db.validate("/a.json", Some(json!([1, 2])), None).await;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "*");
    }
}
