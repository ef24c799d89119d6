//! The fetch pipeline: `fetch` → `fetch_merged` → inheritance / globals /
//! reference resolution, all built over a minimal [`DocumentSource`] seam
//! so this module stays independent of the DB engine's caching concerns.

use std::collections::HashSet;
use std::pin::Pin;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use crate::auth::AuthContext;
use crate::path;
use crate::shape::{self, FlatMap};

/// Data file extensions recognised by default, in probe order.
pub const DATA_EXTNAMES: [&str; 7] = [".json", ".yaml", ".yml", ".nano", ".html", ".xml", ".md"];
/// The reserved inheritance filename (`Directory.FILE` in the source
/// terminology), configurable per engine instance via [`FetchOptions`].
pub const DEFAULT_INHERITANCE_FILE: &str = "_";
/// The reserved globals directory name.
pub const GLOBALS_DIR: &str = "_";

/// A minimal read/list capability the fetch pipeline needs from whatever
/// holds the actual documents (normally [`crate::db::Db`]).
pub trait DocumentSource: Send + Sync {
    /// Loads the raw (already-merged-with-nothing) document at `uri`.
    fn load_document<'a>(
        &'a self,
        uri: &'a str,
        context: Option<&'a AuthContext>,
    ) -> Pin<Box<dyn std::future::Future<Output = Option<Value>> + Send + 'a>>;

    /// Lists the immediate children of the directory at `uri`, as bare
    /// names (directories carry a trailing `/`).
    fn list_dir<'a>(
        &'a self,
        uri: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Vec<String>> + Send + 'a>>;
}

/// Options controlling a single [`fetch`] call.
#[derive(Clone, Debug)]
pub struct FetchOptions {
    /// Merge in `_`-file inheritance from ancestor directories.
    pub inherit: bool,
    /// Merge in `_/`-directory globals.
    pub globals: bool,
    /// Resolve `$ref` references.
    pub refs: bool,
    /// Allow falling back to directory-index resolution when `uri` has no
    /// extension.
    pub allow_dirs: bool,
    /// Value returned when nothing can be resolved.
    pub default_value: Value,
    /// The inheritance filename to use instead of [`DEFAULT_INHERITANCE_FILE`].
    pub inheritance_file: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            inherit: true,
            globals: true,
            refs: true,
            allow_dirs: true,
            default_value: Value::Null,
            inheritance_file: DEFAULT_INHERITANCE_FILE.to_owned(),
        }
    }
}

/// Caches ordered-merge inheritance results per directory key, since the
/// specification calls for a lazily-populated, idempotent-on-double-fill
/// cache per engine instance.
#[derive(Default)]
pub struct InheritanceCache {
    entries: Mutex<std::collections::HashMap<String, Value>>,
}

impl InheritanceCache {
    /// Builds an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().get(key).cloned()
    }

    fn put(&self, key: String, value: Value) {
        self.entries.lock().insert(key, value);
    }
}

/// Resolves `uri` through the full fetch pipeline.
pub async fn fetch(
    source: &dyn DocumentSource,
    cache: &InheritanceCache,
    uri: &str,
    opts: &FetchOptions,
    context: Option<&AuthContext>,
) -> Value {
    let normalized = path::normalize(&[uri]);
    let ext = path::extname(&normalized);

    if ext.is_empty() {
        if opts.allow_dirs && normalized.ends_with('/') {
            for candidate_ext in DATA_EXTNAMES {
                let candidate = format!("{normalized}index{candidate_ext}");
                if source.load_document(&candidate, context).await.is_some() {
                    return fetch_merged(source, cache, &candidate, opts, context, HashSet::new())
                        .await;
                }
            }
        } else {
            for candidate_ext in DATA_EXTNAMES {
                let candidate = format!("{normalized}{candidate_ext}");
                if source.load_document(&candidate, context).await.is_some() {
                    return fetch_merged(source, cache, &candidate, opts, context, HashSet::new())
                        .await;
                }
            }
        }

        if opts.allow_dirs {
            for candidate_ext in DATA_EXTNAMES {
                let candidate = format!("{normalized}/index{candidate_ext}");
                if source.load_document(&candidate, context).await.is_some() {
                    return fetch_merged(source, cache, &candidate, opts, context, HashSet::new())
                        .await;
                }
            }
            let children = source.list_dir(&normalized).await;
            if !children.is_empty() {
                return Value::Array(children.into_iter().map(Value::String).collect());
            }
        }

        return opts.default_value.clone();
    }

    if !DATA_EXTNAMES.contains(&ext.as_str()) {
        return source
            .load_document(&normalized, context)
            .await
            .unwrap_or_else(|| opts.default_value.clone());
    }

    fetch_merged(source, cache, &normalized, opts, context, HashSet::new()).await
}

/// Loads `uri`, merges in inheritance/globals/references, and returns the
/// fully resolved document. `visited` carries cycle protection and is
/// cloned, never shared mutably, across recursive calls.
pub fn fetch_merged<'a>(
    source: &'a dyn DocumentSource,
    cache: &'a InheritanceCache,
    uri: &'a str,
    opts: &'a FetchOptions,
    context: Option<&'a AuthContext>,
    visited: HashSet<String>,
) -> Pin<Box<dyn std::future::Future<Output = Value> + Send + 'a>> {
    Box::pin(async move {
        if visited.contains(uri) {
            return opts.default_value.clone();
        }
        let mut next_visited = visited;
        next_visited.insert(uri.to_owned());

        let Some(mut data) = source.load_document(uri, context).await else {
            return opts.default_value.clone();
        };

        let is_mergeable_object = matches!(&data, Value::Object(_));

        if opts.inherit && is_mergeable_object {
            let inherited = get_inheritance(source, cache, uri, &opts.inheritance_file).await;
            data = shape::merge(&inherited, &data);
        }

        if opts.globals && matches!(&data, Value::Object(_)) {
            let globals = get_globals(source, uri, context).await;
            data = shape::merge(&globals, &data);
        }

        if opts.refs && matches!(&data, Value::Object(_)) {
            data = resolve_references(source, cache, data, uri, opts, context, next_visited).await;
        }

        data
    })
}

/// Ordered merge of the root `_` file and each ancestor directory's `_`
/// file, cached per directory key. Deeper directories win.
pub async fn get_inheritance(
    source: &dyn DocumentSource,
    cache: &InheritanceCache,
    path_uri: &str,
    inheritance_file: &str,
) -> Value {
    let dir = path::dirname(path_uri);
    if let Some(cached) = cache.get(&dir) {
        return cached;
    }

    let suffix = format!("/{inheritance_file}");
    let parents = absolutize_ancestors(shape::get_path_parents(path_uri, &suffix, false));
    let mut merged = Value::Object(serde_json::Map::new());
    for parent_uri in parents {
        if let Some(value) = source.load_document(&parent_uri, None).await {
            if matches!(&value, Value::Object(_)) {
                merged = shape::merge(&merged, &value);
            }
        }
    }

    cache.put(dir, merged.clone());
    merged
}

/// For each ancestor directory's `_/` globals directory, loads every file
/// entry keyed by basename-without-extension. Deeper directories' globals
/// win.
pub async fn get_globals(
    source: &dyn DocumentSource,
    path_uri: &str,
    context: Option<&AuthContext>,
) -> Value {
    let globals_suffix = format!("/{GLOBALS_DIR}/");
    let ancestors = absolutize_ancestors(shape::get_path_parents(path_uri, &globals_suffix, false));

    let mut merged = Value::Object(serde_json::Map::new());
    for globals_dir in ancestors {
        let children = source.list_dir(&globals_dir).await;
        let mut dir_globals = serde_json::Map::new();
        for child in children {
            if child.ends_with('/') {
                continue;
            }
            let file_uri = format!("{globals_dir}{child}");
            if let Some(value) = source.load_document(&file_uri, context).await {
                let key = path::basename(&child, Some(&path::BasenameSuffix::Extension));
                dir_globals.insert(key, value);
            }
        }
        merged = shape::merge(&merged, &Value::Object(dir_globals));
    }

    merged
}

/// Extracts a reference target from `value`.
///
/// A key literally named `$ref` (or ending `/$ref`, its flattened form)
/// carries its target as a bare path; a scalar ref embedded in an
/// ordinary field is prefixed `$ref:` to distinguish it from a plain
/// string value. `is_ref_key` selects which rule applies.
fn reference_target(value: &Value, is_ref_key: bool) -> Option<String> {
    match value {
        Value::String(text) if is_ref_key => Some(text.clone()),
        Value::String(text) => text.strip_prefix("$ref:").map(ToOwned::to_owned),
        Value::Object(obj) => obj
            .get("$ref")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        _ => None,
    }
}

fn split_fragment(target: &str) -> (&str, Option<&str>) {
    match target.split_once('#') {
        Some((file, fragment)) => (file, Some(fragment)),
        None => (target, None),
    }
}

/// Resolves every `$ref` reference found in `data`, recursing into
/// referenced documents via [`fetch_merged`]. Resolution failures are
/// swallowed with a [`tracing::warn!`] and the offending value is kept
/// verbatim, per the specification's read-path error policy.
pub async fn resolve_references(
    source: &dyn DocumentSource,
    cache: &InheritanceCache,
    data: Value,
    base_path: &str,
    opts: &FetchOptions,
    context: Option<&AuthContext>,
    visited: HashSet<String>,
) -> Value {
    let flat = shape::flatten(&data);
    let base_dir = path::dirname(base_path);

    let mut reference_keys: Vec<String> = flat
        .iter()
        .filter(|(key, value)| {
            key.ends_with("/$ref") || key.as_str() == "$ref" || is_scalar_ref(value)
        })
        .map(|(key, _)| key.clone())
        .collect();
    reference_keys.sort();

    let mut result: FlatMap = flat.clone();

    for key in reference_keys {
        let Some(raw_value) = flat.get(&key) else {
            continue;
        };
        let is_ref_key = key.ends_with("/$ref") || key.as_str() == "$ref";
        let Some(target) = reference_target(raw_value, is_ref_key) else {
            continue;
        };

        let (file_part, fragment) = split_fragment(&target);
        let abs_path = if path::is_absolute(file_part) {
            file_part.to_owned()
        } else {
            path::normalize(&[&base_dir, file_part])
        };

        if abs_path == base_path || visited.contains(&abs_path) {
            continue;
        }

        let resolved = if let Some(fragment_path) = fragment {
            match source.load_document(&abs_path, context).await {
                Some(doc) => shape::find(fragment_path, &doc).cloned(),
                None => None,
            }
        } else {
            Some(
                fetch_merged(
                    source,
                    cache,
                    &abs_path,
                    opts,
                    context,
                    visited.clone(),
                )
                .await,
            )
        };

        let Some(resolved) = resolved else {
            warn!(uri = %abs_path, key = %key, "unresolved $ref target, keeping literal value");
            continue;
        };

        let parent_key = key.strip_suffix("/$ref").unwrap_or("").to_owned();

        if parent_key.is_empty() && key == "$ref" {
            result.remove(&key);
            if let Value::Object(obj) = &resolved {
                for (prop, value) in obj {
                    result.insert(prop.clone(), value.clone());
                }
            }
            continue;
        }

        let siblings = shape::flat_siblings(&result, &key, Some(&parent_key));
        if !siblings.is_empty() {
            let sibling_pairs: Vec<(String, Value)> = siblings
                .iter()
                .map(|(sibling_key, sibling_value)| {
                    let relative = sibling_key
                        .strip_prefix(&parent_key)
                        .and_then(|rest| rest.strip_prefix('/'))
                        .unwrap_or(sibling_key);
                    (relative.to_owned(), sibling_value.clone())
                })
                .collect();
            let resolved_pairs: Vec<(String, Value)> = match &resolved {
                Value::Object(obj) => obj
                    .iter()
                    .map(|(prop, value)| (prop.clone(), value.clone()))
                    .collect(),
                other => vec![("value".to_owned(), other.clone())],
            };
            let merged_pairs = shape::merge_flat(&resolved_pairs, &sibling_pairs, "$ref");
            for (sibling_key, _) in &siblings {
                result.remove(sibling_key);
            }
            result.remove(&key);
            for (prop, value) in merged_pairs {
                let full_key = if parent_key.is_empty() {
                    prop
                } else {
                    format!("{parent_key}/{prop}")
                };
                result.insert(full_key, value);
            }
        } else {
            result.remove(&key);
            let target_key = if parent_key.is_empty() { key.clone() } else { parent_key.clone() };
            result.insert(target_key, resolved);
        }
    }

    shape::unflatten(&result)
}

/// [`shape::get_path_parents`] is path-style-agnostic (it only joins
/// segments); absolute engine URIs always carry a leading `/`, which this
/// restores on every ancestor entry that lacks one.
fn absolutize_ancestors(ancestors: Vec<String>) -> Vec<String> {
    ancestors
        .into_iter()
        .map(|entry| {
            if entry.starts_with('/') {
                entry
            } else {
                format!("/{entry}")
            }
        })
        .collect()
}

fn is_scalar_ref(value: &Value) -> bool {
    matches!(value, Value::String(text) if text.starts_with("$ref:"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock as ParkingRwLock;
    use serde_json::json;
    use std::collections::HashMap;

    struct FakeSource {
        docs: ParkingRwLock<HashMap<String, Value>>,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                docs: ParkingRwLock::new(HashMap::new()),
            }
        }

        fn put(&self, uri: &str, value: Value) {
            self.docs.write().insert(uri.to_owned(), value);
        }
    }

    impl DocumentSource for FakeSource {
        fn load_document<'a>(
            &'a self,
            uri: &'a str,
            _context: Option<&'a AuthContext>,
        ) -> Pin<Box<dyn std::future::Future<Output = Option<Value>> + Send + 'a>> {
            let value = self.docs.read().get(uri).cloned();
            Box::pin(async move { value })
        }

        fn list_dir<'a>(
            &'a self,
            uri: &'a str,
        ) -> Pin<Box<dyn std::future::Future<Output = Vec<String>> + Send + 'a>> {
            let prefix = uri.to_owned();
            let docs = self.docs.read();
            let mut names: Vec<String> = docs
                .keys()
                .filter_map(|key| {
                    let rest = key.strip_prefix(&prefix)?;
                    (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_owned())
                })
                .collect();
            names.sort();
            Box::pin(async move { names })
        }
    }

    #[tokio::test]
    async fn fetch_merged_applies_inheritance_under_document() {
        let source = FakeSource::new();
        source.put("/_", json!({"theme": "dark", "owner": "root"}));
        source.put("/a/_", json!({"owner": "team"}));
        source.put("/a/doc.json", json!({"title": "hello"}));

        let cache = InheritanceCache::new();
        let opts = FetchOptions {
            globals: false,
            refs: false,
            ..FetchOptions::default()
        };
        let result = fetch_merged(&source, &cache, "/a/doc.json", &opts, None, HashSet::new())
            .await;
        assert_eq!(
            result,
            json!({"theme": "dark", "owner": "team", "title": "hello"})
        );
    }

    #[tokio::test]
    async fn resolve_references_splices_ref_object_siblings() {
        let source = FakeSource::new();
        source.put("/shared.json", json!({"value": "base", "extra": 1}));
        source.put(
            "/doc.json",
            json!({"key": {"$ref": "shared.json", "value": "override"}}),
        );

        let cache = InheritanceCache::new();
        let opts = FetchOptions {
            inherit: false,
            globals: false,
            ..FetchOptions::default()
        };
        let result = fetch_merged(&source, &cache, "/doc.json", &opts, None, HashSet::new())
            .await;
        assert_eq!(
            result,
            json!({"key": {"value": "override", "extra": 1}})
        );
    }

    #[tokio::test]
    async fn resolve_references_keeps_unresolvable_ref_verbatim() {
        let source = FakeSource::new();
        source.put("/doc.json", json!({"$ref": "missing.json"}));

        let cache = InheritanceCache::new();
        let opts = FetchOptions {
            inherit: false,
            globals: false,
            ..FetchOptions::default()
        };
        let result = fetch_merged(&source, &cache, "/doc.json", &opts, None, HashSet::new())
            .await;
        assert_eq!(result, json!({"$ref": "missing.json"}));
    }

    #[tokio::test]
    async fn fetch_merged_breaks_cycles_via_visited_set() {
        let source = FakeSource::new();
        source.put("/a.json", json!({"$ref": "b.json"}));
        source.put("/b.json", json!({"$ref": "a.json"}));

        let cache = InheritanceCache::new();
        let opts = FetchOptions {
            inherit: false,
            globals: false,
            ..FetchOptions::default()
        };
        let result = fetch_merged(&source, &cache, "/a.json", &opts, None, HashSet::new())
            .await;
        // Cycle resolves to Null (default_value) somewhere in the chain
        // rather than looping forever.
        assert!(result.is_object() || result.is_null());
    }
}
