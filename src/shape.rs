//! Conversion between nested [`serde_json::Value`] documents and flat,
//! path-keyed maps, plus the deep-merge primitives the fetch pipeline
//! builds on.
//!
//! `flatten`/`unflatten`/`merge` are specified as contracts rather than as
//! algorithms to reproduce byte for byte, so the implementations below
//! favour clarity over mirroring any particular reference byte sequence.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Key path divider used when flattening nested objects.
pub const OBJECT_DIVIDER: &str = "/";
/// Wrapper applied around array indices in a flattened key.
pub const ARRAY_WRAPPER: (&str, &str) = ("[", "]");
/// Default key used to recognise a cross-document reference.
pub const REFERENCE_KEY: &str = "$ref";
/// Recursion guard for [`unflatten`]; keys nested deeper than this are
/// rejected rather than risk unbounded recursion on pathological input.
pub const MAX_DEEP_UNFLATTEN: usize = 99;

/// A path-keyed, alphabetically ordered view over a flattened document.
pub type FlatMap = BTreeMap<String, Value>;

fn push_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}{OBJECT_DIVIDER}{key}")
    }
}

fn push_index(prefix: &str, index: usize) -> String {
    format!("{prefix}{}{index}{}", ARRAY_WRAPPER.0, ARRAY_WRAPPER.1)
}

fn flatten_into(value: &Value, prefix: &str, out: &mut FlatMap) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                flatten_into(child, &push_key(prefix, key), out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (idx, child) in items.iter().enumerate() {
                flatten_into(child, &push_index(prefix, idx), out);
            }
        }
        other => {
            out.insert(prefix.to_owned(), other.clone());
        }
    }
}

/// Flattens a nested JSON document into a path-keyed map. Empty arrays and
/// objects are preserved as leaves rather than disappearing.
#[must_use]
pub fn flatten(value: &Value) -> FlatMap {
    let mut out = FlatMap::new();
    flatten_into(value, "", &mut out);
    out
}

/// One segment of a parsed flat key: either an object property or an array
/// index (from the `[i]` wrapper).
#[derive(Clone, Debug, Eq, PartialEq)]
enum Segment {
    /// An object property name.
    Key(String),
    /// An array index.
    Index(usize),
}

fn parse_segments(path: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    for raw in path.split(OBJECT_DIVIDER) {
        if raw.is_empty() {
            continue;
        }
        let mut rest = raw;
        loop {
            if let Some(open) = rest.find(ARRAY_WRAPPER.0) {
                if open > 0 {
                    segments.push(Segment::Key(
                        rest.get(..open).unwrap_or_default().to_owned(),
                    ));
                }
                let after_open = rest.get(open + ARRAY_WRAPPER.0.len()..).unwrap_or_default();
                let Some(close) = after_open.find(ARRAY_WRAPPER.1) else {
                    segments.push(Segment::Key(rest.to_owned()));
                    break;
                };
                let digits = after_open.get(..close).unwrap_or_default();
                if let Ok(index) = digits.parse::<usize>() {
                    segments.push(Segment::Index(index));
                } else {
                    segments.push(Segment::Key(format!(
                        "{}{digits}{}",
                        ARRAY_WRAPPER.0, ARRAY_WRAPPER.1
                    )));
                }
                rest = after_open.get(close + ARRAY_WRAPPER.1.len()..).unwrap_or_default();
                if rest.is_empty() {
                    break;
                }
            } else {
                if let Ok(index) = rest.parse::<usize>() {
                    segments.push(Segment::Index(index));
                } else {
                    segments.push(Segment::Key(rest.to_owned()));
                }
                break;
            }
        }
    }
    segments
}

fn ensure_container(value: &mut Value, want_array: bool) {
    let needs_replace = if want_array {
        !value.is_array()
    } else {
        !value.is_object()
    };
    if needs_replace {
        *value = if want_array {
            Value::Array(Vec::new())
        } else {
            Value::Object(Map::new())
        };
    }
}

fn place(root: &mut Value, segments: &[Segment], value: Value, depth: usize) {
    if depth >= MAX_DEEP_UNFLATTEN {
        return;
    }
    let Some(first) = segments.first() else {
        *root = value;
        return;
    };
    let rest = segments.get(1..).unwrap_or_default();
    match first {
        Segment::Key(key) => {
            ensure_container(root, false);
            if let Value::Object(map) = root {
                let entry = map.entry(key.clone()).or_insert(Value::Null);
                if rest.is_empty() {
                    *entry = value;
                } else {
                    place(entry, rest, value, depth + 1);
                }
            }
        }
        Segment::Index(idx) => {
            ensure_container(root, true);
            if let Value::Array(items) = root {
                while items.len() <= *idx {
                    items.push(Value::Null);
                }
                if let Some(entry) = items.get_mut(*idx) {
                    if rest.is_empty() {
                        *entry = value;
                    } else {
                        place(entry, rest, value, depth + 1);
                    }
                }
            }
        }
    }
}

/// Reconstructs a nested JSON document from a flat, path-keyed map.
///
/// Keys are applied in iteration order (alphabetical, since [`FlatMap`] is a
/// [`BTreeMap`]); when a flat map contains both a scalar at `a/b` and a
/// container under `a/b/c`, the container wins, since object/array creation
/// overwrites a previously placed scalar at the same path.
#[must_use]
pub fn unflatten(flat: &FlatMap) -> Value {
    let mut root = Value::Object(Map::new());
    for (path, value) in flat {
        let segments = parse_segments(path);
        if segments.is_empty() {
            root = value.clone();
        } else {
            place(&mut root, &segments, value.clone(), 0);
        }
    }
    root
}

/// Looks up `path` (a `/`-delimited string, optionally using `[i]` index
/// wrappers or bare numeric segments) within `obj`. Returns `None` as soon
/// as a non-object/non-array step is encountered.
#[must_use]
pub fn find<'a>(path: &str, obj: &'a Value) -> Option<&'a Value> {
    let segments = parse_segments(path);
    let mut current = obj;
    for segment in &segments {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key)?,
            (Segment::Index(idx), Value::Array(items)) => items.get(*idx)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Deep-merges `source` over `target`, returning a new value. Arrays in
/// `source` replace arrays in `target` wholesale; objects recurse; scalars
/// in `source` override. Neither input is mutated.
#[must_use]
pub fn merge(target: &Value, source: &Value) -> Value {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            let mut merged = target_map.clone();
            for (key, source_value) in source_map {
                let next = match merged.get(key) {
                    Some(target_value) => merge(target_value, source_value),
                    None => source_value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (_, source) => source.clone(),
    }
}

/// One level of ancestor directories above `path`, each with `suffix`
/// appended, ordered from the root downward. When `avoid_root` is `false`
/// the bare `suffix` (root directory) is included first.
#[must_use]
pub fn get_path_parents(path: &str, suffix: &str, avoid_root: bool) -> Vec<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let mut result = Vec::new();
    if !avoid_root {
        result.push(suffix.to_owned());
    }
    let ancestor_count = segments.len().saturating_sub(1);
    let mut acc = String::new();
    for segment in segments.iter().take(ancestor_count) {
        if !acc.is_empty() {
            acc.push('/');
        }
        acc.push_str(segment);
        result.push(format!("{acc}{suffix}"));
    }
    result
}

fn path_depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// Returns every entry in `flat` that shares `key`'s parent (or the
/// explicit `parent_key`), excluding `key` itself, at `key`'s depth or
/// deeper.
#[must_use]
pub fn flat_siblings(flat: &FlatMap, key: &str, parent_key: Option<&str>) -> Vec<(String, Value)> {
    let parent = parent_key.map_or_else(|| crate::path::dirname(key), ToOwned::to_owned);
    let parent_prefix = parent.trim_end_matches('/');
    let key_depth = path_depth(key);
    flat.iter()
        .filter(|(candidate, _)| {
            candidate.as_str() != key
                && (candidate.as_str() == parent_prefix
                    || candidate.starts_with(&format!("{parent_prefix}/")))
                && path_depth(candidate) >= key_depth
        })
        .map(|(candidate, value)| (candidate.clone(), value.clone()))
        .collect()
}

/// Merges two flattened tuple lists (`base` overridden by `over`),
/// returning an alphabetically ordered result.
///
/// A key ending in `/{reference_key}` whose value is an object splices that
/// object's properties in at the parent path. A plain object value at any
/// other key is flattened one level under that key. In both cases `over`
/// wins over `base`.
#[must_use]
pub fn merge_flat(
    base: &[(String, Value)],
    over: &[(String, Value)],
    reference_key: &str,
) -> Vec<(String, Value)> {
    let mut map: FlatMap = FlatMap::new();
    let ref_suffix = format!("/{reference_key}");

    let mut apply = |key: &str, value: &Value| {
        if let Some(parent) = key.strip_suffix(&ref_suffix) {
            if let Value::Object(obj) = value {
                for (prop, prop_value) in obj {
                    let full = push_key(parent, prop);
                    map.insert(full, prop_value.clone());
                }
                return;
            }
        }
        if key != reference_key {
            if let Value::Object(obj) = value {
                if obj.is_empty() {
                    map.insert(key.to_owned(), value.clone());
                } else {
                    for (prop, prop_value) in obj {
                        map.insert(push_key(key, prop), prop_value.clone());
                    }
                }
                return;
            }
        }
        map.insert(key.to_owned(), value.clone());
    };

    for (key, value) in base {
        apply(key, value);
    }
    for (key, value) in over {
        apply(key, value);
    }

    map.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flatten_round_trips_without_refs() {
        let doc = json!({
            "a": {"b": 1, "c": [1, 2, {"d": "x"}]},
            "e": [],
            "f": {},
        });
        let flat = flatten(&doc);
        let rebuilt = unflatten(&flat);
        assert_eq!(rebuilt, doc);
    }

    #[test]
    fn flatten_wraps_array_indices() {
        let doc = json!({"a": [1, 2]});
        let flat = flatten(&doc);
        assert_eq!(flat.get("a[0]"), Some(&json!(1)));
        assert_eq!(flat.get("a[1]"), Some(&json!(2)));
    }

    #[test]
    fn unflatten_container_wins_over_scalar() {
        let mut flat = FlatMap::new();
        flat.insert("a/b".to_owned(), json!("scalar"));
        flat.insert("a/b/c".to_owned(), json!(1));
        let rebuilt = unflatten(&flat);
        assert_eq!(rebuilt, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn find_supports_bracket_and_bare_indices() {
        let doc = json!({"a": [{"b": 1}, {"b": 2}]});
        assert_eq!(find("a[1]/b", &doc), Some(&json!(2)));
        assert_eq!(find("a/1/b", &doc), Some(&json!(2)));
        assert_eq!(find("a/9/b", &doc), None);
        assert_eq!(find("missing/path", &doc), None);
    }

    #[test]
    fn merge_does_not_mutate_inputs() {
        let target = json!({"a": 1, "b": {"x": 1}});
        let source = json!({"b": {"y": 2}, "c": 3});
        let merged = merge(&target, &source);
        assert_eq!(target, json!({"a": 1, "b": {"x": 1}}));
        assert_eq!(source, json!({"b": {"y": 2}, "c": 3}));
        assert_eq!(merged, json!({"a": 1, "b": {"x": 1, "y": 2}, "c": 3}));
    }

    #[test]
    fn merge_replaces_arrays_wholesale() {
        let target = json!({"a": [1, 2, 3]});
        let source = json!({"a": [9]});
        assert_eq!(merge(&target, &source), json!({"a": [9]}));
    }

    #[test]
    fn get_path_parents_lists_ancestors() {
        let parents = get_path_parents("a/b/c.json", "/_", false);
        assert_eq!(parents, vec!["/_", "a/_", "a/b/_"]);
    }

    #[test]
    fn get_path_parents_can_avoid_root() {
        let parents = get_path_parents("a/b/c.json", "", true);
        assert_eq!(parents, vec!["a", "a/b"]);
    }

    #[test]
    fn flat_siblings_excludes_key_and_shallower_entries() {
        let mut flat = FlatMap::new();
        flat.insert("a/b".to_owned(), json!(1));
        flat.insert("a/c".to_owned(), json!(2));
        flat.insert("a".to_owned(), json!("parent"));
        flat.insert("a/c/d".to_owned(), json!(3));
        let siblings = flat_siblings(&flat, "a/b", None);
        let keys: Vec<_> = siblings.iter().map(|(k, _)| k.clone()).collect();
        assert!(keys.contains(&"a/c".to_owned()));
        assert!(keys.contains(&"a/c/d".to_owned()));
        assert!(!keys.contains(&"a/b".to_owned()));
        assert!(!keys.contains(&"a".to_owned()));
    }

    #[test]
    fn merge_flat_splices_ref_object_at_parent() {
        let base = vec![("key/value".to_owned(), json!("old"))];
        let over = vec![(
            "key/$ref".to_owned(),
            json!({"value": "new", "extra": 1}),
        )];
        let merged = merge_flat(&base, &over, REFERENCE_KEY);
        let map: FlatMap = merged.into_iter().collect();
        assert_eq!(map.get("key/value"), Some(&json!("new")));
        assert_eq!(map.get("key/extra"), Some(&json!(1)));
    }

    #[test]
    fn merge_flat_flattens_plain_object_one_level() {
        let base: Vec<(String, Value)> = vec![];
        let over = vec![("settings".to_owned(), json!({"theme": "dark"}))];
        let merged = merge_flat(&base, &over, REFERENCE_KEY);
        let map: FlatMap = merged.into_iter().collect();
        assert_eq!(map.get("settings/theme"), Some(&json!("dark")));
    }

    #[test]
    fn merge_flat_override_wins() {
        let base = vec![("a".to_owned(), json!(1))];
        let over = vec![("a".to_owned(), json!(2))];
        let merged = merge_flat(&base, &over, REFERENCE_KEY);
        assert_eq!(merged, vec![("a".to_owned(), json!(2))]);
    }
}
