//! Directory index encode/decode and update-list computation.
//!
//! Every directory may carry two sibling artifacts: `index.txt` (immediate
//! children only) and `index.txtl` (a whole-tree dump from that directory
//! downward). Both share the same row encoding; `index.txtl` additionally
//! allows an `inc` (incremental, directory-grouped) layout.

use std::collections::HashSet;

use thiserror::Error;

use crate::path;
use crate::stat::{DocumentEntry, EntryKind};

/// The immediate-children index filename.
pub const INDEX_FILE: &str = "index.txt";
/// The whole-tree index filename.
pub const FULL_INDEX_FILE: &str = "index.txtl";

const DEFAULT_COLUMNS: [&str; 4] = ["type", "name", "mtimeMs.36", "size.36"];

/// Errors raised while encoding or decoding an index file.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum IndexError {
    /// A `text`-shaped index declared a `columns:` header this decoder does
    /// not understand, or omitted one where required.
    #[error("malformed index header: {0}")]
    MalformedHeader(String),
    /// A row did not carry enough fields for the declared column set.
    #[error("row {0:?} has too few columns for header {1:?}")]
    ShortRow(String, Vec<String>),
    /// An unrecognised entry `type` code (anything but `F`/`D`).
    #[error("unknown entry type code: {0:?}")]
    UnknownType(String),
}

/// One decoded index row.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexRow {
    /// Whether the row names a file or a directory.
    pub kind: EntryKind,
    /// The entry's bare name (directories carry a trailing `/`).
    pub name: String,
    /// Last-modified time in epoch milliseconds.
    pub mtime_ms: u64,
    /// Size in bytes (directories report `0`).
    pub size: u64,
}

impl IndexRow {
    fn type_code(&self) -> &'static str {
        match self.kind {
            EntryKind::Directory => "D",
            EntryKind::File | EntryKind::Unknown => "F",
        }
    }

    /// Encodes this row using the default column set, base-36 for the
    /// numeric fields.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{} {} {} {}",
            self.type_code(),
            self.name,
            radix36(self.mtime_ms),
            radix36(self.size)
        )
    }
}

fn radix36(value: u64) -> String {
    if value == 0 {
        return "0".to_owned();
    }
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut value = value;
    let mut out = Vec::new();
    while value > 0 {
        let digit = usize::try_from(value.rem_euclid(36)).unwrap_or(0);
        out.push(DIGITS.get(digit).copied().unwrap_or(b'0'));
        value = value.div_euclid(36);
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_else(|_| "0".to_owned())
}

fn parse_radix(text: &str, radix: u32) -> Option<u64> {
    u64::from_str_radix(text, radix)
        .ok()
        .or_else(|| urlencoding_decode(text).and_then(|decoded| u64::from_str_radix(&decoded, radix).ok()))
}

/// A minimal percent-decoder; numeric fields that fail to parse directly
/// round-trip through this before being given up on.
fn urlencoding_decode(text: &str) -> Option<String> {
    let mut bytes = text.bytes();
    let mut out = Vec::new();
    while let Some(byte) = bytes.next() {
        if byte == b'%' {
            let hi = bytes.next()?;
            let lo = bytes.next()?;
            let hex = [hi, lo];
            let hex_str = std::str::from_utf8(&hex).ok()?;
            out.push(u8::from_str_radix(hex_str, 16).ok()?);
        } else {
            out.push(byte);
        }
    }
    String::from_utf8(out).ok()
}

/// The shape of the raw input handed to [`decode`].
pub enum IndexInput<'a> {
    /// Each row pre-split into fields, e.g. `["F", "a.json", "k9", "1a"]`.
    Array(Vec<Vec<&'a str>>),
    /// Each row as a single, already-split-by-whitespace string.
    Rows(Vec<&'a str>),
    /// A single multi-line string, optionally with `long`/`inc`/`---`/
    /// `columns: ...` header lines before the rows begin.
    Text(&'a str),
}

struct Columns {
    names: Vec<String>,
    radices: Vec<u32>,
}

impl Columns {
    fn default_columns() -> Self {
        Self {
            names: DEFAULT_COLUMNS.iter().map(|name| name.to_string()).collect(),
            radices: vec![10, 10, 36, 36],
        }
    }

    fn parse(declaration: &str) -> Result<Self, IndexError> {
        let mut names = Vec::new();
        let mut radices = Vec::new();
        for field in declaration.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            if let Some((name, radix)) = field.rsplit_once('.') {
                let radix: u32 = radix.parse().map_err(|_| {
                    IndexError::MalformedHeader(format!("invalid radix in column {field:?}"))
                })?;
                if !(2..=36).contains(&radix) {
                    return Err(IndexError::MalformedHeader(format!(
                        "radix out of range in column {field:?}"
                    )));
                }
                names.push(name.to_owned());
                radices.push(radix);
            } else {
                names.push(field.to_owned());
                radices.push(10);
            }
        }
        if names.is_empty() {
            return Err(IndexError::MalformedHeader("empty columns declaration".to_owned()));
        }
        Ok(Self { names, radices })
    }

    fn index_of(&self, column: &str) -> Option<usize> {
        self.names.iter().position(|name| name == column)
    }
}

fn row_to_entry(fields: &[&str], columns: &Columns) -> Result<IndexRow, IndexError> {
    let type_idx = columns.index_of("type").unwrap_or(0);
    let name_idx = columns.index_of("name").unwrap_or(1);
    let mtime_idx = columns
        .names
        .iter()
        .position(|name| name == "mtimeMs")
        .unwrap_or(2);
    let size_idx = columns.names.iter().position(|name| name == "size").unwrap_or(3);

    let get = |idx: usize| -> Result<&str, IndexError> {
        fields.get(idx).copied().ok_or_else(|| {
            IndexError::ShortRow(fields.join(" "), columns.names.clone())
        })
    };

    let type_code = get(type_idx)?;
    let kind = match type_code {
        "F" => EntryKind::File,
        "D" => EntryKind::Directory,
        other => return Err(IndexError::UnknownType(other.to_owned())),
    };
    let name = get(name_idx)?.to_owned();
    let mtime_radix = columns.radices.get(mtime_idx).copied().unwrap_or(10);
    let size_radix = columns.radices.get(size_idx).copied().unwrap_or(10);
    let mtime_ms = parse_radix(get(mtime_idx)?, mtime_radix).unwrap_or(0);
    let size = parse_radix(get(size_idx)?, size_radix).unwrap_or(0);

    Ok(IndexRow {
        kind,
        name,
        mtime_ms,
        size,
    })
}

/// Decodes an index file of one of the three accepted input shapes.
///
/// # Errors
///
/// Returns [`IndexError`] if a header declares an unsupported column set or
/// a row cannot be matched against the active column set.
pub fn decode(input: IndexInput<'_>) -> Result<Vec<IndexRow>, IndexError> {
    match input {
        IndexInput::Array(rows) => {
            let columns = Columns::default_columns();
            rows.iter().map(|row| row_to_entry(row, &columns)).collect()
        }
        IndexInput::Rows(rows) => {
            let columns = Columns::default_columns();
            rows.iter()
                .map(|row| {
                    let fields: Vec<&str> = row.split_whitespace().collect();
                    row_to_entry(&fields, &columns)
                })
                .collect()
        }
        IndexInput::Text(text) => decode_text(text),
    }
}

fn decode_text(text: &str) -> Result<Vec<IndexRow>, IndexError> {
    let mut columns = Columns::default_columns();
    let mut rows = Vec::new();
    let mut in_header = true;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if in_header {
            if trimmed == "long" || trimmed == "inc" {
                continue;
            }
            if trimmed == "---" {
                in_header = false;
                continue;
            }
            if let Some(declaration) = trimmed.strip_prefix("columns:") {
                columns = Columns::parse(declaration.trim())?;
                continue;
            }
            in_header = false;
        }
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        rows.push(row_to_entry(&fields, &columns)?);
    }

    Ok(rows)
}

/// Encodes `rows` into the default `index.txt` / `index.txtl` row format,
/// one row per line.
#[must_use]
pub fn encode(rows: &[IndexRow]) -> String {
    rows.iter().map(IndexRow::encode).collect::<Vec<_>>().join("\n")
}

/// Builds the immediate-children index rows for `entries`, sorted by entry
/// name using locale-independent (byte) lexicographic order.
#[must_use]
pub fn directory_entries(entries: &[DocumentEntry]) -> Vec<IndexRow> {
    let mut rows: Vec<IndexRow> = entries
        .iter()
        .filter(|entry| !is_index(&entry.path) && !is_full_index(&entry.path))
        .map(|entry| {
            let base_name = path::basename(&entry.path, None);
            let name = if entry.stat.is_directory {
                format!("{}/", base_name.trim_end_matches('/'))
            } else {
                base_name
            };
            IndexRow {
                kind: entry.stat.kind(),
                name,
                mtime_ms: entry.stat.mtime_ms,
                size: entry.stat.size,
            }
        })
        .collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    rows
}

/// Returns the suffix-matched `index.txt` status of `uri`.
#[must_use]
pub fn is_index(uri: &str) -> bool {
    uri.ends_with(INDEX_FILE) && !uri.ends_with(FULL_INDEX_FILE)
}

/// Returns the suffix-matched `index.txtl` status of `uri`.
#[must_use]
pub fn is_full_index(uri: &str) -> bool {
    uri.ends_with(FULL_INDEX_FILE)
}

/// Lists every index file (both kinds) from `uri`'s parent directory up to
/// and including the root, with duplicates removed (first occurrence wins).
#[must_use]
pub fn indexes_to_update(uri: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut dir = path::dirname(uri);

    loop {
        for filename in [INDEX_FILE, FULL_INDEX_FILE] {
            let candidate = if dir.ends_with('/') {
                format!("{dir}{filename}")
            } else {
                format!("{dir}/{filename}")
            };
            if seen.insert(candidate.clone()) {
                out.push(candidate);
            }
        }
        if dir == "/" || dir.is_empty() {
            break;
        }
        let parent = path::dirname(&dir);
        if parent == dir {
            break;
        }
        dir = parent;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(kind: EntryKind, name: &str, mtime_ms: u64, size: u64) -> IndexRow {
        IndexRow {
            kind,
            name: name.to_owned(),
            mtime_ms,
            size,
        }
    }

    #[test]
    fn encode_then_decode_rows_round_trips() {
        let rows = vec![
            row(EntryKind::File, "a.json", 1_700_000_000_000, 42),
            row(EntryKind::Directory, "sub/", 1_700_000_000_001, 0),
        ];
        let encoded = encode(&rows);
        let lines: Vec<&str> = encoded.lines().collect();
        let decoded = decode(IndexInput::Rows(lines)).unwrap();
        assert_eq!(decoded, rows);
    }

    #[test]
    fn decode_text_with_header_and_custom_columns() {
        let text = "long\ncolumns: type, name, mtimeMs.16, size.16\n---\nF a.json 1f4 a";
        let decoded = decode(IndexInput::Text(text)).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].name, "a.json");
        assert_eq!(decoded[0].mtime_ms, 0x1f4);
        assert_eq!(decoded[0].size, 0xa);
    }

    #[test]
    fn decode_array_shape() {
        let rows = vec![vec!["F", "a.json", "k9", "1a"]];
        let decoded = decode(IndexInput::Array(rows)).unwrap();
        assert_eq!(decoded[0].name, "a.json");
    }

    #[test]
    fn unknown_type_code_is_rejected() {
        let err = decode(IndexInput::Rows(vec!["X a.json 0 0"])).unwrap_err();
        assert!(matches!(err, IndexError::UnknownType(_)));
    }

    #[test]
    fn is_index_and_is_full_index_distinguish_suffixes() {
        assert!(is_index("/a/index.txt"));
        assert!(!is_index("/a/index.txtl"));
        assert!(is_full_index("/a/index.txtl"));
        assert!(!is_full_index("/a/index.txt"));
    }

    #[test]
    fn indexes_to_update_walks_to_root_without_duplicates() {
        let updates = indexes_to_update("/a/b/doc.json");
        assert_eq!(
            updates,
            vec![
                "/a/b/index.txt".to_owned(),
                "/a/b/index.txtl".to_owned(),
                "/a/index.txt".to_owned(),
                "/a/index.txtl".to_owned(),
                "/index.txt".to_owned(),
                "/index.txtl".to_owned(),
            ]
        );
    }
}
