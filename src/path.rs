//! URI path algebra over virtual, forward-slash-delimited document paths.
//!
//! Every function here is pure and total: malformed input degrades to a
//! best-effort result rather than an error, matching the "no errors" failure
//! mode of the underlying specification. URIs may be local (`a/b/c`,
//! `/a/b/c`) or remote (`https://host/a/b`); the scheme plus authority of a
//! remote URI is treated as a single, indivisible leading token by every
//! function below.

/// Returns the scheme-and-authority prefix of a remote URI, if any.
///
/// `"https://example.com/a/b"` yields `Some("https://example.com")`.
fn remote_prefix(uri: &str) -> Option<&str> {
    let scheme_end = uri.find("://")?;
    let scheme = uri.get(..scheme_end)?;
    let mut chars = scheme.chars();
    let first_ok = chars.next().is_some_and(|ch| ch.is_ascii_alphabetic());
    if !first_ok {
        return None;
    }
    if !chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '.' | '-')) {
        return None;
    }

    let after_scheme = uri.get(scheme_end + 3..)?;
    let authority_len = after_scheme.find('/').unwrap_or(after_scheme.len());
    let prefix_len = scheme_end + 3 + authority_len;
    uri.get(..prefix_len)
}

/// Reports whether `uri` carries a `scheme://` prefix (`http`, `https`,
/// `ftp`, `file`, or any other syntactically valid scheme).
#[must_use]
pub fn is_remote(uri: &str) -> bool {
    remote_prefix(uri).is_some()
}

/// Reports whether `uri` is absolute: remote, or starting with `/`.
#[must_use]
pub fn is_absolute(uri: &str) -> bool {
    is_remote(uri) || uri.starts_with('/')
}

/// Splits `uri` into an optional indivisible remote prefix and the
/// remaining path (which may itself start with `/`).
fn split_prefix(uri: &str) -> (Option<&str>, &str) {
    match remote_prefix(uri) {
        Some(prefix) => (Some(prefix), uri.get(prefix.len()..).unwrap_or("")),
        None => (None, uri),
    }
}

/// Concatenates `segments`, folds `.`/`..` tokens, and collapses empty path
/// components, while preserving a trailing `/` and treating a later
/// absolute (or remote) segment as resetting everything accumulated so far.
#[must_use]
pub fn normalize(segments: &[&str]) -> String {
    // Find the last segment that itself starts a new absolute/remote path;
    // everything before it is discarded per the reset rule.
    let mut start = 0;
    for (idx, segment) in segments.iter().enumerate() {
        if is_absolute(segment) {
            start = idx;
        }
    }
    let effective = segments.get(start..).unwrap_or(&[]);

    let trailing_slash = effective
        .iter()
        .rev()
        .find(|segment| !segment.is_empty())
        .is_some_and(|segment| segment.ends_with('/'));

    let joined = effective.join("/");
    let (prefix, rest) = split_prefix(&joined);
    let leading_slash = prefix.is_some() || rest.starts_with('/');

    let mut stack: Vec<&str> = Vec::new();
    for part in rest.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if stack.pop().is_none() && !leading_slash {
                    stack.push("..");
                }
            }
            other => stack.push(other),
        }
    }

    let mut out = String::new();
    if let Some(prefix) = prefix {
        out.push_str(prefix);
        if stack.is_empty() {
            out.push('/');
            return out;
        }
        out.push('/');
    } else if leading_slash {
        out.push('/');
    }
    out.push_str(&stack.join("/"));
    if trailing_slash && !out.ends_with('/') {
        out.push('/');
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Resolves `args` against `cwd` and `root`, equivalent to
/// `normalize([cwd, root, ...args])`; an absolute leading `args` entry
/// naturally discards `cwd`/`root` via `normalize`'s reset rule.
#[must_use]
pub fn resolve_sync(cwd: &str, root: &str, args: &[&str]) -> String {
    let mut segments = Vec::with_capacity(args.len() + 2);
    segments.push(cwd);
    segments.push(root);
    segments.extend_from_slice(args);
    normalize(&segments)
}

/// Like [`resolve_sync`] but guarantees a leading `/` for local results.
#[must_use]
pub fn absolute(cwd: &str, root: &str, args: &[&str]) -> String {
    let resolved = resolve_sync(cwd, root, args);
    if is_remote(&resolved) || resolved.starts_with('/') {
        resolved
    } else {
        format!("/{resolved}")
    }
}

/// Returns the parent directory of `uri`, always with a trailing `/`.
#[must_use]
pub fn dirname(uri: &str) -> String {
    let (prefix, rest) = split_prefix(uri);
    if rest.is_empty() || rest == "/" {
        return prefix.map_or_else(|| "/".to_owned(), |prefix| format!("{prefix}/"));
    }

    let trimmed = rest.strip_suffix('/').unwrap_or(rest);
    let parent = match trimmed.rfind('/') {
        Some(idx) => trimmed.get(..=idx).unwrap_or("/"),
        None => "/",
    };
    prefix.map_or_else(|| parent.to_owned(), |prefix| format!("{prefix}{parent}"))
}

/// What [`basename`] should strip from the final path segment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BasenameSuffix {
    /// Strip the file extension (as computed by [`extname`]), unless the
    /// whole segment is a dotfile (starts with `.`).
    Extension,
    /// Strip this exact literal suffix if present.
    Literal(String),
}

fn strip_extension(name: &str) -> String {
    if name.starts_with('.') {
        return name.to_owned();
    }
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.get(..idx).unwrap_or(name).to_owned(),
        _ => name.to_owned(),
    }
}

/// Returns the last path segment of `uri`, preserving a trailing `/` when
/// `uri` denotes a directory.
#[must_use]
pub fn basename(uri: &str, remove_suffix: Option<&BasenameSuffix>) -> String {
    let (_, rest) = split_prefix(uri);
    let is_dir = rest.ends_with('/') && rest.len() > 1;
    let trimmed = rest.strip_suffix('/').unwrap_or(rest);
    let core = trimmed.rsplit('/').next().unwrap_or(trimmed);

    let stripped = match remove_suffix {
        Some(BasenameSuffix::Extension) => strip_extension(core),
        Some(BasenameSuffix::Literal(suffix)) => core
            .strip_suffix(suffix.as_str())
            .map_or_else(|| core.to_owned(), ToOwned::to_owned),
        None => core.to_owned(),
    };

    if is_dir {
        format!("{stripped}/")
    } else {
        stripped
    }
}

/// Returns the lowercased extension (including the leading `.`) of the
/// final path segment, or an empty string for directories and dotfiles.
#[must_use]
pub fn extname(uri: &str) -> String {
    let (_, rest) = split_prefix(uri);
    if rest.ends_with('/') {
        return String::new();
    }
    let core = rest.rsplit('/').next().unwrap_or(rest);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() > 1 && !parts.first().is_some_and(|first| first.is_empty()) {
        parts
            .last()
            .map_or_else(String::new, |ext| format!(".{}", ext.to_lowercase()))
    } else {
        String::new()
    }
}

/// Returns the suffix of `to` after stripping the `from` prefix when both
/// are absolute and `to` is nested under `from`; otherwise returns `to`
/// unchanged. See `DESIGN.md` for why this reading of the ambiguous source
/// contract was chosen.
#[must_use]
pub fn relative(from: &str, to: &str) -> String {
    if is_absolute(from) && is_absolute(to) {
        if let Some(rest) = to.strip_prefix(from) {
            return rest.strip_prefix('/').unwrap_or(rest).to_owned();
        }
    }
    to.to_owned()
}
