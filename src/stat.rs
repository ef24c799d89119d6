//! Document metadata ([`DocumentStat`]) and directory-entry descriptors
//! ([`DocumentEntry`]).

use serde::{Deserialize, Serialize};

/// The coarse entry kind encoded by a short-form `type` tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
    /// Neither could be determined.
    Unknown,
}

impl EntryKind {
    /// Renders the kind as the single-character tag used by the directory
    /// index format (`F`, `D`, or `?`).
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::File => 'F',
            Self::Directory => 'D',
            Self::Unknown => '?',
        }
    }

    /// Parses the single-character tag back into a kind.
    #[must_use]
    pub fn from_char(ch: char) -> Self {
        match ch {
            'F' => Self::File,
            'D' => Self::Directory,
            _ => Self::Unknown,
        }
    }
}

/// Metadata for a single URI, mirroring the POSIX `stat(2)` surface plus the
/// boolean type flags the specification calls for.
///
/// Timestamps and sizes are stored as milliseconds/bytes (`u64`) rather than
/// floating point, since the underlying values are always non-negative
/// integral quantities and this avoids floating point arithmetic entirely.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentStat {
    /// Last access time, in milliseconds since the Unix epoch.
    pub atime_ms: u64,
    /// Birth/creation time, in milliseconds since the Unix epoch.
    pub btime_ms: u64,
    /// Last inode-change time, in milliseconds since the Unix epoch.
    pub ctime_ms: u64,
    /// Last modification time, in milliseconds since the Unix epoch.
    pub mtime_ms: u64,
    /// Size in bytes.
    pub size: u64,
    /// POSIX file mode bits, when known.
    pub mode: u64,
    /// Owning user ID, when known.
    pub uid: u64,
    /// Owning group ID, when known.
    pub gid: u64,
    /// Inode number, when known.
    pub ino: u64,
    /// Device ID, when known.
    pub dev: u64,
    /// Hard link count, when known.
    pub nlink: u64,
    /// Device ID for special files, when known.
    pub rdev: u64,
    /// Preferred I/O block size, when known.
    pub blksize: u64,
    /// Number of 512-byte blocks allocated, when known.
    pub blocks: u64,
    /// Whether this entry is a regular file.
    pub is_file: bool,
    /// Whether this entry is a directory.
    pub is_directory: bool,
    /// Whether this entry is a block device.
    pub is_block_device: bool,
    /// Whether this entry is a FIFO.
    pub is_fifo: bool,
    /// Whether this entry is a socket.
    pub is_socket: bool,
    /// Whether this entry is a symbolic link.
    pub is_symbolic_link: bool,
    /// A driver-reported error encountered while statting, if any.
    pub error: Option<String>,
}

impl DocumentStat {
    /// Builds a stat record for a regular file.
    #[must_use]
    pub fn file(size: u64, mtime_ms: u64) -> Self {
        Self {
            mtime_ms,
            size,
            is_file: true,
            ..Self::default()
        }
    }

    /// Builds a stat record for a directory.
    #[must_use]
    pub fn directory(mtime_ms: u64) -> Self {
        Self {
            mtime_ms,
            is_directory: true,
            ..Self::default()
        }
    }

    /// Builds a stat record from the short-form `type` tag (`F`/`D`),
    /// expanding it into the boolean flags.
    #[must_use]
    pub fn from_kind(kind: EntryKind, size: u64, mtime_ms: u64) -> Self {
        Self {
            mtime_ms,
            size,
            is_file: matches!(kind, EntryKind::File),
            is_directory: matches!(kind, EntryKind::Directory),
            ..Self::default()
        }
    }

    /// `from()` is idempotent in the source specification; the Rust
    /// equivalent is simply returning an owned clone of an existing value,
    /// exposed so callers migrating data between stats do not need to
    /// special-case "already a `DocumentStat`".
    #[must_use]
    pub fn from_stat(stat: &Self) -> Self {
        stat.clone()
    }

    /// Whether the document is considered to exist: any of size, mtime, or
    /// block size is non-zero.
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.size > 0 || self.mtime_ms > 0 || self.blksize > 0
    }

    /// The coarse entry kind derived from the boolean flags.
    #[must_use]
    pub const fn kind(&self) -> EntryKind {
        if self.is_file {
            EntryKind::File
        } else if self.is_directory {
            EntryKind::Directory
        } else {
            EntryKind::Unknown
        }
    }
}

/// A directory-entry descriptor: a named, positioned reference to a
/// document or subdirectory, with its metadata attached once resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentEntry {
    /// The entry's own name (last path segment).
    pub name: String,
    /// The full URI of the entry.
    pub path: String,
    /// The URI of the entry's parent directory.
    pub parent: String,
    /// Depth from the tree root (number of path segments).
    pub depth: u32,
    /// Metadata for the entry, once known.
    pub stat: DocumentStat,
    /// Whether `stat` reflects a completed stat call.
    pub fulfilled: bool,
}

impl DocumentEntry {
    /// Builds an entry from a path alone, deriving `name`, `parent`, and
    /// `depth`; `stat` starts unfulfilled.
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        let name = crate::path::basename(path, None);
        let parent = crate::path::dirname(path);
        let depth = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .count();
        Self {
            name,
            path: path.to_owned(),
            parent,
            depth: u32::try_from(depth).unwrap_or(u32::MAX),
            stat: DocumentStat::default(),
            fulfilled: false,
        }
    }

    /// Attaches a resolved stat to this entry, marking it fulfilled.
    #[must_use]
    pub fn with_stat(mut self, stat: DocumentStat) -> Self {
        self.stat = stat;
        self.fulfilled = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exists_is_derived_from_size_mtime_or_blksize() {
        assert!(!DocumentStat::default().exists());
        assert!(DocumentStat::file(10, 0).exists());
        assert!(DocumentStat::file(0, 10).exists());
    }

    #[test]
    fn kind_round_trips_through_char() {
        let file = DocumentStat::from_kind(EntryKind::File, 1, 1);
        assert_eq!(file.kind().as_char(), 'F');
        let dir = DocumentStat::from_kind(EntryKind::Directory, 0, 1);
        assert_eq!(dir.kind().as_char(), 'D');
    }

    #[test]
    fn entry_from_path_derives_fields() {
        let entry = DocumentEntry::from_path("a/b/c.json");
        assert_eq!(entry.name, "c.json");
        assert_eq!(entry.parent, "a/b/");
        assert_eq!(entry.depth, 3);
        assert!(!entry.fulfilled);
    }

    #[test]
    fn entry_with_stat_marks_fulfilled() {
        let entry = DocumentEntry::from_path("a.json").with_stat(DocumentStat::file(1, 1));
        assert!(entry.fulfilled);
        assert!(entry.stat.is_file);
    }
}
