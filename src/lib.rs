//! `nandb` — an agnostic, hierarchical document database engine.
//!
//! The engine treats any pluggable storage backend (in-memory, local
//! filesystem, remote HTTP endpoint) as a URI-addressed document tree. It
//! does not own bytes on disk; its value is the composition layer above a
//! [`driver::Driver`]: a fetch pipeline that merges a document with its
//! directory-chain inheritance, path-scoped globals, and recursively
//! resolved `$ref` references; a path algebra over virtual URIs; a compact
//! directory-indexing subsystem; and federation primitives (fallback
//! chains, mount-point routing, subtree extraction).
//!
//! See [`db::Db`] for the engine's entry point.

pub mod auth;
pub mod config;
pub mod db;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod fetch;
pub mod index;
pub mod path;
pub mod shape;
pub mod stat;

pub use auth::AuthContext;
pub use config::{ConfigError, EngineConfig};
pub use db::model::{FieldSchema, FieldType, ModelFactory};
pub use db::watch::DbEvent;
pub use db::{
    Db, DbOptions, FindStreamOptions, GetOptions, ReadDirOptions, SortKey, SortOrder,
    StreamEntry, ValidationIssue,
};
pub use driver::{Driver, DriverError, DriverFuture};
pub use error::{AccessLevel, AuthError, DbError};
pub use fetch::{DocumentSource, FetchOptions};
pub use stat::{DocumentEntry, DocumentStat, EntryKind};
