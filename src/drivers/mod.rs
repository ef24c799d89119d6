//! Concrete [`crate::driver::Driver`] implementations.
//!
//! [`memory::MemoryDriver`] is the canonical, fully-implemented driver used
//! by every unit test in this crate. [`local_fs::LocalFsDriver`] and
//! [`http::HttpDriver`] implement the same contract against a capability-
//! secured local directory and a remote HTTP endpoint respectively; per the
//! specification's scope, only their *contracts* are load-bearing, so their
//! bodies are complete but not exhaustively hardened.

pub mod http;
pub mod local_fs;
pub mod memory;

pub use http::HttpDriver;
pub use local_fs::LocalFsDriver;
pub use memory::MemoryDriver;
