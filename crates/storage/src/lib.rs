//! Vigil Storage - durable key-value storage abstraction
//!
//! The rotation engine keeps role definitions and WAL records in a
//! key-value store reached through the [`Storage`] trait:
//!
//! - atomic single-key `get` / `put` / `delete`,
//! - ordered, paginated `list_page(prefix, after, limit)`,
//! - optional multi-key [`Transaction`]s (`begin` returns `None` when the
//!   backend has none, and callers fall back to sequential writes).
//!
//! [`StorageExt`] adds JSON encoding on top of any backend, and
//! [`MemoryStorage`] is the in-process backend used by tests and embedders.
#![forbid(unsafe_code)]

mod error;
mod memory;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStorage;
pub use traits::{Storage, StorageExt, Transaction};
