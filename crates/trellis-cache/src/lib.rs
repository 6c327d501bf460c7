//! Dependency cache for Trellis: keys, stores, and blob archiving.

pub mod archiver;
pub mod keys;
pub mod store;
pub mod types;

pub use archiver::{pack, unpack};
pub use keys::{CacheKey, hash_lockfile, hash_lockfile_path, sanitize_key};
pub use store::{CacheStore, FilesystemStore, MemoryStore};
pub use types::{CacheEntry, SaveOutcome};
