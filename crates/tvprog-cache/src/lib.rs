//! Guide cache layer.
//!
//! Persists the fetched guide to a single binary file and serves channel
//! lookups from it until it expires, fetching a fresh guide on a miss.

/// Fetch-or-reuse orchestration behind a process-wide lock.
pub mod builder;
mod record;
/// Binary cache file reader and writer.
pub mod store;

pub use builder::ProgramBuilder;
pub use store::{CacheStore, CacheSummary, EXPIRY_MINUTES, resolve_cache_path};
