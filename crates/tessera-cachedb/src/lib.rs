//! Persistent call cache for tessera.
//!
//! Maps the digest of a canonical call (`call_key`) to the location of its
//! result in the content store (`storage_key`) plus an absolute expiration.
//!
//! # Storage Backends
//!
//! All backends implement the [`CallCacheStore`] trait:
//!
//! - [`SqliteCallCache`] -- one `calls` table in a SQLite database
//! - [`InMemoryCallCache`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Per key the only states are absent and present; there is no tombstone.
//! 2. Writes are compare-and-upsert: an existing row is replaced only by a
//!    writer naming the `storage_key` it last observed. A losing writer is a
//!    silent no-op ([`UpsertOutcome::Stale`]), not an error.
//! 3. Expiry runs in bounded batches, each its own transaction.
//! 4. Every operation can run inside a caller-managed transaction through
//!    [`CallCacheStore::with_tx`] and [`CallCacheStoreExt::transact`].
//! 5. Backend errors are propagated unchanged, never retried here.

pub mod entry;
pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use entry::{CallEntry, GcReport, SetExpirationParams, UpsertOutcome, DEFAULT_GC_BATCH_SIZE};
pub use error::{CacheDbError, CacheDbResult};
pub use memory::InMemoryCallCache;
pub use sqlite::{Queries, SqliteCallCache};
pub use traits::{CallCacheStore, CallCacheStoreExt, CallQueries, CallReader};
