//! Call memoization for tessera.
//!
//! [`CallCache`] ties the pieces together: a call graph is canonicalized and
//! digested, the digest is looked up in the call cache, and on a miss the
//! caller's operation runs, its content digest is indexed, and the result is
//! written back with a compare-and-upsert.
//!
//! Whether tainted calls are memoized is the caller's choice, expressed as a
//! [`TaintPolicy`].

pub mod cache;
pub mod config;
pub mod error;
pub mod gc;

pub use cache::{storage_key_for, CallCache, CallOutcome, Origin};
pub use config::{CacheConfig, TaintPolicy};
pub use error::{MemoError, MemoResult};
pub use gc::{run_gc_once, spawn_gc_loop};
