use serde::{Deserialize, Serialize};

/// Rows deleted per expiry statement.
pub const DEFAULT_GC_BATCH_SIZE: usize = 1000;

/// A row of the call cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEntry {
    /// Digest of the canonical call.
    pub call_key: String,
    /// Opaque locator of the result in the content store.
    pub storage_key: String,
    /// Absolute expiration, seconds since the UNIX epoch.
    pub expiration: i64,
}

impl CallEntry {
    /// An entry is expired once `now` is strictly after its expiration.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiration < now
    }
}

/// Arguments of a compare-and-upsert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetExpirationParams {
    pub call_key: String,
    pub storage_key: String,
    pub expiration: i64,
    /// The storage key the writer last observed, or `None` if it observed
    /// no row. An existing row is only replaced when this matches it.
    pub prev_storage_key: Option<String>,
}

/// The result of a compare-and-upsert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The row was inserted or replaced.
    Applied,
    /// The row holds a newer value than the writer observed; left untouched.
    Stale,
}

impl UpsertOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Summary of an expiry sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcReport {
    /// Rows deleted across all batches.
    pub deleted: usize,
    /// Batch statements executed.
    pub batches: usize,
}
