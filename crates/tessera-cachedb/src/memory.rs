use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tessera_types::OpContext;

use crate::entry::{CallEntry, SetExpirationParams, UpsertOutcome, DEFAULT_GC_BATCH_SIZE};
use crate::error::{CacheDbError, CacheDbResult};
use crate::traits::{CallCacheStore, CallQueries, CallReader};

type Rows = HashMap<String, CallEntry>;

/// In-memory, HashMap-based call cache.
///
/// Intended for tests and embedding. A write transaction holds the write lock
/// for its whole body and records the prior value of every row it touches, so
/// a failing body can be undone.
pub struct InMemoryCallCache {
    rows: RwLock<Rows>,
    gc_batch_size: usize,
}

impl InMemoryCallCache {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            gc_batch_size: DEFAULT_GC_BATCH_SIZE,
        }
    }

    /// Override the number of rows deleted per expiry transaction.
    pub fn with_gc_batch_size(mut self, size: usize) -> Self {
        self.gc_batch_size = size.max(1);
        self
    }

    /// Number of rows, expired or not.
    pub fn len(&self) -> CacheDbResult<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> CacheDbResult<bool> {
        Ok(self.read()?.is_empty())
    }

    fn read(&self) -> CacheDbResult<RwLockReadGuard<'_, Rows>> {
        self.rows
            .read()
            .map_err(|e| CacheDbError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> CacheDbResult<RwLockWriteGuard<'_, Rows>> {
        self.rows
            .write()
            .map_err(|e| CacheDbError::LockPoisoned(e.to_string()))
    }
}

impl Default for InMemoryCallCache {
    fn default() -> Self {
        Self::new()
    }
}

struct Snapshot<'a> {
    rows: &'a Rows,
}

impl CallReader for Snapshot<'_> {
    fn select_call(&self, call_key: &str) -> CacheDbResult<Option<CallEntry>> {
        Ok(self.rows.get(call_key).cloned())
    }
}

struct MemoryTx<'a> {
    rows: &'a mut Rows,
    undo: Vec<(String, Option<CallEntry>)>,
}

impl MemoryTx<'_> {
    fn record(&mut self, call_key: &str) {
        self.undo
            .push((call_key.to_string(), self.rows.get(call_key).cloned()));
    }

    fn rollback(self) {
        for (key, prior) in self.undo.into_iter().rev() {
            match prior {
                Some(entry) => self.rows.insert(key, entry),
                None => self.rows.remove(&key),
            };
        }
    }
}

impl CallReader for MemoryTx<'_> {
    fn select_call(&self, call_key: &str) -> CacheDbResult<Option<CallEntry>> {
        Ok(self.rows.get(call_key).cloned())
    }
}

impl CallQueries for MemoryTx<'_> {
    fn set_expiration(&mut self, p: &SetExpirationParams) -> CacheDbResult<UpsertOutcome> {
        if p.storage_key.is_empty() {
            return Err(CacheDbError::EmptyStorageKey(p.call_key.clone()));
        }
        let current = self.rows.get(&p.call_key).map(|e| e.storage_key.as_str());
        if current.is_some() && current != p.prev_storage_key.as_deref() {
            return Ok(UpsertOutcome::Stale);
        }
        self.record(&p.call_key);
        self.rows.insert(
            p.call_key.clone(),
            CallEntry {
                call_key: p.call_key.clone(),
                storage_key: p.storage_key.clone(),
                expiration: p.expiration,
            },
        );
        Ok(UpsertOutcome::Applied)
    }

    fn delete_call(&mut self, call_key: &str) -> CacheDbResult<bool> {
        if !self.rows.contains_key(call_key) {
            return Ok(false);
        }
        self.record(call_key);
        self.rows.remove(call_key);
        Ok(true)
    }

    fn gc_expired_batch(&mut self, now: i64, limit: usize) -> CacheDbResult<usize> {
        let expired: Vec<String> = self
            .rows
            .values()
            .filter(|e| e.is_expired(now))
            .take(limit)
            .map(|e| e.call_key.clone())
            .collect();
        for key in &expired {
            self.record(key);
            self.rows.remove(key);
        }
        Ok(expired.len())
    }
}

impl CallCacheStore for InMemoryCallCache {
    fn with_read_tx(
        &self,
        cx: &OpContext,
        body: &mut dyn FnMut(&dyn CallReader) -> CacheDbResult<()>,
    ) -> CacheDbResult<()> {
        cx.check()?;
        let rows = self.read()?;
        body(&Snapshot { rows: &rows })
    }

    fn with_tx(
        &self,
        cx: &OpContext,
        body: &mut dyn FnMut(&mut dyn CallQueries) -> CacheDbResult<()>,
    ) -> CacheDbResult<()> {
        cx.check()?;
        let mut rows = self.write()?;
        let mut tx = MemoryTx {
            rows: &mut rows,
            undo: Vec::new(),
        };
        let result = body(&mut tx).and_then(|()| Ok(cx.check()?));
        if result.is_err() {
            tx.rollback();
        }
        result
    }

    fn gc_batch_size(&self) -> usize {
        self.gc_batch_size
    }
}

impl std::fmt::Debug for InMemoryCallCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.len().unwrap_or(0);
        f.debug_struct("InMemoryCallCache")
            .field("row_count", &count)
            .finish()
    }
}
