use tessera_types::OpContext;
use tracing::debug;

use crate::entry::{CallEntry, GcReport, SetExpirationParams, UpsertOutcome, DEFAULT_GC_BATCH_SIZE};
use crate::error::{CacheDbError, CacheDbResult};

/// Read queries against the call table.
pub trait CallReader {
    /// Fetch the row for `call_key`. Expired rows are still returned.
    fn select_call(&self, call_key: &str) -> CacheDbResult<Option<CallEntry>>;
}

/// Read and write queries against the call table, pinned to one transaction.
pub trait CallQueries: CallReader {
    /// Compare-and-upsert.
    ///
    /// Inserts the row if `call_key` is absent. Replaces it only if the stored
    /// `storage_key` equals `params.prev_storage_key`. Otherwise the row is
    /// left untouched and [`UpsertOutcome::Stale`] is returned.
    fn set_expiration(&mut self, params: &SetExpirationParams) -> CacheDbResult<UpsertOutcome>;

    /// Remove the row for `call_key`. Returns `true` if it existed.
    fn delete_call(&mut self, call_key: &str) -> CacheDbResult<bool>;

    /// Delete at most `limit` rows whose expiration is strictly before `now`.
    /// Returns the number deleted.
    fn gc_expired_batch(&mut self, now: i64, limit: usize) -> CacheDbResult<usize>;
}

/// Transactional call cache.
///
/// Implementations provide the two transaction entry points; every other
/// operation is built on them. All implementations must satisfy:
/// - A key is either absent or present with exactly one `storage_key`.
/// - Under concurrent compare-and-upserts naming the same previous key,
///   exactly one is applied.
/// - A failed transaction body leaves the store unchanged.
/// - A cancelled or expired [`OpContext`] aborts the operation with an error.
pub trait CallCacheStore: Send + Sync {
    /// Run `body` with read access to a consistent view.
    fn with_read_tx(
        &self,
        cx: &OpContext,
        body: &mut dyn FnMut(&dyn CallReader) -> CacheDbResult<()>,
    ) -> CacheDbResult<()>;

    /// Run `body` inside one write transaction.
    ///
    /// The transaction commits if `body` returns `Ok` and rolls back
    /// otherwise.
    fn with_tx(
        &self,
        cx: &OpContext,
        body: &mut dyn FnMut(&mut dyn CallQueries) -> CacheDbResult<()>,
    ) -> CacheDbResult<()>;

    /// Rows deleted per expiry transaction.
    fn gc_batch_size(&self) -> usize {
        DEFAULT_GC_BATCH_SIZE
    }

    /// Fetch the row for `call_key`, expired or not.
    fn lookup(&self, cx: &OpContext, call_key: &str) -> CacheDbResult<Option<CallEntry>> {
        let mut found = None;
        self.with_read_tx(cx, &mut |q| {
            found = q.select_call(call_key)?;
            Ok(())
        })?;
        Ok(found)
    }

    /// Compare-and-upsert in its own transaction.
    fn upsert(
        &self,
        cx: &OpContext,
        params: &SetExpirationParams,
    ) -> CacheDbResult<UpsertOutcome> {
        self.transact(cx, |q| q.set_expiration(params))
    }

    /// Remove the row for `call_key`. Returns `true` if it existed.
    fn delete(&self, cx: &OpContext, call_key: &str) -> CacheDbResult<bool> {
        self.transact(cx, |q| q.delete_call(call_key))
    }

    /// Delete every row expired at `now`.
    ///
    /// Runs batches of [`CallCacheStore::gc_batch_size`] rows, each in its own
    /// transaction, until a batch deletes fewer than the batch size. The
    /// context is checked between batches; batches already committed stay
    /// committed.
    fn gc_expired(&self, cx: &OpContext, now: i64) -> CacheDbResult<GcReport> {
        let limit = self.gc_batch_size().max(1);
        let mut report = GcReport::default();
        loop {
            cx.check()?;
            let deleted = self.transact(cx, |q| q.gc_expired_batch(now, limit))?;
            report.batches += 1;
            report.deleted += deleted;
            debug!(batch = report.batches, deleted, "expired call batch");
            if deleted < limit {
                return Ok(report);
            }
        }
    }
}

/// Typed transaction helper for any [`CallCacheStore`].
pub trait CallCacheStoreExt: CallCacheStore {
    /// Run `f` in one write transaction and return its value.
    fn transact<T, F>(&self, cx: &OpContext, f: F) -> CacheDbResult<T>
    where
        F: FnOnce(&mut dyn CallQueries) -> CacheDbResult<T>,
    {
        let mut f = Some(f);
        let mut out = None;
        self.with_tx(cx, &mut |q| {
            let f = f.take().ok_or(CacheDbError::IncompleteTransaction)?;
            out = Some(f(q)?);
            Ok(())
        })?;
        out.ok_or(CacheDbError::IncompleteTransaction)
    }
}

impl<S: CallCacheStore + ?Sized> CallCacheStoreExt for S {}
