use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tessera_types::OpContext;
use tracing::{debug, info};

use crate::entry::{CallEntry, SetExpirationParams, UpsertOutcome, DEFAULT_GC_BATCH_SIZE};
use crate::error::{CacheDbError, CacheDbResult};
use crate::traits::{CallCacheStore, CallQueries, CallReader};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS calls (
    call_key    TEXT PRIMARY KEY NOT NULL,
    storage_key TEXT NOT NULL,
    expiration  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS calls_expiration ON calls(expiration);
";

const SELECT_CALL: &str =
    "SELECT call_key, storage_key, expiration FROM calls WHERE call_key = ?1";

// The conflict arm only fires when the stored key matches the one the writer
// observed. A NULL previous key never matches, so an absent-expecting writer
// cannot overwrite a row that appeared in the meantime.
const SET_EXPIRATION: &str = "
INSERT INTO calls (call_key, storage_key, expiration) VALUES (?1, ?2, ?3)
ON CONFLICT(call_key) DO UPDATE
    SET storage_key = excluded.storage_key, expiration = excluded.expiration
    WHERE calls.storage_key = ?4
";

const DELETE_CALL: &str = "DELETE FROM calls WHERE call_key = ?1";

const GC_EXPIRED_BATCH: &str = "
DELETE FROM calls WHERE rowid IN (
    SELECT rowid FROM calls WHERE expiration < ?1 LIMIT ?2
)";

/// Virtual machine instructions between cancellation checks.
const PROGRESS_INTERVAL: i32 = 1000;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Queries over one SQLite connection or transaction.
pub struct Queries<'c> {
    conn: &'c Connection,
}

impl<'c> Queries<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl CallReader for Queries<'_> {
    fn select_call(&self, call_key: &str) -> CacheDbResult<Option<CallEntry>> {
        let mut stmt = self.conn.prepare_cached(SELECT_CALL)?;
        let row = stmt
            .query_row(params![call_key], |row| {
                Ok(CallEntry {
                    call_key: row.get(0)?,
                    storage_key: row.get(1)?,
                    expiration: row.get(2)?,
                })
            })
            .optional()?;
        Ok(row)
    }
}

impl CallQueries for Queries<'_> {
    fn set_expiration(&mut self, p: &SetExpirationParams) -> CacheDbResult<UpsertOutcome> {
        if p.storage_key.is_empty() {
            return Err(CacheDbError::EmptyStorageKey(p.call_key.clone()));
        }
        let mut stmt = self.conn.prepare_cached(SET_EXPIRATION)?;
        let changed = stmt.execute(params![
            p.call_key,
            p.storage_key,
            p.expiration,
            p.prev_storage_key.as_deref(),
        ])?;
        if changed == 0 {
            debug!(call_key = %p.call_key, "stale upsert ignored");
            Ok(UpsertOutcome::Stale)
        } else {
            Ok(UpsertOutcome::Applied)
        }
    }

    fn delete_call(&mut self, call_key: &str) -> CacheDbResult<bool> {
        let mut stmt = self.conn.prepare_cached(DELETE_CALL)?;
        Ok(stmt.execute(params![call_key])? > 0)
    }

    fn gc_expired_batch(&mut self, now: i64, limit: usize) -> CacheDbResult<usize> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare_cached(GC_EXPIRED_BATCH)?;
        Ok(stmt.execute(params![now, limit])?)
    }
}

/// SQLite-backed call cache.
///
/// One connection guarded by a mutex. The database runs in WAL mode, so other
/// processes may open the same file; write transactions are taken with
/// `BEGIN IMMEDIATE` and wait up to ten seconds for a competing writer.
pub struct SqliteCallCache {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    gc_batch_size: usize,
}

impl SqliteCallCache {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> CacheDbResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let cache = Self::init(conn, Some(path.to_path_buf()))?;
        info!(path = %path.display(), "opened call cache");
        Ok(cache)
    }

    /// A private, non-persistent database.
    pub fn open_in_memory() -> CacheDbResult<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> CacheDbResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            gc_batch_size: DEFAULT_GC_BATCH_SIZE,
        })
    }

    /// Override the number of rows deleted per expiry transaction.
    pub fn with_gc_batch_size(mut self, size: usize) -> Self {
        self.gc_batch_size = size.max(1);
        self
    }

    /// Database file, or `None` for an in-memory database.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of rows, expired or not.
    pub fn len(&self) -> CacheDbResult<usize> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM calls", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    pub fn is_empty(&self) -> CacheDbResult<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> CacheDbResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CacheDbError::LockPoisoned(e.to_string()))
    }

    /// Run `f` with `cx` able to interrupt any statement on `conn`.
    fn interruptible<T>(
        conn: &mut Connection,
        cx: &OpContext,
        f: impl FnOnce(&mut Connection) -> CacheDbResult<T>,
    ) -> CacheDbResult<T> {
        cx.check()?;
        let watch = AssertUnwindSafe(cx.clone());
        conn.progress_handler(PROGRESS_INTERVAL, Some(move || watch.is_done()));
        let result = f(conn);
        conn.progress_handler(0, None::<fn() -> bool>);
        result.map_err(|err| match cx.check() {
            Err(reason) => CacheDbError::Interrupted(reason),
            Ok(()) => err,
        })
    }
}

impl CallCacheStore for SqliteCallCache {
    fn with_read_tx(
        &self,
        cx: &OpContext,
        body: &mut dyn FnMut(&dyn CallReader) -> CacheDbResult<()>,
    ) -> CacheDbResult<()> {
        let mut conn = self.lock()?;
        Self::interruptible(&mut conn, cx, |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
            body(&Queries::new(&tx))?;
            tx.commit()?;
            Ok(())
        })
    }

    fn with_tx(
        &self,
        cx: &OpContext,
        body: &mut dyn FnMut(&mut dyn CallQueries) -> CacheDbResult<()>,
    ) -> CacheDbResult<()> {
        let mut conn = self.lock()?;
        Self::interruptible(&mut conn, cx, |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            body(&mut Queries::new(&tx))?;
            cx.check()?;
            tx.commit()?;
            Ok(())
        })
    }

    fn gc_batch_size(&self) -> usize {
        self.gc_batch_size
    }
}

impl std::fmt::Debug for SqliteCallCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCallCache")
            .field("path", &self.path)
            .field("gc_batch_size", &self.gc_batch_size)
            .finish()
    }
}
