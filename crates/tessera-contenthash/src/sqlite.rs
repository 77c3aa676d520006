use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, TransactionBehavior};
use tessera_types::OpContext;

use crate::error::{ContentHashError, ContentHashResult};
use crate::traits::{Attribute, MetadataRecord, MetadataStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS metadata (
    record_id TEXT NOT NULL,
    key       TEXT NOT NULL,
    value     TEXT NOT NULL,
    index_key TEXT,
    PRIMARY KEY (record_id, key)
);
CREATE INDEX IF NOT EXISTS metadata_index_key ON metadata(index_key);
";

const SELECT_RECORD: &str =
    "SELECT key, value, index_key FROM metadata WHERE record_id = ?1 ORDER BY key";

const SET_STRING: &str = "
INSERT INTO metadata (record_id, key, value, index_key) VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(record_id, key) DO UPDATE
    SET value = excluded.value, index_key = excluded.index_key
";

const SEARCH_EXACT: &str =
    "SELECT DISTINCT record_id FROM metadata WHERE index_key = ?1 ORDER BY record_id";

const SEARCH_PREFIX: &str = "
SELECT DISTINCT record_id FROM metadata
WHERE substr(index_key, 1, length(?1)) = ?1
ORDER BY record_id
";

const DELETE_RECORD: &str = "DELETE FROM metadata WHERE record_id = ?1";

/// Virtual machine instructions between cancellation checks.
const PROGRESS_INTERVAL: i32 = 1000;

/// SQLite-backed metadata store.
///
/// One row per attribute. Can share a database file with the call cache.
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    pub fn open(path: impl AsRef<Path>) -> ContentHashResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> ContentHashResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> ContentHashResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> ContentHashResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ContentHashError::LockPoisoned(e.to_string()))
    }

    /// Run `f` with `cx` able to interrupt any statement on `conn`.
    fn interruptible<T>(
        conn: &mut Connection,
        cx: &OpContext,
        f: impl FnOnce(&mut Connection) -> ContentHashResult<T>,
    ) -> ContentHashResult<T> {
        cx.check()?;
        let watch = AssertUnwindSafe(cx.clone());
        conn.progress_handler(PROGRESS_INTERVAL, Some(move || watch.is_done()));
        let result = f(conn);
        conn.progress_handler(0, None::<fn() -> bool>);
        result.map_err(|err| match cx.check() {
            Err(reason) => ContentHashError::Interrupted(reason),
            Ok(()) => err,
        })
    }

    fn load(conn: &Connection, id: &str) -> ContentHashResult<Option<MetadataRecord>> {
        let mut stmt = conn.prepare_cached(SELECT_RECORD)?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                Attribute {
                    value: row.get(1)?,
                    index: row.get(2)?,
                },
            ))
        })?;
        let attrs = rows.collect::<Result<BTreeMap<_, _>, _>>()?;
        if attrs.is_empty() {
            return Ok(None);
        }
        Ok(Some(MetadataRecord {
            id: id.to_string(),
            attrs,
        }))
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn get(&self, cx: &OpContext, id: &str) -> ContentHashResult<Option<MetadataRecord>> {
        cx.check()?;
        let mut conn = self.lock()?;
        Self::interruptible(&mut conn, cx, |conn| Self::load(conn, id))
    }

    fn set_string(
        &self,
        cx: &OpContext,
        id: &str,
        key: &str,
        value: &str,
        index: Option<&str>,
    ) -> ContentHashResult<()> {
        cx.check()?;
        let mut conn = self.lock()?;
        Self::interruptible(&mut conn, cx, |conn| {
            conn.prepare_cached(SET_STRING)?
                .execute(params![id, key, value, index])?;
            Ok(())
        })
    }

    fn search(
        &self,
        cx: &OpContext,
        index: &str,
        prefix: bool,
    ) -> ContentHashResult<Vec<MetadataRecord>> {
        cx.check()?;
        let mut conn = self.lock()?;
        Self::interruptible(&mut conn, cx, |conn| {
            // Ids and attributes come from one snapshot.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
            let ids = {
                let mut stmt =
                    tx.prepare_cached(if prefix { SEARCH_PREFIX } else { SEARCH_EXACT })?;
                let ids = stmt
                    .query_map(params![index], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                ids
            };
            let mut records = Vec::with_capacity(ids.len());
            for id in ids {
                cx.check()?;
                if let Some(record) = Self::load(&tx, &id)? {
                    records.push(record);
                }
            }
            tx.commit()?;
            Ok(records)
        })
    }

    fn remove(&self, cx: &OpContext, id: &str) -> ContentHashResult<bool> {
        cx.check()?;
        let mut conn = self.lock()?;
        Self::interruptible(&mut conn, cx, |conn| {
            let n = conn.prepare_cached(DELETE_RECORD)?.execute(params![id])?;
            Ok(n > 0)
        })
    }
}

impl std::fmt::Debug for SqliteMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteMetadataStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::TypeError;

    fn cx() -> OpContext {
        OpContext::background()
    }

    // ----------------------------------------------------------------
    // Cancellation
    // ----------------------------------------------------------------

    #[test]
    fn cancelled_context_is_refused() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        let cx = OpContext::background();
        cx.cancellation_token().cancel();
        assert!(matches!(
            store.set_string(&cx, "r1", "k", "v", Some("i")),
            Err(ContentHashError::Interrupted(TypeError::Cancelled))
        ));
        assert!(matches!(
            store.search(&cx, "i", false),
            Err(ContentHashError::Interrupted(TypeError::Cancelled))
        ));
        assert!(store.get(&OpContext::background(), "r1").unwrap().is_none());
    }

    #[test]
    fn cancellation_interrupts_a_running_statement() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        let cx = OpContext::background();
        let token = cx.cancellation_token().clone();
        let mut conn = store.lock().unwrap();
        let err = SqliteMetadataStore::interruptible(&mut conn, &cx, |conn| {
            token.cancel();
            // Never finishes on its own.
            let n: i64 = conn.query_row(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) \
                 SELECT count(*) FROM c",
                [],
                |row| row.get(0),
            )?;
            Ok(n)
        })
        .unwrap_err();
        assert!(matches!(err, ContentHashError::Interrupted(TypeError::Cancelled)));
        drop(conn);

        // The handler is cleared afterwards.
        store.set_string(&OpContext::background(), "r1", "k", "v", None).unwrap();
        assert!(store.get(&OpContext::background(), "r1").unwrap().is_some());
    }

    // ----------------------------------------------------------------
    // Attributes and search
    // ----------------------------------------------------------------

    #[test]
    fn overwrite_replaces_value_and_index() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        store.set_string(&cx(), "r1", "k", "a", Some("idx:a")).unwrap();
        store.set_string(&cx(), "r1", "k", "b", Some("idx:b")).unwrap();
        assert!(store.search(&cx(), "idx:a", false).unwrap().is_empty());
        let found = store.search(&cx(), "idx:b", false).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("k"), Some("b"));
    }

    #[test]
    fn prefix_search_is_literal() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        store.set_string(&cx(), "r1", "k", "x", Some("a%b")).unwrap();
        store.set_string(&cx(), "r2", "k", "x", Some("axb")).unwrap();
        let ids: Vec<_> = store
            .search(&cx(), "a%", true)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["r1"]);
    }

    #[test]
    fn records_with_several_indexed_attributes_are_returned_once() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        store.set_string(&cx(), "r1", "a", "1", Some("idx:1")).unwrap();
        store.set_string(&cx(), "r1", "b", "2", Some("idx:2")).unwrap();
        let found = store.search(&cx(), "idx:", true).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].attrs.len(), 2);
    }

    #[test]
    fn remove_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.db");
        {
            let store = SqliteMetadataStore::open(&path).unwrap();
            store.set_string(&cx(), "keep", "k", "v", Some("i")).unwrap();
            store.set_string(&cx(), "drop", "k", "v", Some("i")).unwrap();
            assert!(store.remove(&cx(), "drop").unwrap());
        }
        let store = SqliteMetadataStore::open(&path).unwrap();
        let ids: Vec<_> = store
            .search(&cx(), "i", false)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["keep"]);
        assert!(store.get(&cx(), "drop").unwrap().is_none());
    }
}
