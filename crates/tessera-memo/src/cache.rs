use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use tessera_cachedb::{
    CallCacheStore, CallEntry, GcReport, SetExpirationParams, SqliteCallCache, UpsertOutcome,
};
use tessera_call::CallId;
use tessera_contenthash::{CacheRefMetadata, MetadataStore, SqliteMetadataStore};
use tessera_crypto::ContentHasher;
use tessera_types::{expiration_after, unix_now, Digest, OpContext};
use tracing::{debug, info};

use crate::config::{CacheConfig, TaintPolicy};
use crate::error::{MemoError, MemoResult};

/// Storage slot for a fresh result of `call_key` produced in `session_id`.
pub fn storage_key_for(call_key: &str, session_id: &str) -> String {
    ContentHasher::CALL
        .hash_parts([call_key.as_bytes(), session_id.as_bytes()])
        .to_string()
}

/// Where a memoized result came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// An unexpired cache entry was reused.
    Hit,
    /// The operation ran and its result was offered to the cache.
    Computed,
    /// The operation ran and the cache was not consulted (tainted call
    /// under [`TaintPolicy::Bypass`]).
    Uncached,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallOutcome {
    pub call_key: String,
    pub storage_key: String,
    pub origin: Origin,
    /// Whether the call cache now points at `storage_key`. `false` for
    /// uncached results and for results that lost a concurrent write.
    pub committed: bool,
}

/// Memoizing front end over a call cache store and a content hash index.
///
/// Constructed once and shared by all callers.
#[derive(Clone)]
pub struct CallCache {
    store: Arc<dyn CallCacheStore>,
    index: Arc<dyn MetadataStore>,
    ttl: Duration,
    taint_policy: TaintPolicy,
}

impl CallCache {
    pub fn new(
        store: Arc<dyn CallCacheStore>,
        index: Arc<dyn MetadataStore>,
        ttl: Duration,
        taint_policy: TaintPolicy,
    ) -> Self {
        Self {
            store,
            index,
            ttl,
            taint_policy,
        }
    }

    /// Open the SQLite call cache and metadata index named by `config`.
    pub fn open(config: &CacheConfig) -> MemoResult<Self> {
        let store = SqliteCallCache::open(&config.db_path)?.with_gc_batch_size(config.gc_batch_size);
        let index = SqliteMetadataStore::open(&config.db_path)?;
        info!(path = %config.db_path.display(), ttl_secs = config.default_ttl_secs, "call cache ready");
        Ok(Self::new(
            Arc::new(store),
            Arc::new(index),
            config.ttl(),
            config.taint_policy,
        ))
    }

    pub fn store(&self) -> &Arc<dyn CallCacheStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<dyn MetadataStore> {
        &self.index
    }

    pub fn taint_policy(&self) -> TaintPolicy {
        self.taint_policy
    }

    /// Cache key of `id` as seen from `session_id`, or `None` if `id` is
    /// never cached under the current policy.
    pub fn call_key(&self, id: &CallId, session_id: &str) -> MemoResult<Option<String>> {
        let key = id.canonical_digest()?.to_string();
        if !id.is_tainted() {
            return Ok(Some(key));
        }
        Ok(match self.taint_policy {
            TaintPolicy::Bypass => None,
            TaintPolicy::Session => Some(storage_key_for(&key, session_id)),
        })
    }

    /// The unexpired entry for `id`, if any.
    pub fn lookup(
        &self,
        cx: &OpContext,
        id: &CallId,
        session_id: &str,
    ) -> MemoResult<Option<CallEntry>> {
        let Some(call_key) = self.call_key(id, session_id)? else {
            return Ok(None);
        };
        let now = unix_now();
        Ok(self
            .store
            .lookup(cx, &call_key)?
            .filter(|e| !e.is_expired(now)))
    }

    /// Return the cached result of `id`, or run `execute` and cache its result.
    ///
    /// `execute` receives the storage key to write its result under and
    /// returns the content digest of what it wrote. The digest is indexed so
    /// the result can be found by content, then the cache entry is written
    /// with a compare-and-upsert against the entry observed before running.
    /// A hit refreshes the entry's expiration.
    pub fn get_or_compute<F, E>(
        &self,
        cx: &OpContext,
        id: &CallId,
        session_id: &str,
        execute: F,
    ) -> MemoResult<CallOutcome>
    where
        F: FnOnce(&str) -> Result<Digest, E>,
        E: StdError + Send + Sync + 'static,
    {
        cx.check()?;
        let Some(call_key) = self.call_key(id, session_id)? else {
            let call_key = id.canonical_digest()?.to_string();
            let storage_key = storage_key_for(&call_key, session_id);
            debug!(call_key = %call_key, "tainted call bypasses cache");
            self.run(cx, &storage_key, execute)?;
            return Ok(CallOutcome {
                call_key,
                storage_key,
                origin: Origin::Uncached,
                committed: false,
            });
        };

        let now = unix_now();
        let expiration = expiration_after(now, self.ttl);
        let existing = self.store.lookup(cx, &call_key)?;

        if let Some(entry) = existing.as_ref().filter(|e| !e.is_expired(now)) {
            let outcome = self.store.upsert(
                cx,
                &SetExpirationParams {
                    call_key: call_key.clone(),
                    storage_key: entry.storage_key.clone(),
                    expiration,
                    prev_storage_key: Some(entry.storage_key.clone()),
                },
            )?;
            debug!(call_key = %call_key, storage_key = %entry.storage_key, "call cache hit");
            return Ok(CallOutcome {
                call_key,
                storage_key: entry.storage_key.clone(),
                origin: Origin::Hit,
                committed: outcome.is_applied(),
            });
        }

        let storage_key = storage_key_for(&call_key, session_id);
        debug!(call_key = %call_key, storage_key = %storage_key, "call cache miss");
        self.run(cx, &storage_key, execute)?;

        let outcome = self.store.upsert(
            cx,
            &SetExpirationParams {
                call_key: call_key.clone(),
                storage_key: storage_key.clone(),
                expiration,
                prev_storage_key: existing.map(|e| e.storage_key),
            },
        )?;
        if outcome == UpsertOutcome::Stale {
            debug!(call_key = %call_key, "newer result already cached");
        }
        Ok(CallOutcome {
            call_key,
            storage_key,
            origin: Origin::Computed,
            committed: outcome.is_applied(),
        })
    }

    fn run<F, E>(&self, cx: &OpContext, storage_key: &str, execute: F) -> MemoResult<Digest>
    where
        F: FnOnce(&str) -> Result<Digest, E>,
        E: StdError + Send + Sync + 'static,
    {
        let content = execute(storage_key).map_err(|e| MemoError::Execution(Box::new(e)))?;
        CacheRefMetadata::new(Arc::clone(&self.index), storage_key)
            .set_content_hash_key(cx, &content)?;
        Ok(content)
    }

    /// Drop the cache entry for `id`. Returns `true` if there was one.
    pub fn invalidate(&self, cx: &OpContext, id: &CallId, session_id: &str) -> MemoResult<bool> {
        match self.call_key(id, session_id)? {
            Some(call_key) => Ok(self.store.delete(cx, &call_key)?),
            None => Ok(false),
        }
    }

    /// Delete every entry expired now.
    pub fn gc(&self, cx: &OpContext) -> MemoResult<GcReport> {
        Ok(self.store.gc_expired(cx, unix_now())?)
    }
}

impl std::fmt::Debug for CallCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallCache")
            .field("ttl", &self.ttl)
            .field("taint_policy", &self.taint_policy)
            .finish_non_exhaustive()
    }
}
