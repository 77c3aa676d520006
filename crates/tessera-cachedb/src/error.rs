use tessera_types::TypeError;

/// Errors from call cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheDbError {
    /// Error from the SQLite backend.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The caller's context was cancelled or its deadline passed.
    #[error(transparent)]
    Interrupted(#[from] TypeError),

    /// A write was attempted through a read-only transaction view.
    #[error("store is read-only in this transaction")]
    ReadOnly,

    /// A write carried an empty storage key.
    #[error("empty storage key for call {0}")]
    EmptyStorageKey(String),

    /// A shared lock was poisoned by a panicking writer.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// A transaction body was not run exactly once.
    #[error("transaction body did not complete")]
    IncompleteTransaction,

    /// I/O error while preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for call cache operations.
pub type CacheDbResult<T> = Result<T, CacheDbError>;
