use tessera_cachedb::CacheDbError;
use tessera_call::CallError;
use tessera_contenthash::ContentHashError;
use tessera_types::TypeError;

/// Errors from memoized call execution.
#[derive(Debug, thiserror::Error)]
pub enum MemoError {
    /// The call graph could not be encoded or digested.
    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    CacheDb(#[from] CacheDbError),

    #[error(transparent)]
    ContentHash(#[from] ContentHashError),

    /// The caller's context was cancelled or its deadline passed.
    #[error(transparent)]
    Interrupted(#[from] TypeError),

    /// The memoized operation itself failed.
    #[error("execution failed: {0}")]
    Execution(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for memoization operations.
pub type MemoResult<T> = Result<T, MemoError>;
