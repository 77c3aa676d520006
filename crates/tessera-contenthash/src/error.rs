use tessera_types::{Digest, TypeError};

/// Errors from metadata and content hash index operations.
#[derive(Debug, thiserror::Error)]
pub enum ContentHashError {
    /// Error from the SQLite backend.
    #[error("metadata backend error: {0}")]
    Backend(#[from] rusqlite::Error),

    /// The caller's context was cancelled or its deadline passed.
    #[error(transparent)]
    Interrupted(#[from] TypeError),

    /// Content hash keys must use the canonical digest algorithm.
    #[error("content hash key must be sha256, got {0}")]
    NonCanonicalDigest(Digest),

    /// A stored content hash attribute could not be parsed.
    #[error("corrupt content hash attribute on record {record}: {source}")]
    CorruptAttribute {
        record: String,
        #[source]
        source: TypeError,
    },

    /// A shared lock was poisoned by a panicking writer.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// I/O error while preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for content hash operations.
pub type ContentHashResult<T> = Result<T, ContentHashError>;
