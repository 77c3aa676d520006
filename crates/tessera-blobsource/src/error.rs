use tessera_contenthash::ContentHashError;
use tessera_types::{Digest, TypeError};

/// Errors from source identification and resolution.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The URI has no `scheme://` prefix.
    #[error("invalid source URI {0:?}")]
    InvalidUri(String),

    /// No source is registered for the URI's scheme.
    #[error("unknown source scheme {0:?}")]
    UnknownScheme(String),

    /// A source for this scheme is already registered.
    #[error("source scheme {0:?} registered twice")]
    DuplicateScheme(String),

    /// The URI names a malformed digest.
    #[error("invalid digest in {uri:?}: {source}")]
    InvalidDigest {
        uri: String,
        #[source]
        source: TypeError,
    },

    /// An identifier attribute has an unusable value.
    #[error("invalid attribute {key}={value:?}")]
    InvalidAttribute { key: String, value: String },

    /// An identifier was handed to a source of another scheme.
    #[error("identifier for scheme {actual:?} passed to {expected:?} source")]
    WrongIdentifier {
        expected: &'static str,
        actual: &'static str,
    },

    /// No record holding the digest could be materialized.
    #[error("content not found: {0}")]
    ContentNotFound(Digest),

    /// A single record could not be materialized.
    #[error("cannot materialize record {record}: {reason}")]
    Materialize { record: String, reason: String },

    /// Content hash index failure.
    #[error(transparent)]
    Index(#[from] ContentHashError),

    /// The caller's context was cancelled or its deadline passed.
    #[error(transparent)]
    Interrupted(#[from] TypeError),
}

/// Result alias for source operations.
pub type SourceResult<T> = Result<T, SourceError>;
