use tessera_call::CallError;

/// Errors from handle encoding and decoding.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HandleError {
    /// The text is not valid URL-safe base64 (bad alphabet, bad padding,
    /// truncated).
    #[error("invalid handle encoding: {0}")]
    Base64(String),

    /// The decoded bytes are not a valid call encoding, or the call cannot
    /// be encoded deterministically.
    #[error(transparent)]
    Call(#[from] CallError),

    /// The handle names a different result type than the one requested.
    #[error("handle type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Inline payload serialization failure.
    #[error("inline payload error: {0}")]
    Payload(String),
}

/// Convenience alias for handle results.
pub type HandleResult<T> = Result<T, HandleError>;
