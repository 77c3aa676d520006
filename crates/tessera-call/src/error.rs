//! Error types for call identifier operations.

use thiserror::Error;

/// Errors that can occur while encoding, decoding, or digesting a call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallError {
    /// A float argument is NaN and has no single deterministic encoding.
    #[error("argument {path} is NaN and cannot be encoded deterministically")]
    NanFloat { path: String },

    /// Two arguments or object fields share a name, making their order
    /// significant where it must not be.
    #[error("duplicate field {name:?} in {path}")]
    DuplicateField { path: String, name: String },

    /// Lists, objects or nested calls are nested beyond the supported depth.
    #[error("argument {path} nests deeper than {limit} levels")]
    NestingTooDeep { path: String, limit: usize },

    /// The binary encoding could not be produced.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The binary encoding could not be parsed.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

/// Convenience alias for call results.
pub type CallResult<T> = Result<T, CallError>;
