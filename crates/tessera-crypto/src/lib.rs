//! Digest computation for tessera.
//!
//! Wraps established hash implementations (`sha2`, `blake3`) behind a single
//! [`ContentHasher`] that produces `algorithm:hex` [`Digest`] values. No custom
//! cryptography.
//!
//! [`Digest`]: tessera_types::Digest

pub mod hasher;

pub use hasher::ContentHasher;
