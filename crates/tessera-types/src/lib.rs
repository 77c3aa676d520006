//! Foundation types for tessera.
//!
//! This crate provides the identity, temporal, and control types shared by the
//! call-cache crates. Every other tessera crate depends on `tessera-types`.
//!
//! # Key Types
//!
//! - [`Digest`] — `algorithm:hex` content address (call digests and content digests)
//! - [`Algorithm`] — Supported digest algorithms
//! - [`OpContext`] — Caller-supplied deadline and cancellation signal
//! - [`unix_now`] / [`expiration_after`] — Epoch-second time helpers

pub mod context;
pub mod digest;
pub mod error;
pub mod time;

pub use context::OpContext;
pub use digest::{Algorithm, Digest};
pub use error::TypeError;
pub use time::{expiration_after, format_epoch, unix_now};
