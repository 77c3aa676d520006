//! Call identifiers for tessera.
//!
//! A [`CallId`] names a value by the chain of selector calls that produced it:
//! `container.from(address: "alpine").withExec(args: ["ls"])`. Chains are
//! immutable and structurally shared; appending a [`Selector`] allocates one
//! new node that points at the previous chain.
//!
//! # Identity
//!
//! - [`CallId::canonical`] strips meta selectors (labels, descriptions) that
//!   do not affect the produced value.
//! - [`CallId::digest`] hashes the deterministic binary encoding of the chain.
//!   Two IDs are equivalent iff their canonical digests match.
//! - [`CallId::is_tainted`] reports whether any selector in the chain, or any
//!   ID nested in an argument, is non-deterministic.
//!
//! # Wire Form
//!
//! [`encode_wire`] / [`decode_wire`] convert a chain to and from the
//! order-preserving bincode encoding used for digests and handles.

pub mod error;
pub mod id;
pub mod literal;
pub mod wire;

pub use error::{CallError, CallResult};
pub use id::{CallId, Selector};
pub use literal::{Argument, Literal, MAX_NESTING_DEPTH};
pub use wire::{decode_wire, encode_wire};
