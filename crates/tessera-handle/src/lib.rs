//! Opaque resource handles for tessera.
//!
//! Clients never see a [`CallId`] directly. They see a handle: the call's
//! deterministic binary encoding rendered as URL-safe, padded base64. Handles
//! are produced only by this crate and consumed only by decoding them back.
//!
//! - [`ResourceHandle<T>`] — a call handle tagged with the result type `T`
//! - [`InlineHandle`] — a value whose identity is its data, not a call graph
//! - [`encode_id`] / [`decode_id`] — untyped conversions; the empty string
//!   decodes to `None` ("no ID")
//!
//! [`CallId`]: tessera_call::CallId

pub mod error;
pub mod handle;
pub mod inline;

pub use error::{HandleError, HandleResult};
pub use handle::{decode_id, encode_id, ResourceHandle, Typed};
pub use inline::InlineHandle;
