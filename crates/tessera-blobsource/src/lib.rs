//! `blob://` source for tessera.
//!
//! A build graph can refer to content by digest alone
//! (`blob://sha256:<hex>`) without naming the call that produced it. The
//! [`BlobSource`] resolves such a reference through the content hash index
//! and materializes any one record that still holds the bytes.
//!
//! Sources plug into a [`SourceManager`] by URI scheme. Each source turns a
//! URI into an [`Identifier`], and an identifier into a [`SourceInstance`]
//! that can report a cache key and produce a [`Snapshot`].

pub mod blob;
pub mod error;
pub mod fs;
pub mod manager;
pub mod traits;

pub use blob::{blob_uri, BlobIdentifier, BlobSource, ATTR_MEDIA_TYPE, ATTR_SIZE, BLOB_SCHEME};
pub use error::{SourceError, SourceResult};
pub use fs::FsMaterializer;
pub use manager::SourceManager;
pub use traits::{Attrs, CacheKey, Identifier, Materializer, Snapshot, Source, SourceInstance};
