//! Content hash index for tessera.
//!
//! Results produced by different calls can be byte-identical. This crate
//! annotates the metadata record of each stored result with the SHA-256 digest
//! of its content, both as a plain attribute and as a secondary index entry,
//! so that a later reference to "content with digest D" can find every record
//! holding it.
//!
//! - [`MetadataStore`] -- key/value attributes per record with an optional
//!   secondary index per attribute
//! - [`InMemoryMetadataStore`] / [`SqliteMetadataStore`] -- backends
//! - [`CacheRefMetadata`] -- typed view over one record
//! - [`search_content_hash`] -- dedup candidates for a digest

pub mod error;
pub mod index;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use error::{ContentHashError, ContentHashResult};
pub use index::{search_content_hash, CacheRefMetadata, CONTENT_HASH_ATTR, CONTENT_HASH_INDEX_PREFIX};
pub use memory::InMemoryMetadataStore;
pub use sqlite::SqliteMetadataStore;
pub use traits::{Attribute, MetadataRecord, MetadataStore};
