use std::fmt;
use std::sync::Arc;

use tessera_types::{Algorithm, Digest, OpContext};
use tracing::debug;

use crate::error::{ContentHashError, ContentHashResult};
use crate::traits::MetadataStore;

/// Attribute holding the hex part of a record's content digest.
pub const CONTENT_HASH_ATTR: &str = "tessera.contentHashKey";

/// Prefix of the secondary index key for content digests.
pub const CONTENT_HASH_INDEX_PREFIX: &str = "content-hash:";

fn index_key(digest: &Digest) -> String {
    format!("{CONTENT_HASH_INDEX_PREFIX}{}", digest.encoded())
}

/// Typed view over the metadata record of one stored result.
///
/// The record ID is the storage key the call cache hands out.
#[derive(Clone)]
pub struct CacheRefMetadata {
    store: Arc<dyn MetadataStore>,
    id: String,
}

impl CacheRefMetadata {
    pub fn new(store: Arc<dyn MetadataStore>, id: impl Into<String>) -> Self {
        Self {
            store,
            id: id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// Annotate the record with its content digest.
    ///
    /// Writes the attribute and files the record under the digest's index
    /// key. Calling it again overwrites both. Only the canonical algorithm is
    /// accepted, since the stored form drops the algorithm name.
    pub fn set_content_hash_key(&self, cx: &OpContext, digest: &Digest) -> ContentHashResult<()> {
        if digest.algorithm() != Algorithm::CANONICAL {
            return Err(ContentHashError::NonCanonicalDigest(digest.clone()));
        }
        self.store.set_string(
            cx,
            &self.id,
            CONTENT_HASH_ATTR,
            digest.encoded(),
            Some(&index_key(digest)),
        )
    }

    /// The content digest recorded by [`CacheRefMetadata::set_content_hash_key`].
    pub fn get_content_hash_key(&self, cx: &OpContext) -> ContentHashResult<Option<Digest>> {
        let Some(hex) = self.store.get_string(cx, &self.id, CONTENT_HASH_ATTR)? else {
            return Ok(None);
        };
        Digest::from_encoded(Algorithm::CANONICAL, &hex)
            .map(Some)
            .map_err(|source| ContentHashError::CorruptAttribute {
                record: self.id.clone(),
                source,
            })
    }
}

impl fmt::Debug for CacheRefMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRefMetadata")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Every record annotated with `digest`.
///
/// An empty list means there is no dedup candidate. A digest with a
/// non-canonical algorithm can never have been recorded and also yields an
/// empty list.
pub fn search_content_hash(
    store: &Arc<dyn MetadataStore>,
    cx: &OpContext,
    digest: &Digest,
) -> ContentHashResult<Vec<CacheRefMetadata>> {
    if digest.algorithm() != Algorithm::CANONICAL {
        debug!(%digest, "non-canonical digest has no content hash entries");
        return Ok(Vec::new());
    }
    let records = store.search(cx, &index_key(digest), false)?;
    debug!(%digest, candidates = records.len(), "content hash search");
    Ok(records
        .into_iter()
        .map(|r| CacheRefMetadata::new(Arc::clone(store), r.id))
        .collect())
}
