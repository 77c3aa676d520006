use std::any::Any;
use std::sync::Arc;

use tessera_contenthash::{search_content_hash, MetadataStore};
use tessera_types::{Digest, OpContext};
use tracing::{debug, warn};

use crate::error::{SourceError, SourceResult};
use crate::traits::{Attrs, CacheKey, Identifier, Materializer, Snapshot, Source, SourceInstance};

pub const BLOB_SCHEME: &str = "blob";

/// Optional media type of the referenced content.
pub const ATTR_MEDIA_TYPE: &str = "blob.mediatype";

/// Optional size in bytes of the referenced content.
pub const ATTR_SIZE: &str = "blob.size";

/// `blob://<digest>` for `digest`.
pub fn blob_uri(digest: &Digest) -> String {
    format!("{BLOB_SCHEME}://{digest}")
}

/// A parsed `blob://` reference.
///
/// The digest is the whole identity; media type and size are descriptive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobIdentifier {
    pub digest: Digest,
    pub media_type: Option<String>,
    pub size: Option<u64>,
}

impl BlobIdentifier {
    pub fn new(digest: Digest) -> Self {
        Self {
            digest,
            media_type: None,
            size: None,
        }
    }

    /// Parse a full `blob://` URI.
    pub fn parse(uri: &str, attrs: &Attrs) -> SourceResult<Self> {
        let reference = uri
            .strip_prefix(BLOB_SCHEME)
            .and_then(|rest| rest.strip_prefix("://"))
            .ok_or_else(|| SourceError::InvalidUri(uri.to_string()))?;
        Self::from_reference(reference, attrs)
    }

    fn from_reference(reference: &str, attrs: &Attrs) -> SourceResult<Self> {
        let digest = Digest::parse(reference).map_err(|source| SourceError::InvalidDigest {
            uri: format!("{BLOB_SCHEME}://{reference}"),
            source,
        })?;
        let mut id = Self::new(digest);
        for (key, value) in attrs {
            match key.as_str() {
                ATTR_MEDIA_TYPE => id.media_type = Some(value.clone()),
                ATTR_SIZE => {
                    id.size = Some(value.parse().map_err(|_| SourceError::InvalidAttribute {
                        key: key.clone(),
                        value: value.clone(),
                    })?)
                }
                _ => debug!(key = %key, "ignoring blob attribute"),
            }
        }
        Ok(id)
    }

    pub fn uri(&self) -> String {
        blob_uri(&self.digest)
    }
}

impl Identifier for BlobIdentifier {
    fn scheme(&self) -> &'static str {
        BLOB_SCHEME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Resolves content digests through the content hash index.
#[derive(Clone)]
pub struct BlobSource {
    index: Arc<dyn MetadataStore>,
    materializer: Arc<dyn Materializer>,
}

impl BlobSource {
    pub fn new(index: Arc<dyn MetadataStore>, materializer: Arc<dyn Materializer>) -> Self {
        Self {
            index,
            materializer,
        }
    }

    /// Resolve a blob identifier directly.
    pub fn resolve_blob(&self, id: &BlobIdentifier) -> BlobInstance {
        BlobInstance {
            id: id.clone(),
            source: self.clone(),
        }
    }
}

impl Source for BlobSource {
    fn scheme(&self) -> &'static str {
        BLOB_SCHEME
    }

    fn identify(&self, reference: &str, attrs: &Attrs) -> SourceResult<Box<dyn Identifier>> {
        Ok(Box::new(BlobIdentifier::from_reference(reference, attrs)?))
    }

    fn resolve(&self, id: &dyn Identifier) -> SourceResult<Box<dyn SourceInstance>> {
        let blob = id
            .as_any()
            .downcast_ref::<BlobIdentifier>()
            .ok_or(SourceError::WrongIdentifier {
                expected: BLOB_SCHEME,
                actual: id.scheme(),
            })?;
        Ok(Box::new(self.resolve_blob(blob)))
    }
}

impl std::fmt::Debug for BlobSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobSource").finish_non_exhaustive()
    }
}

/// A resolved blob reference.
pub struct BlobInstance {
    id: BlobIdentifier,
    source: BlobSource,
}

impl BlobInstance {
    pub fn identifier(&self) -> &BlobIdentifier {
        &self.id
    }
}

impl SourceInstance for BlobInstance {
    fn cache_key(&self, _cx: &OpContext) -> SourceResult<CacheKey> {
        Ok(CacheKey {
            key: format!("{BLOB_SCHEME}:{}", self.id.digest),
            always_reusable: true,
        })
    }

    /// Materialize any one record holding the digest.
    ///
    /// Candidates are tried in index order. A candidate that fails is logged
    /// and skipped; if none succeeds the digest is reported as not found.
    fn snapshot(&self, cx: &OpContext) -> SourceResult<Snapshot> {
        let digest = &self.id.digest;
        let candidates = search_content_hash(&self.source.index, cx, digest)?;
        for candidate in &candidates {
            match self.source.materializer.materialize(cx, candidate) {
                Ok(snapshot) => {
                    debug!(%digest, record = candidate.id(), "materialized blob");
                    return Ok(snapshot);
                }
                Err(SourceError::Interrupted(reason)) => return Err(reason.into()),
                Err(err) => {
                    warn!(%digest, record = candidate.id(), error = %err, "blob candidate failed");
                }
            }
        }
        Err(SourceError::ContentNotFound(digest.clone()))
    }
}
