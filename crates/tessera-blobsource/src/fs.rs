use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use tessera_contenthash::CacheRefMetadata;
use tessera_crypto::ContentHasher;
use tessera_types::OpContext;

use crate::error::{SourceError, SourceResult};
use crate::traits::{Materializer, Snapshot};

/// Materializes records stored as files named by storage key under a root
/// directory.
///
/// The file's content is re-hashed and must match the record's content hash
/// key; a missing or altered file is a failed candidate.
#[derive(Clone, Debug)]
pub struct FsMaterializer {
    root: PathBuf,
}

impl FsMaterializer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn failed(record: &CacheRefMetadata, reason: impl ToString) -> SourceError {
        SourceError::Materialize {
            record: record.id().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl Materializer for FsMaterializer {
    fn materialize(&self, cx: &OpContext, record: &CacheRefMetadata) -> SourceResult<Snapshot> {
        cx.check()?;
        let expected = record
            .get_content_hash_key(cx)?
            .ok_or_else(|| Self::failed(record, "record has no content hash"))?;

        // Storage keys are digests; reject anything that could escape root.
        let name = record.id();
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(Self::failed(record, "storage key is not a plain file name"));
        }
        let path = self.root.join(name);

        let file = File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Self::failed(record, "content was pruned"),
            _ => Self::failed(record, e),
        })?;
        let actual = ContentHasher::new(expected.algorithm())
            .hash_reader(BufReader::new(file))
            .map_err(|e| Self::failed(record, e))?;
        if actual != expected {
            return Err(Self::failed(
                record,
                format!("content digest {actual} does not match {expected}"),
            ));
        }
        Ok(Snapshot {
            record: name.to_string(),
            location: path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessera_contenthash::{InMemoryMetadataStore, MetadataStore};

    fn cx() -> OpContext {
        OpContext::background()
    }

    fn record(store: &Arc<dyn MetadataStore>, id: &str, content: &[u8]) -> CacheRefMetadata {
        let rec = CacheRefMetadata::new(Arc::clone(store), id);
        rec.set_content_hash_key(&cx(), &ContentHasher::CONTENT.hash(content))
            .unwrap();
        rec
    }

    #[test]
    fn materializes_matching_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sk1"), b"payload").unwrap();
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        let snap = FsMaterializer::new(dir.path())
            .materialize(&cx(), &record(&store, "sk1", b"payload"))
            .unwrap();
        assert_eq!(snap.location, dir.path().join("sk1"));
        assert_eq!(snap.record, "sk1");
    }

    #[test]
    fn missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        let err = FsMaterializer::new(dir.path())
            .materialize(&cx(), &record(&store, "gone", b"payload"))
            .unwrap_err();
        assert!(matches!(err, SourceError::Materialize { reason, .. } if reason.contains("pruned")));
    }

    #[test]
    fn altered_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sk1"), b"tampered").unwrap();
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        assert!(FsMaterializer::new(dir.path())
            .materialize(&cx(), &record(&store, "sk1", b"payload"))
            .is_err());
    }

    #[test]
    fn path_like_keys_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        for id in ["../escape", "a/b", ".."] {
            assert!(FsMaterializer::new(dir.path())
                .materialize(&cx(), &record(&store, id, b"x"))
                .is_err());
        }
    }
}
