use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tessera_types::OpContext;

use crate::error::{ContentHashError, ContentHashResult};
use crate::traits::{Attribute, MetadataRecord, MetadataStore};

#[derive(Default)]
struct Inner {
    records: HashMap<String, BTreeMap<String, Attribute>>,
    /// index key -> record IDs
    index: BTreeMap<String, BTreeSet<String>>,
}

impl Inner {
    fn unindex(&mut self, index: &str, id: &str) {
        if let Some(ids) = self.index.get_mut(index) {
            ids.remove(id);
            if ids.is_empty() {
                self.index.remove(index);
            }
        }
    }

    fn record(&self, id: &str) -> Option<MetadataRecord> {
        self.records.get(id).map(|attrs| MetadataRecord {
            id: id.to_string(),
            attrs: attrs.clone(),
        })
    }
}

/// In-memory metadata store for tests and embedding.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    inner: RwLock<Inner>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records with at least one attribute.
    pub fn len(&self) -> ContentHashResult<usize> {
        Ok(self.read()?.records.len())
    }

    pub fn is_empty(&self) -> ContentHashResult<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> ContentHashResult<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| ContentHashError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> ContentHashResult<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| ContentHashError::LockPoisoned(e.to_string()))
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn get(&self, cx: &OpContext, id: &str) -> ContentHashResult<Option<MetadataRecord>> {
        cx.check()?;
        Ok(self.read()?.record(id))
    }

    fn set_string(
        &self,
        cx: &OpContext,
        id: &str,
        key: &str,
        value: &str,
        index: Option<&str>,
    ) -> ContentHashResult<()> {
        cx.check()?;
        let mut inner = self.write()?;
        let previous = inner
            .records
            .entry(id.to_string())
            .or_default()
            .insert(
                key.to_string(),
                Attribute {
                    value: value.to_string(),
                    index: index.map(str::to_string),
                },
            );
        if let Some(old) = previous.and_then(|a| a.index) {
            inner.unindex(&old, id);
        }
        if let Some(index) = index {
            inner
                .index
                .entry(index.to_string())
                .or_default()
                .insert(id.to_string());
        }
        Ok(())
    }

    fn search(
        &self,
        cx: &OpContext,
        index: &str,
        prefix: bool,
    ) -> ContentHashResult<Vec<MetadataRecord>> {
        cx.check()?;
        let inner = self.read()?;
        let mut ids = BTreeSet::new();
        if prefix {
            let range = inner
                .index
                .range::<str, _>((Bound::Included(index), Bound::Unbounded))
                .take_while(|(k, _)| k.starts_with(index));
            for (_, matched) in range {
                ids.extend(matched.iter().cloned());
            }
        } else if let Some(matched) = inner.index.get(index) {
            ids.extend(matched.iter().cloned());
        }
        Ok(ids.iter().filter_map(|id| inner.record(id)).collect())
    }

    fn remove(&self, cx: &OpContext, id: &str) -> ContentHashResult<bool> {
        cx.check()?;
        let mut inner = self.write()?;
        let Some(attrs) = inner.records.remove(id) else {
            return Ok(false);
        };
        for index in attrs.into_values().filter_map(|a| a.index) {
            inner.unindex(&index, id);
        }
        Ok(true)
    }
}

impl std::fmt::Debug for InMemoryMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMetadataStore")
            .field("record_count", &self.len().unwrap_or(0))
            .finish()
    }
}
