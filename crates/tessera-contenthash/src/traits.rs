use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tessera_types::OpContext;

use crate::error::ContentHashResult;

/// One string attribute of a record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub value: String,
    /// Secondary index key this attribute is filed under, if any.
    pub index: Option<String>,
}

/// Attributes attached to one stored result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub id: String,
    pub attrs: BTreeMap<String, Attribute>,
}

impl MetadataRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attrs: BTreeMap::new(),
        }
    }

    /// Value of attribute `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(|a| a.value.as_str())
    }
}

/// Per-record string attributes with a secondary index.
///
/// All implementations must satisfy these invariants:
/// - Setting an attribute replaces its previous value and index entry; a
///   record is never filed under an index key it no longer carries.
/// - `search` returns each matching record once, ordered by record ID.
/// - A search that matches nothing returns an empty list, not an error.
/// - Backend errors are propagated, never retried.
pub trait MetadataStore: Send + Sync {
    /// Read a record. Returns `Ok(None)` if it has no attributes.
    fn get(&self, cx: &OpContext, id: &str) -> ContentHashResult<Option<MetadataRecord>>;

    /// Set attribute `key` of record `id`, optionally filing the record under
    /// the secondary index key `index`.
    fn set_string(
        &self,
        cx: &OpContext,
        id: &str,
        key: &str,
        value: &str,
        index: Option<&str>,
    ) -> ContentHashResult<()>;

    /// Records filed under `index`, or under any key starting with `index`
    /// when `prefix` is set.
    fn search(
        &self,
        cx: &OpContext,
        index: &str,
        prefix: bool,
    ) -> ContentHashResult<Vec<MetadataRecord>>;

    /// Drop a record and its index entries. Returns `true` if it existed.
    fn remove(&self, cx: &OpContext, id: &str) -> ContentHashResult<bool>;

    /// Value of one attribute.
    fn get_string(&self, cx: &OpContext, id: &str, key: &str) -> ContentHashResult<Option<String>> {
        Ok(self
            .get(cx, id)?
            .and_then(|mut r| r.attrs.remove(key))
            .map(|a| a.value))
    }
}
