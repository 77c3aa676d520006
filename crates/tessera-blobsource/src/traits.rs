use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use tessera_contenthash::CacheRefMetadata;
use tessera_types::OpContext;

use crate::error::SourceResult;

/// Extra key/value attributes attached to a source URI.
pub type Attrs = BTreeMap<String, String>;

/// A parsed source reference.
pub trait Identifier: fmt::Debug + Send + Sync {
    /// Scheme of the source that produced this identifier.
    fn scheme(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;
}

/// Key under which a solver may memoize a resolved source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheKey {
    pub key: String,
    /// The key identifies the content itself, so a cached result can be
    /// reused without re-checking the source.
    pub always_reusable: bool,
}

/// Materialized content of one cache record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    /// Record (storage key) the content was taken from.
    pub record: String,
    /// Where the content is available.
    pub location: PathBuf,
}

/// A pluggable source backend, selected by URI scheme.
pub trait Source: Send + Sync {
    fn scheme(&self) -> &'static str;

    /// Parse the part of a URI after `scheme://`.
    fn identify(&self, reference: &str, attrs: &Attrs) -> SourceResult<Box<dyn Identifier>>;

    /// Prepare an identifier produced by [`Source::identify`] for use.
    fn resolve(&self, id: &dyn Identifier) -> SourceResult<Box<dyn SourceInstance>>;
}

/// A resolved source reference.
pub trait SourceInstance: Send + Sync {
    fn cache_key(&self, cx: &OpContext) -> SourceResult<CacheKey>;

    fn snapshot(&self, cx: &OpContext) -> SourceResult<Snapshot>;
}

/// Turns a metadata record into usable content.
///
/// Fails when the record's underlying storage is gone.
pub trait Materializer: Send + Sync {
    fn materialize(&self, cx: &OpContext, record: &CacheRefMetadata) -> SourceResult<Snapshot>;
}
