use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{SourceError, SourceResult};
use crate::traits::{Attrs, Identifier, Source, SourceInstance};

const SCHEME_SEPARATOR: &str = "://";

/// Registry of sources keyed by URI scheme.
#[derive(Default)]
pub struct SourceManager {
    sources: HashMap<&'static str, Arc<dyn Source>>,
}

impl SourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under its scheme.
    pub fn register(&mut self, source: Arc<dyn Source>) -> SourceResult<()> {
        let scheme = source.scheme();
        if self.sources.contains_key(scheme) {
            return Err(SourceError::DuplicateScheme(scheme.to_string()));
        }
        self.sources.insert(scheme, source);
        Ok(())
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<&'static str> {
        let mut schemes: Vec<_> = self.sources.keys().copied().collect();
        schemes.sort_unstable();
        schemes
    }

    /// Parse `scheme://reference` with the matching source.
    pub fn identify(&self, uri: &str, attrs: &Attrs) -> SourceResult<Box<dyn Identifier>> {
        let (scheme, reference) = uri
            .split_once(SCHEME_SEPARATOR)
            .ok_or_else(|| SourceError::InvalidUri(uri.to_string()))?;
        let source = self
            .sources
            .get(scheme)
            .ok_or_else(|| SourceError::UnknownScheme(scheme.to_string()))?;
        debug!(scheme, reference, "identify source");
        source.identify(reference, attrs)
    }

    /// Resolve an identifier with the source that produced it.
    pub fn resolve(&self, id: &dyn Identifier) -> SourceResult<Box<dyn SourceInstance>> {
        let source = self
            .sources
            .get(id.scheme())
            .ok_or_else(|| SourceError::UnknownScheme(id.scheme().to_string()))?;
        source.resolve(id)
    }
}

impl std::fmt::Debug for SourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceManager")
            .field("schemes", &self.schemes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{CacheKey, Snapshot};
    use std::any::Any;
    use tessera_types::OpContext;

    #[derive(Debug)]
    struct EchoId(String);

    impl Identifier for EchoId {
        fn scheme(&self) -> &'static str {
            "echo"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Echo;

    struct EchoInstance(String);

    impl SourceInstance for EchoInstance {
        fn cache_key(&self, _cx: &OpContext) -> SourceResult<CacheKey> {
            Ok(CacheKey {
                key: format!("echo:{}", self.0),
                always_reusable: false,
            })
        }
        fn snapshot(&self, _cx: &OpContext) -> SourceResult<Snapshot> {
            Ok(Snapshot {
                record: self.0.clone(),
                location: self.0.clone().into(),
            })
        }
    }

    impl Source for Echo {
        fn scheme(&self) -> &'static str {
            "echo"
        }
        fn identify(&self, reference: &str, _attrs: &Attrs) -> SourceResult<Box<dyn Identifier>> {
            Ok(Box::new(EchoId(reference.to_string())))
        }
        fn resolve(&self, id: &dyn Identifier) -> SourceResult<Box<dyn SourceInstance>> {
            let id = id
                .as_any()
                .downcast_ref::<EchoId>()
                .ok_or(SourceError::WrongIdentifier {
                    expected: "echo",
                    actual: id.scheme(),
                })?;
            Ok(Box::new(EchoInstance(id.0.clone())))
        }
    }

    fn manager() -> SourceManager {
        let mut m = SourceManager::new();
        m.register(Arc::new(Echo)).unwrap();
        m
    }

    #[test]
    fn dispatches_by_scheme() {
        let m = manager();
        let id = m.identify("echo://hello", &Attrs::new()).unwrap();
        assert_eq!(id.scheme(), "echo");
        let inst = m.resolve(id.as_ref()).unwrap();
        assert_eq!(
            inst.cache_key(&OpContext::background()).unwrap().key,
            "echo:hello"
        );
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(matches!(
            manager().identify("docker-image://alpine", &Attrs::new()),
            Err(SourceError::UnknownScheme(s)) if s == "docker-image"
        ));
    }

    #[test]
    fn missing_separator_is_rejected() {
        assert!(matches!(
            manager().identify("echo:hello", &Attrs::new()),
            Err(SourceError::InvalidUri(_))
        ));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut m = manager();
        assert!(matches!(
            m.register(Arc::new(Echo)),
            Err(SourceError::DuplicateScheme(_))
        ));
        assert_eq!(m.schemes(), vec!["echo"]);
    }
}
