use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_cachedb::DEFAULT_GC_BATCH_SIZE;

use crate::error::{MemoError, MemoResult};

/// How calls marked tainted are memoized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaintPolicy {
    /// Always execute; never read or write the call cache.
    #[default]
    Bypass,
    /// Memoize per session: the cache key also covers the session ID.
    Session,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub db_path: PathBuf,
    pub default_ttl_secs: u64,
    pub gc_interval_secs: u64,
    pub gc_batch_size: usize,
    pub taint_policy: TaintPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("tessera-cache.db"),
            default_ttl_secs: 7 * 24 * 60 * 60,
            gc_interval_secs: 10 * 60,
            gc_batch_size: DEFAULT_GC_BATCH_SIZE,
            taint_policy: TaintPolicy::Bypass,
        }
    }
}

impl CacheConfig {
    pub fn from_toml_str(text: &str) -> MemoResult<Self> {
        toml::from_str(text).map_err(|e| MemoError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> MemoResult<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn to_toml_string(&self) -> MemoResult<String> {
        toml::to_string_pretty(self).map_err(|e| MemoError::Config(e.to_string()))
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = CacheConfig::default();
        assert_eq!(c.db_path, PathBuf::from("tessera-cache.db"));
        assert_eq!(c.ttl(), Duration::from_secs(604_800));
        assert_eq!(c.gc_interval(), Duration::from_secs(600));
        assert_eq!(c.gc_batch_size, 1000);
        assert_eq!(c.taint_policy, TaintPolicy::Bypass);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = CacheConfig::from_toml_str(
            r#"
            db_path = "/var/lib/tessera/cache.db"
            taint_policy = "session"
            "#,
        )
        .unwrap();
        assert_eq!(c.db_path, PathBuf::from("/var/lib/tessera/cache.db"));
        assert_eq!(c.taint_policy, TaintPolicy::Session);
        assert_eq!(c.gc_interval_secs, 600);
    }

    #[test]
    fn toml_round_trip() {
        let c = CacheConfig {
            gc_batch_size: 50,
            ..CacheConfig::default()
        };
        let text = c.to_toml_string().unwrap();
        assert_eq!(CacheConfig::from_toml_str(&text).unwrap(), c);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        assert!(matches!(
            CacheConfig::from_toml_str("taint_policy = \"sometimes\""),
            Err(MemoError::Config(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessera.toml");
        std::fs::write(&path, "default_ttl_secs = 60\n").unwrap();
        assert_eq!(CacheConfig::load(&path).unwrap().ttl(), Duration::from_secs(60));
        assert!(matches!(
            CacheConfig::load(dir.path().join("missing.toml")),
            Err(MemoError::Io(_))
        ));
    }
}
