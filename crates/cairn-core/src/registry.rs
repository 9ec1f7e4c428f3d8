//! The source registry: the only cache of loaded suite definitions
//!
//! Every load is stamped with a fresh version. After [`SourceRegistry::invalidate`]
//! the old version is no longer current, so a stale definition can be detected
//! and is never handed out again.

use crate::definition::Definition;
use crate::error::SuiteDefinitionError;
use crate::toml_source::TomlLoader;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Turns a path into a definition
pub trait SourceLoader: Send {
    fn load(&self, path: &Path) -> Result<Definition, SuiteDefinitionError>;
}

#[derive(Debug, Clone)]
struct Cached {
    version: u64,
    definition: Arc<Definition>,
}

/// A definition together with the version it was loaded as
#[derive(Debug, Clone)]
pub struct Loaded {
    pub version: u64,
    pub definition: Arc<Definition>,
}

pub struct SourceRegistry {
    loader: Box<dyn SourceLoader>,
    entries: HashMap<PathBuf, Cached>,
    next_version: u64,
}

impl SourceRegistry {
    pub fn new(loader: impl SourceLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            entries: HashMap::new(),
            next_version: 1,
        }
    }

    /// Cached definition for `path`, loading it on first use
    pub fn load(&mut self, path: &Path) -> Result<Loaded, SuiteDefinitionError> {
        let key = registry_key(path);
        if let Some(cached) = self.entries.get(&key) {
            return Ok(Loaded {
                version: cached.version,
                definition: Arc::clone(&cached.definition),
            });
        }

        let definition = Arc::new(self.loader.load(path)?);
        let version = self.next_version;
        self.next_version += 1;
        debug!(path = %key.display(), version, "loaded suite source");

        self.entries.insert(
            key,
            Cached {
                version,
                definition: Arc::clone(&definition),
            },
        );
        Ok(Loaded {
            version,
            definition,
        })
    }

    /// Forget the cached definition; returns whether one was cached
    pub fn invalidate(&mut self, path: &Path) -> bool {
        let removed = self.entries.remove(&registry_key(path)).is_some();
        if removed {
            debug!(path = %path.display(), "invalidated suite source");
        }
        removed
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    /// Whether `version` is still the cached version of `path`
    pub fn is_current(&self, path: &Path, version: u64) -> bool {
        self.entries
            .get(&registry_key(path))
            .is_some_and(|cached| cached.version == version)
    }

    /// Every source file currently cached, sorted
    pub fn loaded_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<_> = self.entries.keys().cloned().collect();
        files.sort();
        files
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new(TomlLoader)
    }
}

/// Canonical form of a path when it exists, the path itself otherwise
pub fn registry_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory loader whose content can be swapped between loads
    struct MemoryLoader {
        sources: Arc<Mutex<HashMap<PathBuf, Vec<&'static str>>>>,
        loads: Arc<AtomicUsize>,
    }

    impl SourceLoader for MemoryLoader {
        fn load(&self, path: &Path) -> Result<Definition, SuiteDefinitionError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let sources = self.sources.lock();
            let names = sources
                .get(path)
                .ok_or_else(|| SuiteDefinitionError::MissingPath(path.to_path_buf()))?;
            Ok(names
                .iter()
                .fold(Definition::new(), |def, name| def.test(*name, |_| Ok(()))))
        }
    }

    fn registry() -> (SourceRegistry, Arc<Mutex<HashMap<PathBuf, Vec<&'static str>>>>, Arc<AtomicUsize>) {
        let sources = Arc::new(Mutex::new(HashMap::new()));
        let loads = Arc::new(AtomicUsize::new(0));
        let registry = SourceRegistry::new(MemoryLoader {
            sources: Arc::clone(&sources),
            loads: Arc::clone(&loads),
        });
        (registry, sources, loads)
    }

    fn names(loaded: &Loaded) -> Vec<String> {
        loaded
            .definition
            .entries()
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }

    #[test]
    fn test_load_is_cached() {
        let (mut registry, sources, loads) = registry();
        sources.lock().insert(PathBuf::from("mem/a"), vec!["one"]);

        let first = registry.load(Path::new("mem/a")).unwrap();
        let second = registry.load(Path::new("mem/a")).unwrap();

        assert_eq!(first.version, second.version);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(registry.loaded_files(), vec![PathBuf::from("mem/a")]);
    }

    #[test]
    fn test_invalidate_discards_stale_definition() {
        let (mut registry, sources, _) = registry();
        sources.lock().insert(PathBuf::from("mem/a"), vec!["old"]);
        let stale = registry.load(Path::new("mem/a")).unwrap();

        sources.lock().insert(PathBuf::from("mem/a"), vec!["new"]);
        assert!(registry.invalidate(Path::new("mem/a")));
        assert!(!registry.is_current(Path::new("mem/a"), stale.version));

        let fresh = registry.load(Path::new("mem/a")).unwrap();
        assert!(fresh.version > stale.version);
        assert_eq!(names(&fresh), vec!["new"]);
        assert!(registry.is_current(Path::new("mem/a"), fresh.version));
    }

    #[test]
    fn test_failed_load_is_not_cached() {
        let (mut registry, _, loads) = registry();
        assert!(registry.load(Path::new("mem/missing")).is_err());
        assert!(registry.load(Path::new("mem/missing")).is_err());
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert!(registry.loaded_files().is_empty());
    }

    #[test]
    fn test_invalidate_all() {
        let (mut registry, sources, _) = registry();
        sources.lock().insert(PathBuf::from("mem/a"), vec!["x"]);
        sources.lock().insert(PathBuf::from("mem/b"), vec!["y"]);
        registry.load(Path::new("mem/a")).unwrap();
        registry.load(Path::new("mem/b")).unwrap();

        registry.invalidate_all();
        assert!(registry.loaded_files().is_empty());
        assert!(!registry.invalidate(Path::new("mem/a")));
    }
}
