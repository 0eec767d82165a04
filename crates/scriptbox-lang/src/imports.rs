//! Controlled import resolver.
//!
//! `import` and `from ... import` are the only way a script reaches a module.
//! Names must be on the allow-list; each allowed module is loaded at most
//! once per resolver and every later import returns the same handle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use scriptbox_core::config::SandboxConfig;
use tracing::debug;

use crate::error::{ExcKind, ExecResult, Exception};
use crate::modules;
use crate::value::Module;

/// Builds a fresh native module.
pub type ModuleFactory = fn() -> Module;

/// Executes the source of a script module. Implemented by the interpreter.
pub trait ModuleLoader {
    fn load_source(&mut self, name: &str, source: &str, path: &Path) -> ExecResult<Arc<Module>>;
}

pub struct ImportResolver {
    allowed: Vec<String>,
    natives: HashMap<String, ModuleFactory>,
    search_paths: Vec<PathBuf>,
    cache: Mutex<HashMap<String, Arc<Module>>>,
}

impl ImportResolver {
    /// Resolver with the built-in native modules registered.
    pub fn new(allowed: Vec<String>, search_paths: Vec<PathBuf>) -> Self {
        let natives = modules::NATIVE_MODULES
            .iter()
            .map(|(name, factory)| (name.to_string(), *factory))
            .collect();
        Self {
            allowed,
            natives,
            search_paths,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(config.allowed_modules(), config.module_paths())
    }

    /// Register an extra native module. It still has to be allow-listed.
    pub fn with_native(mut self, name: impl Into<String>, factory: ModuleFactory) -> Self {
        self.natives.insert(name.into(), factory);
        self
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowed.iter().any(|a| a == name)
    }

    /// Handle of an already loaded module.
    pub fn cached(&self, name: &str) -> Option<Arc<Module>> {
        self.cache.lock().get(name).cloned()
    }

    pub fn resolve(&self, name: &str, loader: &mut dyn ModuleLoader) -> ExecResult<Arc<Module>> {
        if !self.is_allowed(name) {
            debug!(module = name, "import denied");
            return Err(Exception::new(
                ExcKind::ImportDenied,
                format!("'{}' is not configured as a supported import module", name),
            ));
        }
        if let Some(module) = self.cached(name) {
            return Ok(module);
        }

        // Loading runs without the cache lock; a script module may import
        // other modules while it executes.
        let module = if let Some(factory) = self.natives.get(name) {
            Arc::new(factory())
        } else if let Some(path) = self.locate(name) {
            let source = std::fs::read_to_string(&path).map_err(|e| {
                Exception::new(
                    ExcKind::ImportError,
                    format!("cannot read module '{}': {}", name, e),
                )
            })?;
            debug!(module = name, path = %path.display(), "loading script module");
            loader.load_source(name, &source, &path)?
        } else {
            return Err(Exception::new(
                ExcKind::ModuleNotFoundError,
                format!("No module named '{}'", name),
            ));
        };

        let mut cache = self.cache.lock();
        Ok(cache.entry(name.to_string()).or_insert(module).clone())
    }

    fn locate(&self, name: &str) -> Option<PathBuf> {
        let relative = format!("{}.py", name.replace('.', "/"));
        self.search_paths
            .iter()
            .map(|dir| dir.join(&relative))
            .find(|p| p.is_file())
    }
}

impl std::fmt::Debug for ImportResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportResolver")
            .field("allowed", &self.allowed)
            .field("search_paths", &self.search_paths)
            .field("cached", &self.cache.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Namespace, Value};

    struct CountingLoader {
        loads: usize,
    }

    impl ModuleLoader for CountingLoader {
        fn load_source(&mut self, name: &str, source: &str, _path: &Path) -> ExecResult<Arc<Module>> {
            self.loads += 1;
            let mut ns = Namespace::new();
            ns.insert("source".into(), Value::str(source.trim()));
            Ok(Arc::new(Module::new(name, ns)))
        }
    }

    #[test]
    fn names_off_the_list_are_denied() {
        let resolver = ImportResolver::new(vec!["math".into()], vec![]);
        let mut loader = CountingLoader { loads: 0 };
        let err = resolver.resolve("os", &mut loader).unwrap_err();
        assert_eq!(err.kind, ExcKind::ImportDenied);
        assert!(err.message.contains("'os'"));
    }

    #[test]
    fn native_modules_are_cached_per_resolver() {
        let resolver = ImportResolver::new(vec!["math".into()], vec![]);
        let mut loader = CountingLoader { loads: 0 };
        let a = resolver.resolve("math", &mut loader).unwrap();
        let b = resolver.resolve("math", &mut loader).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = ImportResolver::new(vec!["math".into()], vec![]);
        let c = other.resolve("math", &mut loader).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn allowed_but_missing_module_is_not_found() {
        let resolver = ImportResolver::new(vec!["nothere".into()], vec![]);
        let mut loader = CountingLoader { loads: 0 };
        let err = resolver.resolve("nothere", &mut loader).unwrap_err();
        assert_eq!(err.kind, ExcKind::ModuleNotFoundError);
    }

    #[test]
    fn script_modules_load_once_from_search_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg")).unwrap();
        std::fs::write(dir.path().join("pkg/helpers.py"), "x = 1\n").unwrap();

        let resolver = ImportResolver::new(
            vec!["pkg.helpers".into()],
            vec![PathBuf::from("/does/not/exist"), dir.path().to_path_buf()],
        );
        let mut loader = CountingLoader { loads: 0 };
        let a = resolver.resolve("pkg.helpers", &mut loader).unwrap();
        let b = resolver.resolve("pkg.helpers", &mut loader).unwrap();
        assert_eq!(loader.loads, 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.get("source").unwrap().to_str(), "x = 1");
    }
}
