//! Module resolver & cache (component H): `require`/`include` search
//! order, an mtime-validated AST cache, per-interpreter `require` result
//! memoization, and cycle detection.

use crate::syntax::ast::Block;
use crate::syntax::parser::{self, ParseError};
use crate::vfs::Vfs;
use duso_value::Value;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module '{name}' not found; searched: {searched}")]
    NotFound { name: String, searched: String },
    #[error("circular require/include detected: {0}")]
    Cycle(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

struct CacheEntry {
    ast: Arc<Block>,
    mtime: Option<SystemTime>,
    /// Memoized `require` result for this path, shared by every
    /// evaluator spawned off the same [`Resolver`] instance (i.e. one
    /// interpreter process). `include` never populates or reads this.
    result: Option<Value>,
}

thread_local! {
    /// Per-goroutine loading stack used for cycle detection. Scoped to the
    /// current OS thread since every invocation runs on its own dedicated
    /// `spawn_blocking` task — the Rust analogue of goroutine-local state.
    static LOADING_STACK: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Resolves `require(name)`/`include(name)` against the four-stage search
/// order and caches parsed ASTs by absolute path, re-stat'ing on reuse.
pub struct Resolver {
    vfs: Arc<Vfs>,
    lib_dirs: Vec<String>,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

pub enum LoadKind {
    /// `require`: executes in a fresh scope; the last expression's value
    /// is memoized per absolute path.
    Require,
    /// `include`: executes in the caller's own environment; never
    /// memoized.
    Include,
}

pub struct Loaded {
    pub absolute_path: String,
    pub ast: Arc<Block>,
    /// `Some` only for `require` when a prior load already memoized a
    /// result — the caller should skip evaluation and reuse this value.
    pub cached_result: Option<Value>,
}

impl Resolver {
    pub fn new(vfs: Arc<Vfs>, lib_dirs: Vec<String>) -> Self {
        Self {
            vfs,
            lib_dirs,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Candidate roots to search, in order, for a bare module name.
    fn search_roots(&self, name: &str, current_script_dir: Option<&str>) -> Vec<String> {
        if name.starts_with('/') || name.starts_with('~') {
            return vec![name.to_string()];
        }
        let mut roots = Vec::new();
        if let Some(dir) = current_script_dir {
            roots.push(format!("{}/{}", dir.trim_end_matches('/'), name));
        }
        for lib in &self.lib_dirs {
            roots.push(format!("{}/{}", lib.trim_end_matches('/'), name));
        }
        roots.push(format!("/EMBED/stdlib/{name}"));
        roots.push(format!("/EMBED/contrib/{name}"));
        roots
    }

    /// For each root, tries the literal path, `<root>.du`, and the
    /// directory-style `<root>/<basename>.du`; first existing regular
    /// file wins.
    fn find_existing(&self, name: &str, current_script_dir: Option<&str>) -> Result<String, ModuleError> {
        let roots = self.search_roots(name, current_script_dir);
        let mut tried = Vec::new();
        for root in &roots {
            let basename = root.rsplit('/').next().unwrap_or(root);
            let candidates = [
                root.clone(),
                format!("{root}.du"),
                format!("{}/{}.du", root.trim_end_matches('/'), basename),
            ];
            for candidate in candidates {
                tried.push(candidate.clone());
                if self.vfs.exists(&candidate) && !self.vfs.is_dir(&candidate) {
                    return Ok(candidate);
                }
            }
        }
        Err(ModuleError::NotFound {
            name: name.to_string(),
            searched: tried.join(", "),
        })
    }

    /// Resolves and parses `name`, consulting/populating the AST cache.
    /// Re-stats the resolved path on every call; a changed mtime triggers
    /// a reparse. Embedded paths report a fixed mtime and are never
    /// reparsed once loaded.
    ///
    /// This is the `require`/`include` path: `name` is a *bare module
    /// name* resolved through the four-stage search order in
    /// [`Resolver::search_roots`]. `run`/`spawn` and the HTTP dispatcher
    /// address a concrete script path instead — see [`Resolver::load_path`].
    pub fn load(
        &self,
        name: &str,
        current_script_dir: Option<&str>,
        kind: LoadKind,
    ) -> Result<Loaded, ModuleError> {
        let path = self.find_existing(name, current_script_dir)?;
        self.load_resolved(&path, name, kind)
    }

    /// Resolves and parses a concrete path directly through the VFS, with
    /// no bare-name search order — the path is taken exactly as given
    /// (the VFS's own OS backend resolves a relative path against the
    /// process's working directory). Used by the invocation subsystem
    /// (`run`/`spawn`) and the HTTP dispatcher, which each already hold a
    /// specific script path rather than a name to search for, but still
    /// want the mtime-validated AST cache `require`/`include` share.
    pub fn load_path(&self, path: &str) -> Result<Loaded, ModuleError> {
        if !self.vfs.exists(path) {
            return Err(ModuleError::NotFound { name: path.to_string(), searched: path.to_string() });
        }
        self.load_resolved(path, path, LoadKind::Include)
    }

    fn load_resolved(&self, path: &str, name: &str, kind: LoadKind) -> Result<Loaded, ModuleError> {
        LOADING_STACK.with(|stack| -> Result<(), ModuleError> {
            let stack_ref = stack.borrow();
            if stack_ref.iter().any(|p| p == path) {
                let mut chain = stack_ref.clone();
                chain.push(path.to_string());
                return Err(ModuleError::Cycle(chain.join(" -> ")));
            }
            Ok(())
        })?;

        let current_mtime = self.vfs.mtime(path);
        let mut cache = self.cache.lock();
        let needs_parse = match cache.get(path) {
            Some(entry) => entry.mtime != current_mtime,
            None => true,
        };
        if needs_parse {
            debug!(path, "parsing module (cache miss or mtime changed)");
            let source = self
                .vfs
                .read(path)
                .map_err(|e| ModuleError::NotFound { name: name.to_string(), searched: e.to_string() })?;
            let ast = Arc::new(parser::parse_program(&source, path)?);
            cache.insert(
                path.to_string(),
                CacheEntry {
                    ast,
                    mtime: current_mtime,
                    result: None,
                },
            );
        }

        let entry = cache.get(path).expect("just inserted or already present");
        let cached_result = match kind {
            LoadKind::Require => entry.result.clone(),
            LoadKind::Include => None,
        };
        Ok(Loaded {
            absolute_path: path.to_string(),
            ast: entry.ast.clone(),
            cached_result,
        })
    }

    /// Memoizes a `require` result for `path`. Subsequent `require` calls
    /// in this interpreter instance return a deep copy of this value
    /// without re-evaluating the module body.
    pub fn memoize(&self, path: &str, result: Value) {
        if let Some(entry) = self.cache.lock().get_mut(path) {
            entry.result = Some(result);
        }
    }

    /// Pushes `path` onto the current goroutine's loading stack for the
    /// duration of `body`, popping it afterward even on error.
    pub fn with_loading<T>(&self, path: &str, body: impl FnOnce() -> T) -> T {
        LOADING_STACK.with(|stack| stack.borrow_mut().push(path.to_string()));
        let result = body();
        LOADING_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duso_datastore::Registry;

    fn resolver_with_file(contents: &str) -> (tempfile::TempDir, Resolver) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.du"), contents).unwrap();
        let registry = Arc::new(Registry::new());
        let vfs = Arc::new(Vfs::new(registry, false));
        let resolver = Resolver::new(vfs, vec![]);
        (dir, resolver)
    }

    #[test]
    fn resolves_relative_to_current_script_dir() {
        let (dir, resolver) = resolver_with_file("var x = 1");
        let loaded = resolver
            .load("m", Some(dir.path().to_str().unwrap()), LoadKind::Require)
            .unwrap();
        assert_eq!(loaded.ast.len(), 1);
        assert!(loaded.cached_result.is_none());
    }

    #[test]
    fn require_result_is_memoized_and_reused() {
        let (dir, resolver) = resolver_with_file("var x = 1");
        let loaded = resolver
            .load("m", Some(dir.path().to_str().unwrap()), LoadKind::Require)
            .unwrap();
        resolver.memoize(&loaded.absolute_path, Value::Number(42.0));
        let second = resolver
            .load("m", Some(dir.path().to_str().unwrap()), LoadKind::Require)
            .unwrap();
        assert_eq!(second.cached_result.unwrap().as_number(), Some(42.0));
    }

    #[test]
    fn include_never_returns_a_memoized_result() {
        let (dir, resolver) = resolver_with_file("var x = 1");
        let loaded = resolver
            .load("m", Some(dir.path().to_str().unwrap()), LoadKind::Require)
            .unwrap();
        resolver.memoize(&loaded.absolute_path, Value::Number(42.0));
        let included = resolver
            .load("m", Some(dir.path().to_str().unwrap()), LoadKind::Include)
            .unwrap();
        assert!(included.cached_result.is_none());
    }

    #[test]
    fn not_found_lists_searched_paths() {
        let registry = Arc::new(Registry::new());
        let vfs = Arc::new(Vfs::new(registry, false));
        let resolver = Resolver::new(vfs, vec![]);
        let err = resolver.load("missing", None, LoadKind::Require).unwrap_err();
        match err {
            ModuleError::NotFound { searched, .. } => assert!(!searched.is_empty()),
            _ => panic!("expected NotFound"),
        }
    }

    #[test]
    fn load_path_resolves_a_concrete_path_with_no_search_order() {
        let (dir, resolver) = resolver_with_file("var x = 1");
        let path = dir.path().join("m.du");
        let loaded = resolver.load_path(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.ast.len(), 1);
        assert!(loaded.cached_result.is_none(), "load_path never participates in require memoization");
    }

    #[test]
    fn load_path_shares_the_ast_cache_with_load() {
        let (dir, resolver) = resolver_with_file("var x = 1");
        let dir_str = dir.path().to_str().unwrap().to_string();
        let via_name = resolver.load("m", Some(&dir_str), LoadKind::Require).unwrap();
        let via_path = resolver.load_path(&via_name.absolute_path).unwrap();
        assert!(Arc::ptr_eq(&via_name.ast, &via_path.ast), "same absolute path must hit the same cache entry");
    }

    #[test]
    fn load_path_reports_not_found_for_a_missing_file() {
        let registry = Arc::new(Registry::new());
        let vfs = Arc::new(Vfs::new(registry, false));
        let resolver = Resolver::new(vfs, vec![]);
        let err = resolver.load_path("/nonexistent/script.du").unwrap_err();
        assert!(matches!(err, ModuleError::NotFound { .. }));
    }

    #[test]
    fn reentering_a_loading_path_is_a_cycle() {
        let (dir, resolver) = resolver_with_file("var x = 1");
        let dir_str = dir.path().to_str().unwrap().to_string();
        let result = resolver.with_loading(&format!("{dir_str}/m.du"), || {
            resolver.load("m", Some(&dir_str), LoadKind::Require)
        });
        assert!(matches!(result, Err(ModuleError::Cycle(_))));
    }
}
