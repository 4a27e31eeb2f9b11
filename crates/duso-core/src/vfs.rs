//! Path / VFS abstraction (component I): a single read/write interface
//! over three backends, selected by the path's prefix. `/EMBED/` is the
//! compiled-in read-only standard library; `/STORE/` is backed by the
//! `vfs` datastore namespace (component F); everything else is a real OS
//! path, with `~` expanded to the user's home directory.

use duso_datastore::Registry;
use duso_value::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("{0}: no such file")]
    NotFound(String),
    #[error("{0}: is read-only")]
    ReadOnly(String),
    #[error("filesystem writes are disabled (--no-fs-writes)")]
    WritesDisabled,
    #[error("'**' globs are not supported")]
    DoubleStarGlob,
    #[error("destination '{0}' must be an existing directory for a multi-file move/copy")]
    DestinationNotDirectory(String),
    #[error(transparent)]
    Datastore(#[from] duso_datastore::DatastoreError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Per-backend operations. Glob matching (`*`/`?`, `**` rejected) is
/// implemented once at the [`Vfs`] dispatch layer rather than per backend,
/// since it only needs `list_all` plus a pattern matcher.
pub trait Backend: Send + Sync {
    fn read(&self, path: &str) -> Result<String, VfsError>;
    fn write(&self, path: &str, contents: &str) -> Result<(), VfsError>;
    fn append(&self, path: &str, contents: &str) -> Result<(), VfsError>;
    fn exists(&self, path: &str) -> bool;
    fn mtime(&self, path: &str) -> Option<SystemTime>;
    fn remove(&self, path: &str) -> Result<(), VfsError>;
    fn is_dir(&self, path: &str) -> bool;
    fn list_all(&self, dir: &str) -> Vec<String>;
}

/// Real OS filesystem. `writes_disabled` backs `--no-fs-writes`: reads
/// still work, but `write`/`append`/`remove` are rejected, restricting
/// scripts to `/STORE/` for any mutation.
pub struct OsBackend {
    pub writes_disabled: bool,
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches('/'));
        }
    }
    PathBuf::from(path)
}

impl Backend for OsBackend {
    fn read(&self, path: &str) -> Result<String, VfsError> {
        std::fs::read_to_string(expand_home(path))
            .map_err(|_| VfsError::NotFound(path.to_string()))
    }

    fn write(&self, path: &str, contents: &str) -> Result<(), VfsError> {
        if self.writes_disabled {
            return Err(VfsError::WritesDisabled);
        }
        let p = expand_home(path);
        if let Some(parent) = p.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(p, contents)?;
        Ok(())
    }

    fn append(&self, path: &str, contents: &str) -> Result<(), VfsError> {
        if self.writes_disabled {
            return Err(VfsError::WritesDisabled);
        }
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(expand_home(path))?;
        f.write_all(contents.as_bytes())?;
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        expand_home(path).exists()
    }

    fn mtime(&self, path: &str) -> Option<SystemTime> {
        std::fs::metadata(expand_home(path)).ok()?.modified().ok()
    }

    fn remove(&self, path: &str) -> Result<(), VfsError> {
        if self.writes_disabled {
            return Err(VfsError::WritesDisabled);
        }
        std::fs::remove_file(expand_home(path))?;
        Ok(())
    }

    fn is_dir(&self, path: &str) -> bool {
        expand_home(path).is_dir()
    }

    fn list_all(&self, dir: &str) -> Vec<String> {
        walkdir::WalkDir::new(expand_home(dir))
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_string_lossy().into_owned())
            .collect()
    }
}

/// The compiled-in read-only tree addressed by `/EMBED/stdlib` and
/// `/EMBED/contrib`. Realized as a small in-memory seed built at startup
/// (the teacher's dependency set carries no `include_dir!`-style embed
/// crate, so the tree is a plain `HashMap<String, &'static str>`) rather
/// than a real asset pipeline. All mtimes report the process start time,
/// since the module cache treats embedded files as immutable.
pub struct EmbedBackend {
    files: HashMap<String, &'static str>,
    started_at: SystemTime,
}

impl EmbedBackend {
    pub fn seeded() -> Self {
        let mut files = HashMap::new();
        files.insert(
            "stdlib/assert.du".to_string(),
            "function assert(cond, message) {\n  if !cond {\n    throw message\n  }\n}\n",
        );
        files.insert(
            "stdlib/range.du".to_string(),
            "function range(n) {\n  var out = []\n  for i = 0, n - 1 {\n    push(out, i)\n  }\n  return out\n}\n",
        );
        Self {
            files,
            started_at: SystemTime::now(),
        }
    }
}

impl Backend for EmbedBackend {
    fn read(&self, path: &str) -> Result<String, VfsError> {
        self.files
            .get(path)
            .map(|s| s.to_string())
            .ok_or_else(|| VfsError::NotFound(path.to_string()))
    }

    fn write(&self, path: &str, _contents: &str) -> Result<(), VfsError> {
        Err(VfsError::ReadOnly(path.to_string()))
    }

    fn append(&self, path: &str, _contents: &str) -> Result<(), VfsError> {
        Err(VfsError::ReadOnly(path.to_string()))
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    fn mtime(&self, _path: &str) -> Option<SystemTime> {
        Some(self.started_at)
    }

    fn remove(&self, path: &str) -> Result<(), VfsError> {
        Err(VfsError::ReadOnly(path.to_string()))
    }

    fn is_dir(&self, path: &str) -> bool {
        self.files.keys().any(|k| k.starts_with(&format!("{path}/")))
    }

    fn list_all(&self, dir: &str) -> Vec<String> {
        self.files
            .keys()
            .filter(|k| k.starts_with(dir))
            .cloned()
            .collect()
    }
}

/// `/STORE/<path>` — a process-wide virtual filesystem backed by the
/// `vfs` datastore namespace. Reads fetch the stored string (coercing a
/// non-string slot via [`Value::to_display_string`]); writes `set` the
/// stored string; appends concatenate onto the existing value.
pub struct StoreBackend {
    registry: Arc<Registry>,
}

impl StoreBackend {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    fn store(&self) -> Arc<duso_datastore::Datastore> {
        self.registry
            .get_or_create("vfs", duso_datastore::DatastoreConfig::default())
            .expect("vfs namespace always constructible")
    }
}

impl Backend for StoreBackend {
    fn read(&self, path: &str) -> Result<String, VfsError> {
        let v = self.store().get(path);
        if matches!(v, Value::Nil) {
            return Err(VfsError::NotFound(path.to_string()));
        }
        Ok(v.to_display_string())
    }

    fn write(&self, path: &str, contents: &str) -> Result<(), VfsError> {
        self.store().set(path, Value::string(contents))?;
        Ok(())
    }

    fn append(&self, path: &str, contents: &str) -> Result<(), VfsError> {
        let store = self.store();
        let existing = store.get(path);
        let mut text = match existing {
            Value::Nil => String::new(),
            other => other.to_display_string(),
        };
        text.push_str(contents);
        store.set(path, Value::string(text))?;
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        !matches!(self.store().get(path), Value::Nil)
    }

    fn mtime(&self, _path: &str) -> Option<SystemTime> {
        None
    }

    fn remove(&self, path: &str) -> Result<(), VfsError> {
        self.store().delete(path)?;
        Ok(())
    }

    fn is_dir(&self, _path: &str) -> bool {
        false
    }

    fn list_all(&self, dir: &str) -> Vec<String> {
        self.store()
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(dir))
            .collect()
    }
}

/// Dispatches a path to one of the three backends by prefix and exposes
/// glob support (`*`/`?`, `**` explicitly rejected) shared across all of
/// them.
pub struct Vfs {
    os: OsBackend,
    embed: EmbedBackend,
    store: StoreBackend,
}

pub enum Resolved<'a> {
    Embed(&'a EmbedBackend, String),
    Store(&'a StoreBackend, String),
    Os(&'a OsBackend, String),
}

impl Vfs {
    pub fn new(registry: Arc<Registry>, writes_disabled: bool) -> Self {
        Self {
            os: OsBackend { writes_disabled },
            embed: EmbedBackend::seeded(),
            store: StoreBackend::new(registry),
        }
    }

    pub fn resolve(&self, path: &str) -> Resolved<'_> {
        if let Some(rest) = path.strip_prefix("/EMBED/") {
            Resolved::Embed(&self.embed, rest.to_string())
        } else if let Some(rest) = path.strip_prefix("/STORE/") {
            Resolved::Store(&self.store, rest.to_string())
        } else {
            Resolved::Os(&self.os, path.to_string())
        }
    }

    fn backend(&self, path: &str) -> (&dyn Backend, String) {
        match self.resolve(path) {
            Resolved::Embed(b, p) => (b, p),
            Resolved::Store(b, p) => (b, p),
            Resolved::Os(b, p) => (b, p),
        }
    }

    pub fn read(&self, path: &str) -> Result<String, VfsError> {
        let (b, p) = self.backend(path);
        b.read(&p)
    }

    pub fn write(&self, path: &str, contents: &str) -> Result<(), VfsError> {
        let (b, p) = self.backend(path);
        b.write(&p, contents)
    }

    pub fn append(&self, path: &str, contents: &str) -> Result<(), VfsError> {
        let (b, p) = self.backend(path);
        b.append(&p, contents)
    }

    pub fn exists(&self, path: &str) -> bool {
        let (b, p) = self.backend(path);
        b.exists(&p)
    }

    pub fn mtime(&self, path: &str) -> Option<SystemTime> {
        let (b, p) = self.backend(path);
        b.mtime(&p)
    }

    pub fn remove(&self, path: &str) -> Result<(), VfsError> {
        let (b, p) = self.backend(path);
        b.remove(&p)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        let (b, p) = self.backend(path);
        b.is_dir(&p)
    }

    /// `*`/`?` glob matching; `**` is rejected outright. Operates by
    /// listing every file the backend knows about below the pattern's
    /// fixed-prefix directory and filtering with [`glob_match`].
    pub fn list_files(&self, pattern: &str) -> Result<Vec<String>, VfsError> {
        if pattern.contains("**") {
            return Err(VfsError::DoubleStarGlob);
        }
        let (b, p) = self.backend(pattern);
        let fixed_prefix = p
            .split(['*', '?'])
            .next()
            .unwrap_or("")
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default();
        Ok(b.list_all(&fixed_prefix)
            .into_iter()
            .filter(|candidate| glob_match(&p, candidate))
            .collect())
    }

    /// Multi-file copy/move requires `dest` to be an existing directory;
    /// single-file copy/move may rename.
    pub fn copy_or_move(&self, sources: &[String], dest: &str, remove_source: bool) -> Result<(), VfsError> {
        if sources.len() > 1 && !self.is_dir(dest) {
            return Err(VfsError::DestinationNotDirectory(dest.to_string()));
        }
        for src in sources {
            let contents = self.read(src)?;
            let target = if self.is_dir(dest) || sources.len() > 1 {
                let name = src.rsplit('/').next().unwrap_or(src);
                format!("{}/{}", dest.trim_end_matches('/'), name)
            } else {
                dest.to_string()
            };
            self.write(&target, &contents)?;
            if remove_source {
                self.remove(src)?;
            }
        }
        Ok(())
    }
}

/// Minimal `*`/`?` glob matcher (no `**`, checked by the caller).
fn glob_match(pattern: &str, candidate: &str) -> bool {
    fn go(p: &[u8], c: &[u8]) -> bool {
        match (p.first(), c.first()) {
            (None, None) => true,
            (Some(b'*'), _) => go(&p[1..], c) || (!c.is_empty() && go(p, &c[1..])),
            (Some(b'?'), Some(_)) => go(&p[1..], &c[1..]),
            (Some(pc), Some(cc)) if pc == cc => go(&p[1..], &c[1..]),
            _ => false,
        }
    }
    go(pattern.as_bytes(), candidate.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_star_and_question_mark() {
        assert!(glob_match("*.du", "foo.du"));
        assert!(glob_match("a?c.du", "abc.du"));
        assert!(!glob_match("*.du", "foo.txt"));
    }

    #[test]
    fn store_backend_roundtrips_through_registry() {
        let registry = Arc::new(Registry::new());
        let vfs = Vfs::new(registry, false);
        vfs.write("/STORE/greeting", "hi").unwrap();
        assert_eq!(vfs.read("/STORE/greeting").unwrap(), "hi");
        vfs.append("/STORE/greeting", "!").unwrap();
        assert_eq!(vfs.read("/STORE/greeting").unwrap(), "hi!");
    }

    #[test]
    fn embed_backend_is_read_only() {
        let registry = Arc::new(Registry::new());
        let vfs = Vfs::new(registry, false);
        assert!(vfs.read("/EMBED/stdlib/assert.du").is_ok());
        assert!(vfs.write("/EMBED/stdlib/assert.du", "x").is_err());
    }

    #[test]
    fn os_backend_rejects_writes_when_disabled() {
        let registry = Arc::new(Registry::new());
        let vfs = Vfs::new(registry, true);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        assert!(matches!(
            vfs.write(path.to_str().unwrap(), "x"),
            Err(VfsError::WritesDisabled)
        ));
    }
}
