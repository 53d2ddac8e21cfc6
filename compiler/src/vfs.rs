//! Virtual file system with an in-memory overlay.
//!
//! Buffers written with [`FileSystem::write_file_cache`] shadow the disk
//! until they are removed, which lets tooling compile unsaved edits. Every
//! path is keyed by its absolute, lexically cleaned form.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::trace;

#[derive(Debug, Default)]
pub struct FileSystem {
    files: RwLock<HashMap<PathBuf, Arc<[u8]>>>,
}

impl FileSystem {
    pub fn new() -> Self {
        FileSystem::default()
    }

    /// Computes the absolute path of `path`.
    ///
    /// Absolute paths are only cleaned. With an empty `base_file` the path is
    /// taken relative to the working directory, otherwise relative to the
    /// directory that contains `base_file`.
    pub fn resolve(&self, base_file: impl AsRef<Path>, path: impl AsRef<Path>) -> PathBuf {
        let base_file = base_file.as_ref();
        let path = path.as_ref();

        if path.is_absolute() {
            return clean_path(path);
        }
        if base_file.as_os_str().is_empty() {
            return absolute(path);
        }

        let base_dir = base_file.parent().unwrap_or_else(|| Path::new(""));
        absolute(&base_dir.join(path))
    }

    /// Returns the cached buffer for `path`, or reads it from disk and caches
    /// it. Disk errors are returned and nothing is cached.
    pub fn read_file(&self, path: impl AsRef<Path>) -> io::Result<Arc<[u8]>> {
        let key = absolute(path.as_ref());

        if let Some(content) = self.read_lock().get(&key) {
            trace!(path = %key.display(), "vfs cache hit");
            return Ok(Arc::clone(content));
        }

        let content: Arc<[u8]> = fs::read(&key)?.into();
        trace!(path = %key.display(), bytes = content.len(), "vfs read from disk");

        // A buffer written while we were reading the disk wins.
        let mut files = self.write_lock();
        let entry = files.entry(key).or_insert(content);
        Ok(Arc::clone(entry))
    }

    /// Like [`FileSystem::read_file`] but decodes UTF-8.
    pub fn read_to_string(&self, path: impl AsRef<Path>) -> io::Result<String> {
        let bytes = self.read_file(path)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Stores `content` as the cached buffer for `path`, replacing any
    /// previous one.
    pub fn write_file_cache(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let key = absolute(path.as_ref());
        let content: Vec<u8> = content.into();
        self.write_lock().insert(key, Arc::from(content));
    }

    /// Evicts the cached buffer for `path`. Returns whether one existed.
    pub fn remove_file_cache(&self, path: impl AsRef<Path>) -> bool {
        let key = absolute(path.as_ref());
        self.write_lock().remove(&key).is_some()
    }

    pub fn is_cached(&self, path: impl AsRef<Path>) -> bool {
        let key = absolute(path.as_ref());
        self.read_lock().contains_key(&key)
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PathBuf, Arc<[u8]>>> {
        self.files.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<PathBuf, Arc<[u8]>>> {
        self.files.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return clean_path(path);
    }
    match env::current_dir() {
        Ok(cwd) => clean_path(&cwd.join(path)),
        Err(_) => clean_path(path),
    }
}

/// Lexical cleanup: drops `.`, folds `..` into the previous component and
/// never touches the disk.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return PathBuf::from(".");
    }
    parts.iter().collect()
}
