//! Local mirror root: key-to-path mapping and the filesystem primitives the
//! engine and pruner need, using tokio::fs and walkdir

use std::io::ErrorKind;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

use crate::error::{MirrorError, Result};

/// Regular file found below the mirror root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Relative path with `/` separators, comparable to object keys
    pub key: String,
    /// Absolute path
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

/// Directory tree that mirrors a bucket's key namespace
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open an existing directory as mirror root. Relative paths are
    /// resolved against the current working directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();

        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            let cwd = std::env::current_dir().map_err(|e| {
                MirrorError::configuration_error(root, format!("Failed to read working directory: {}", e))
            })?;
            cwd.join(root)
        };

        let metadata = std::fs::metadata(&root).map_err(|e| match e.kind() {
            ErrorKind::NotFound => MirrorError::configuration_error(&root, "Destination not found"),
            _ => MirrorError::configuration_error(&root, format!("Failed to read destination: {}", e)),
        })?;

        if !metadata.is_dir() {
            return Err(MirrorError::configuration_error(
                &root,
                "Destination is not a directory",
            ));
        }

        Ok(Self { root })
    }

    /// Mirror root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an object key to its local path. A leading `/` is dropped, so
    /// `/a.txt` lands at `<root>/a.txt`; `..` is rejected.
    pub fn resolve(&self, key: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for part in key_components(key)? {
            path.push(part);
        }
        Ok(path)
    }

    /// Key as the walk reports it for the file `key` maps to. Keys that differ
    /// only in leading `/`, `.` segments or repeated separators (`a//b.txt`)
    /// share one local file and one normalized key.
    pub fn normalize_key(key: &str) -> Result<String> {
        let parts: Vec<_> = key_components(key)?
            .into_iter()
            .map(|part| part.to_string_lossy())
            .collect();
        Ok(parts.join("/"))
    }

    /// Size of the local counterpart of `key`, `None` when absent
    pub async fn stat(&self, key: &str) -> Result<Option<u64>> {
        let path = self.resolve(key)?;
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(Some(metadata.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MirrorError::transfer_error(
                key,
                path,
                format!("Failed to read metadata: {}", e),
            )),
        }
    }

    /// Whether a local counterpart of `key` exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.stat(key).await?.is_some())
    }

    /// Size of the local counterpart of `key`; absent is an error
    pub async fn size_of(&self, key: &str) -> Result<u64> {
        let path = self.resolve(key)?;
        let metadata = fs::metadata(&path).await.map_err(|e| {
            MirrorError::transfer_error(key, &path, format!("Failed to read metadata: {}", e))
        })?;
        Ok(metadata.len())
    }

    /// Create every missing directory above the local counterpart of `key`
    pub async fn ensure_parent_dir(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                MirrorError::transfer_error(key, &path, format!("Failed to create parent directory: {}", e))
            })?;
        }
        Ok(())
    }

    /// Create or truncate the local counterpart of `key`
    pub async fn create_for_write(&self, key: &str) -> Result<fs::File> {
        let path = self.resolve(key)?;
        fs::File::create(&path).await.map_err(|e| {
            MirrorError::transfer_error(key, &path, format!("Failed to create file: {}", e))
        })
    }

    /// Remove the local counterpart of `key`
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        fs::remove_file(&path).await.map_err(|e| {
            MirrorError::deletion_error(&path, format!("Failed to delete file: {}", e))
        })
    }

    /// Lazily walk every regular file below the root. Directories,
    /// symlinks and special files are skipped; symlinks are not followed.
    pub fn regular_files(&self) -> impl Iterator<Item = Result<LocalFile>> + '_ {
        WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
                        return Some(Err(MirrorError::walk_error(path, format!("Walk error: {}", e))));
                    }
                };

                if !entry.file_type().is_file() {
                    return None;
                }

                Some(self.local_file(entry.path(), entry.metadata()))
            })
    }

    fn local_file(
        &self,
        path: &Path,
        metadata: std::result::Result<std::fs::Metadata, walkdir::Error>,
    ) -> Result<LocalFile> {
        let metadata = metadata.map_err(|e| {
            MirrorError::walk_error(path, format!("Failed to read metadata: {}", e))
        })?;

        Ok(LocalFile {
            key: self.relative_key(path)?,
            path: path.to_path_buf(),
            size: metadata.len(),
        })
    }

    /// Relative path of `path` below the root, rendered as an object key in
    /// the form [`LocalStore::normalize_key`] produces
    pub fn relative_key(&self, path: &Path) -> Result<String> {
        let relative = path.strip_prefix(&self.root).map_err(|e| {
            MirrorError::walk_error(path, format!("Failed to create relative path: {}", e))
        })?;

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    let part = part.to_str().ok_or_else(|| {
                        MirrorError::walk_error(path, "Relative path is not valid UTF-8")
                    })?;
                    parts.push(part);
                }
                _ => {
                    return Err(MirrorError::walk_error(path, "Unexpected component in relative path"));
                }
            }
        }

        Ok(parts.join("/"))
    }
}

fn key_components(key: &str) -> Result<Vec<&OsStr>> {
    let mut parts = Vec::new();

    for component in Path::new(key).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir => {
                return Err(MirrorError::invalid_key(key, "parent directory components are not allowed"));
            }
            Component::Prefix(_) => {
                return Err(MirrorError::invalid_key(key, "drive prefixes are not allowed"));
            }
        }
    }

    if parts.is_empty() {
        return Err(MirrorError::invalid_key(key, "key does not name a file"));
    }

    Ok(parts)
}
