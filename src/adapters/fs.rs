use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;

/// Filesystem capability used to resolve local includes.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read_file(&self, path: &Path) -> Result<String>;

    async fn exists(&self, path: &Path) -> bool;

    /// Resolves `to` against the directory `from`, normalizing `.` and `..`
    /// components lexically (no symlink traversal).
    fn resolve_path(&self, from: &Path, to: &str) -> PathBuf {
        normalize_path(&from.join(to))
    }

    fn absolute_path(&self, path: &Path) -> PathBuf;
}

/// Lexical path normalization: drops `.`, folds `..` into its parent where
/// one exists. Keeps the result comparable for cycle detection without
/// touching the disk.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(Component::ParentDir);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Real filesystem, async reads via tokio.
#[derive(Debug, Default)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn read_file(&self, path: &Path) -> Result<String> {
        Ok(tokio::fs::read_to_string(path).await?)
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    fn absolute_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            normalize_path(path)
        } else {
            std::env::current_dir()
                .map(|cwd| normalize_path(&cwd.join(path)))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    }
}

/// In-memory filesystem for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockFileSystem {
    files: std::sync::RwLock<std::collections::HashMap<PathBuf, String>>,
}

#[cfg(test)]
impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: &str) {
        self.files
            .write()
            .unwrap()
            .insert(normalize_path(path.as_ref()), content.to_string());
    }
}

#[cfg(test)]
#[async_trait]
impl FileSystem for MockFileSystem {
    async fn read_file(&self, path: &Path) -> Result<String> {
        self.files
            .read()
            .unwrap()
            .get(&normalize_path(path))
            .cloned()
            .ok_or_else(|| {
                crate::error::CigraphError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no such file: {}", path.display()),
                ))
            })
    }

    async fn exists(&self, path: &Path) -> bool {
        self.files
            .read()
            .unwrap()
            .contains_key(&normalize_path(path))
    }

    fn absolute_path(&self, path: &Path) -> PathBuf {
        normalize_path(path)
    }
}
