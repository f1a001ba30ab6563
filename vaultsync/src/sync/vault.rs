use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use super::paths::{PathError, local_path_for};

const PARTIAL_SUFFIX: &str = ".vaultsync-partial";

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("path not found: {0}")]
    NotFound(String),
    #[error("directory already exists: {0}")]
    AlreadyExists(String),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("vault walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl VaultError {
    fn from_io(path: &str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => VaultError::NotFound(path.to_string()),
            io::ErrorKind::AlreadyExists => VaultError::AlreadyExists(path.to_string()),
            _ => VaultError::Io {
                path: path.to_string(),
                source,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub path: String,
    pub modified: OffsetDateTime,
}

/// The host file tree. Paths are vault-relative and `/`-separated.
#[async_trait]
pub trait LocalVault: Send + Sync {
    /// Every regular file in the vault.
    async fn list(&self) -> Result<Vec<LocalEntry>, VaultError>;
    async fn read(&self, path: &str) -> Result<Vec<u8>, VaultError>;
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), VaultError>;
    /// Like `write`, but fails with [`VaultError::AlreadyExists`] instead of
    /// replacing an existing file.
    async fn create_new(&self, path: &str, bytes: &[u8]) -> Result<(), VaultError>;
    /// Deleting a missing file is not an error; reports whether a file was removed.
    async fn delete(&self, path: &str) -> Result<bool, VaultError>;
    /// Fails with [`VaultError::AlreadyExists`] when the directory is present.
    async fn mkdir(&self, path: &str) -> Result<(), VaultError>;
    /// Removes `path` only if it is an empty directory; reports whether it did.
    async fn remove_empty_dir(&self, path: &str) -> Result<bool, VaultError>;
}

/// [`LocalVault`] over a real directory.
#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, VaultError> {
        Ok(local_path_for(&self.root, path)?)
    }
}

#[async_trait]
impl LocalVault for FsVault {
    async fn list(&self) -> Result<Vec<LocalEntry>, VaultError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || walk_files(&root)).await?
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, VaultError> {
        let target = self.resolve(path)?;
        tokio::fs::read(&target)
            .await
            .map_err(|err| VaultError::from_io(path, err))
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), VaultError> {
        let target = self.resolve(path)?;
        let partial = partial_path(&target);
        tokio::fs::write(&partial, bytes)
            .await
            .map_err(|err| VaultError::from_io(path, err))?;
        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|err| VaultError::from_io(path, err))
    }

    async fn create_new(&self, path: &str, bytes: &[u8]) -> Result<(), VaultError> {
        let target = self.resolve(path)?;
        let io_err = |err: io::Error| VaultError::from_io(path, err);
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
            .map_err(io_err)?;
        file.write_all(bytes).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)
    }

    async fn delete(&self, path: &str) -> Result<bool, VaultError> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(VaultError::from_io(path, err)),
        }
    }

    async fn mkdir(&self, path: &str) -> Result<(), VaultError> {
        let target = self.resolve(path)?;
        tokio::fs::create_dir(&target)
            .await
            .map_err(|err| VaultError::from_io(path, err))
    }

    async fn remove_empty_dir(&self, path: &str) -> Result<bool, VaultError> {
        let target = self.resolve(path)?;
        let mut entries = match tokio::fs::read_dir(&target).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(VaultError::from_io(path, err)),
        };
        let has_entries = entries
            .next_entry()
            .await
            .map_err(|err| VaultError::from_io(path, err))?
            .is_some();
        if has_entries {
            return Ok(false);
        }
        tokio::fs::remove_dir(&target)
            .await
            .map_err(|err| VaultError::from_io(path, err))?;
        Ok(true)
    }
}

fn walk_files(root: &Path) -> Result<Vec<LocalEntry>, VaultError> {
    let mut out = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let Some(path) = relative_to_vault_path(relative) else {
            continue;
        };
        if path.ends_with(PARTIAL_SUFFIX) {
            continue;
        }
        let modified = entry
            .metadata()?
            .modified()
            .map(OffsetDateTime::from)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());
        out.push(LocalEntry { path, modified });
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

fn relative_to_vault_path(relative: &Path) -> Option<String> {
    let parts = relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(PARTIAL_SUFFIX);
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn lists_nested_files_with_forward_slashes() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("notes/daily")).unwrap();
        std::fs::write(dir.path().join("notes/daily/a.md"), b"a").unwrap();
        std::fs::write(dir.path().join("top.md"), b"t").unwrap();
        std::fs::write(dir.path().join("left.md.vaultsync-partial"), b"x").unwrap();

        let vault = FsVault::new(dir.path());
        let paths: Vec<_> = vault
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.path)
            .collect();

        assert_eq!(paths, vec!["notes/daily/a.md".to_string(), "top.md".to_string()]);
    }

    #[tokio::test]
    async fn write_replaces_content_and_leaves_no_partial() {
        let dir = tempdir().unwrap();
        let vault = FsVault::new(dir.path());
        vault.write("a.md", b"one").await.unwrap();
        vault.write("a.md", b"two").await.unwrap();

        assert_eq!(vault.read("a.md").await.unwrap(), b"two");
        assert!(!dir.path().join("a.md.vaultsync-partial").exists());
    }

    #[tokio::test]
    async fn create_new_never_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let vault = FsVault::new(dir.path());
        vault.create_new("a.md", b"first").await.unwrap();

        assert!(matches!(
            vault.create_new("a.md", b"second").await,
            Err(VaultError::AlreadyExists(_))
        ));
        assert_eq!(vault.read("a.md").await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn mkdir_reports_existing_directory() {
        let dir = tempdir().unwrap();
        let vault = FsVault::new(dir.path());
        vault.mkdir("notes").await.unwrap();
        assert!(matches!(
            vault.mkdir("notes").await,
            Err(VaultError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn missing_reads_are_not_found_and_deletes_are_idempotent() {
        let dir = tempdir().unwrap();
        let vault = FsVault::new(dir.path());
        assert!(matches!(
            vault.read("nope.md").await,
            Err(VaultError::NotFound(_))
        ));
        assert!(!vault.delete("nope.md").await.unwrap());
    }

    #[tokio::test]
    async fn remove_empty_dir_keeps_populated_directories() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("full")).unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();
        std::fs::write(dir.path().join("full/a.md"), b"a").unwrap();

        let vault = FsVault::new(dir.path());
        assert!(!vault.remove_empty_dir("full").await.unwrap());
        assert!(vault.remove_empty_dir("empty").await.unwrap());
        assert!(!dir.path().join("empty").exists());
    }
}
