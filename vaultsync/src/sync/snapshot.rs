use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::filter::PathFilter;
use super::hasher;
use super::remote::{RemoteListing, RemoteStore};
use super::transfer::run_bounded;
use super::vault::{LocalVault, VaultError};

pub const LOCAL_META_DIR: &str = ".vaultsync";
pub const LOCAL_META_PATH: &str = ".vaultsync/sync-meta.json";
pub const REMOTE_META_NAME: &str = ".vaultsync-meta.json";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("remote error: {0}")]
    Remote(#[from] drive_core::DriveError),
    #[error("snapshot serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Content identity of one path as of the last sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub hash: String,
    #[serde(with = "time::serde::rfc3339")]
    pub modified_time: OffsetDateTime,
}

/// What one replica believed was synchronized. Values are replaced, never
/// edited in place: every mutation consumes the old snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    /// Moves only when a transfer or delete actually happened.
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated_at: OffsetDateTime,
    /// Moves on every reconciliation that completes, even one with nothing to do.
    #[serde(with = "time::serde::rfc3339")]
    pub last_sync_timestamp: OffsetDateTime,
    #[serde(default)]
    pub files: BTreeMap<String, FileMetadata>,
}

/// Hashes of the live local tree, keyed by vault path.
pub type LiveFiles = BTreeMap<String, FileMetadata>;

impl SyncMeta {
    pub fn empty(now: OffsetDateTime) -> Self {
        Self {
            last_updated_at: now,
            last_sync_timestamp: now,
            files: BTreeMap::new(),
        }
    }

    pub fn from_files(files: BTreeMap<String, FileMetadata>, now: OffsetDateTime) -> Self {
        Self {
            files,
            ..Self::empty(now)
        }
    }

    pub fn hash_of(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(|meta| meta.hash.as_str())
    }

    pub fn is_newer_than(&self, other: &SyncMeta) -> bool {
        self.last_updated_at > other.last_updated_at
    }

    pub fn with_file(mut self, path: impl Into<String>, meta: FileMetadata) -> Self {
        self.files.insert(path.into(), meta);
        self
    }

    pub fn with_files(mut self, files: BTreeMap<String, FileMetadata>) -> Self {
        self.files = files;
        self
    }

    /// A transfer happened: both timestamps move.
    pub fn updated(mut self, now: OffsetDateTime) -> Self {
        self.last_updated_at = now;
        self.last_sync_timestamp = now;
        self
    }

    /// Reconciled without moving content.
    pub fn synced(mut self, now: OffsetDateTime) -> Self {
        self.last_sync_timestamp = now;
        self
    }

    pub fn with_last_updated_at(mut self, at: OffsetDateTime) -> Self {
        self.last_updated_at = at;
        self
    }
}

pub fn is_meta_path(path: &str) -> bool {
    path == LOCAL_META_PATH || path == REMOTE_META_NAME
}

/// Reads and hashes every tracked file of the live tree.
pub async fn scan_live_tree(
    vault: &dyn LocalVault,
    filter: &PathFilter,
    concurrency: usize,
) -> Result<LiveFiles, SnapshotError> {
    let entries: Vec<_> = vault
        .list()
        .await?
        .into_iter()
        .filter(|entry| !is_meta_path(&entry.path) && !filter.is_excluded(&entry.path))
        .collect();

    let hashed = run_bounded(entries, concurrency, |entry| async move {
        let bytes = vault.read(&entry.path).await?;
        Ok::<_, VaultError>((
            entry.path,
            FileMetadata {
                hash: hasher::hash(&bytes),
                modified_time: entry.modified,
            },
        ))
    })
    .await?;

    debug!(files = hashed.len(), "scanned live tree");
    Ok(hashed.into_iter().collect())
}

pub async fn build_from_live_tree(
    vault: &dyn LocalVault,
    filter: &PathFilter,
    concurrency: usize,
    now: OffsetDateTime,
) -> Result<SyncMeta, SnapshotError> {
    let files = scan_live_tree(vault, filter, concurrency).await?;
    Ok(SyncMeta::from_files(files, now))
}

/// A missing or unreadable local snapshot is reported as absent.
pub async fn read_local(vault: &dyn LocalVault) -> Option<SyncMeta> {
    let bytes = match vault.read(LOCAL_META_PATH).await {
        Ok(bytes) => bytes,
        Err(VaultError::NotFound(_)) => return None,
        Err(err) => {
            warn!(error = %err, "local snapshot unreadable, treating as absent");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(meta) => Some(meta),
        Err(err) => {
            warn!(error = %err, "local snapshot corrupt, treating as absent");
            None
        }
    }
}

pub async fn write_local(vault: &dyn LocalVault, meta: &SyncMeta) -> Result<(), SnapshotError> {
    match vault.mkdir(LOCAL_META_DIR).await {
        Ok(()) | Err(VaultError::AlreadyExists(_)) => {}
        Err(err) => return Err(err.into()),
    }
    let bytes = serde_json::to_vec_pretty(meta)?;
    vault.write(LOCAL_META_PATH, &bytes).await?;
    debug!(files = meta.files.len(), "local snapshot written");
    Ok(())
}

/// Absent object means no snapshot; a corrupt object is downgraded to absent.
pub async fn read_remote(
    remote: &dyn RemoteStore,
    listing: &RemoteListing,
) -> Result<Option<SyncMeta>, SnapshotError> {
    let Some(id) = listing.id_of(REMOTE_META_NAME) else {
        return Ok(None);
    };
    let bytes = match remote.get(id).await {
        Ok(bytes) => bytes,
        Err(err) if err.is_not_found() => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    match serde_json::from_slice(&bytes) {
        Ok(meta) => Ok(Some(meta)),
        Err(err) => {
            warn!(error = %err, "remote snapshot corrupt, treating as absent");
            Ok(None)
        }
    }
}

/// Overwrites the meta object in place, creating it on first write.
pub async fn write_remote(
    remote: &dyn RemoteStore,
    meta: &SyncMeta,
    listing: &mut RemoteListing,
) -> Result<(), SnapshotError> {
    let bytes = serde_json::to_vec_pretty(meta)?;
    let object = match listing.id_of(REMOTE_META_NAME) {
        Some(id) => remote.update(id, bytes).await?,
        None => remote.create(REMOTE_META_NAME, bytes).await?,
    };
    listing.insert(object);
    debug!(files = meta.files.len(), "remote snapshot written");
    Ok(())
}
