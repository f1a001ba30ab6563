use std::cell::RefCell;
use std::collections::BTreeSet;
use std::future::Future;

use drive_core::DriveError;
use futures_util::future::join_all;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::conflict::{ConflictInfo, ConflictResolution};
use super::hasher;
use super::paths::{ancestors, backup_path, depth, parent_path};
use super::remote::{RemoteObject, RemoteStore};
use super::snapshot::FileMetadata;
use super::vault::{LocalVault, VaultError};

pub const DEFAULT_CONCURRENCY: usize = 5;
const MAX_BACKUP_ATTEMPTS: usize = 1000;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("remote request failed: {0}")]
    Remote(#[from] DriveError),
    #[error("vault I/O failed: {0}")]
    Vault(#[from] VaultError),
    #[error("backup of {path} failed: {source}")]
    Backup {
        path: String,
        #[source]
        source: VaultError,
    },
    #[error("no remote object for {0}")]
    MissingRemoteObject(String),
}

/// Runs `worker` over `items` with at most `limit` in flight, all on the
/// caller's task. Results line up with the input order. The first failure
/// stops further dispatch; work already finished is kept.
pub async fn run_bounded<I, T, E, F, Fut>(
    items: Vec<I>,
    limit: usize,
    worker: F,
) -> Result<Vec<T>, E>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let total = items.len();
    let queue = RefCell::new(items.into_iter().enumerate());
    let results: RefCell<Vec<Option<T>>> = RefCell::new((0..total).map(|_| None).collect());
    let failure: RefCell<Option<E>> = RefCell::new(None);

    let (queue, results_slot, failure_slot, worker) = (&queue, &results, &failure, &worker);
    let lanes = (0..limit.max(1).min(total)).map(move |_| async move {
        loop {
            if failure_slot.borrow().is_some() {
                break;
            }
            let next = queue.borrow_mut().next();
            let Some((index, item)) = next else {
                break;
            };
            match worker(item).await {
                Ok(value) => results_slot.borrow_mut()[index] = Some(value),
                Err(err) => {
                    failure_slot.borrow_mut().get_or_insert(err);
                    break;
                }
            }
        }
    });
    join_all(lanes).await;

    if let Some(err) = failure.into_inner() {
        return Err(err);
    }
    Ok(results.into_inner().into_iter().flatten().collect())
}

/// Creates every missing ancestor of `path`.
pub async fn ensure_parent_dirs(vault: &dyn LocalVault, path: &str) -> Result<(), VaultError> {
    for dir in ancestors(path) {
        match vault.mkdir(&dir).await {
            Ok(()) | Err(VaultError::AlreadyExists(_)) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Removes directories emptied by deleting `deleted`, deepest first. Starts
/// at each file's parent and climbs only past directories it removed, so an
/// empty directory the deletions never touched is left alone. The vault root
/// is never a candidate.
pub async fn prune_empty_dirs(
    vault: &dyn LocalVault,
    deleted: &[String],
) -> Result<usize, VaultError> {
    let mut pending: BTreeSet<(usize, String)> = deleted
        .iter()
        .filter_map(|path| parent_path(path))
        .map(|dir| (depth(&dir), dir))
        .collect();

    let mut removed = 0;
    while let Some((_, dir)) = pending.pop_last() {
        if vault.remove_empty_dir(&dir).await? {
            debug!(dir = %dir, "pruned empty directory");
            removed += 1;
            if let Some(parent) = parent_path(&dir) {
                pending.insert((depth(&parent), parent));
            }
        }
    }
    Ok(removed)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferJob {
    /// Read the live file and send it, overwriting `remote_id` when set.
    Upload {
        path: String,
        remote_id: Option<String>,
        modified: OffsetDateTime,
    },
    /// Rename the current remote object out of the way, then create fresh.
    Replace {
        path: String,
        remote_id: String,
        untracked_name: String,
        modified: OffsetDateTime,
    },
    Download {
        path: String,
        remote_id: String,
    },
    /// Download; a differing live file is backed up before being overwritten.
    Overwrite {
        path: String,
        remote_id: String,
    },
    DeleteLocal {
        path: String,
    },
    Resolve {
        conflict: ConflictInfo,
        resolution: ConflictResolution,
        remote_id: Option<String>,
    },
}

impl TransferJob {
    pub fn path(&self) -> &str {
        match self {
            TransferJob::Upload { path, .. }
            | TransferJob::Replace { path, .. }
            | TransferJob::Download { path, .. }
            | TransferJob::Overwrite { path, .. }
            | TransferJob::DeleteLocal { path } => path,
            TransferJob::Resolve { conflict, .. } => &conflict.path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Uploaded {
        path: String,
        object: RemoteObject,
        file: FileMetadata,
    },
    Replaced {
        path: String,
        /// `None` when the old object vanished before it could be renamed.
        untracked: Option<RemoteObject>,
        object: RemoteObject,
        file: FileMetadata,
    },
    Downloaded {
        path: String,
        hash: String,
    },
    Overwritten {
        path: String,
        hash: String,
        backup: Option<String>,
        written: bool,
    },
    DeletedLocal {
        path: String,
        /// `false` when the file was already gone.
        removed: bool,
    },
    Resolved {
        path: String,
        resolution: ConflictResolution,
        backup: Option<String>,
        deleted: bool,
    },
}

/// Executes planned jobs against one vault and one remote. Backups made
/// during the run share a single timestamp.
pub struct TransferExecutor<'a> {
    vault: &'a dyn LocalVault,
    remote: &'a dyn RemoteStore,
    conflict_folder: &'a str,
    stamp: OffsetDateTime,
}

impl<'a> TransferExecutor<'a> {
    pub fn new(
        vault: &'a dyn LocalVault,
        remote: &'a dyn RemoteStore,
        conflict_folder: &'a str,
        stamp: OffsetDateTime,
    ) -> Self {
        Self {
            vault,
            remote,
            conflict_folder,
            stamp,
        }
    }

    pub async fn run_all(
        &self,
        jobs: Vec<TransferJob>,
        concurrency: usize,
    ) -> Result<Vec<TransferOutcome>, TransferError> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        info!(jobs = jobs.len(), concurrency, "running transfer batch");
        run_bounded(jobs, concurrency, |job| self.run(job)).await
    }

    pub async fn run(&self, job: TransferJob) -> Result<TransferOutcome, TransferError> {
        debug!(path = %job.path(), "transfer job started");
        match job {
            TransferJob::Upload {
                path,
                remote_id,
                modified,
            } => {
                let bytes = self.vault.read(&path).await?;
                let hash = hasher::hash(&bytes);
                let object = match remote_id {
                    Some(id) => self.remote.update(&id, bytes).await?,
                    None => self.remote.create(&path, bytes).await?,
                };
                Ok(TransferOutcome::Uploaded {
                    path,
                    object,
                    file: FileMetadata {
                        hash,
                        modified_time: modified,
                    },
                })
            }
            TransferJob::Replace {
                path,
                remote_id,
                untracked_name,
                modified,
            } => {
                let bytes = self.vault.read(&path).await?;
                let hash = hasher::hash(&bytes);
                let untracked = match self.remote.rename(&remote_id, &untracked_name).await {
                    Ok(object) => Some(object),
                    Err(err) if err.is_not_found() => {
                        warn!(path = %path, "remote object vanished before rename");
                        None
                    }
                    Err(err) => return Err(err.into()),
                };
                let object = self.remote.create(&path, bytes).await?;
                Ok(TransferOutcome::Replaced {
                    path,
                    untracked,
                    object,
                    file: FileMetadata {
                        hash,
                        modified_time: modified,
                    },
                })
            }
            TransferJob::Download { path, remote_id } => {
                let bytes = self.remote.get(&remote_id).await?;
                let hash = hasher::hash(&bytes);
                ensure_parent_dirs(self.vault, &path).await?;
                self.vault.write(&path, &bytes).await?;
                Ok(TransferOutcome::Downloaded { path, hash })
            }
            TransferJob::Overwrite { path, remote_id } => {
                let bytes = self.remote.get(&remote_id).await?;
                let hash = hasher::hash(&bytes);
                let existing = match self.vault.read(&path).await {
                    Ok(existing) => Some(existing),
                    Err(VaultError::NotFound(_)) => None,
                    Err(err) => return Err(err.into()),
                };
                let backup = match existing {
                    Some(existing) if hasher::hash(&existing) == hash => {
                        return Ok(TransferOutcome::Overwritten {
                            path,
                            hash,
                            backup: None,
                            written: false,
                        });
                    }
                    Some(existing) => Some(self.back_up(&path, &existing).await?),
                    None => None,
                };
                ensure_parent_dirs(self.vault, &path).await?;
                self.vault.write(&path, &bytes).await?;
                Ok(TransferOutcome::Overwritten {
                    path,
                    hash,
                    backup,
                    written: true,
                })
            }
            TransferJob::DeleteLocal { path } => {
                let removed = self.vault.delete(&path).await?;
                Ok(TransferOutcome::DeletedLocal { path, removed })
            }
            TransferJob::Resolve {
                conflict,
                resolution,
                remote_id,
            } => self.resolve(conflict, resolution, remote_id).await,
        }
    }

    async fn resolve(
        &self,
        conflict: ConflictInfo,
        resolution: ConflictResolution,
        remote_id: Option<String>,
    ) -> Result<TransferOutcome, TransferError> {
        let path = conflict.path;
        match resolution {
            ConflictResolution::Remote => {
                let backup = match self.vault.read(&path).await {
                    Ok(existing) => Some(self.back_up(&path, &existing).await?),
                    Err(VaultError::NotFound(_)) => None,
                    Err(err) => return Err(err.into()),
                };
                if conflict.remote_deleted {
                    self.vault.delete(&path).await?;
                } else {
                    let id = remote_id
                        .ok_or_else(|| TransferError::MissingRemoteObject(path.clone()))?;
                    let bytes = self.remote.get(&id).await?;
                    ensure_parent_dirs(self.vault, &path).await?;
                    self.vault.write(&path, &bytes).await?;
                }
                info!(path = %path, "conflict resolved toward remote");
                Ok(TransferOutcome::Resolved {
                    path,
                    resolution,
                    backup,
                    deleted: conflict.remote_deleted,
                })
            }
            ConflictResolution::Local => {
                let backup = match remote_id {
                    Some(id) => {
                        let bytes = self.remote.get(&id).await?;
                        Some(self.back_up(&path, &bytes).await?)
                    }
                    None => None,
                };
                info!(path = %path, "conflict resolved toward local");
                Ok(TransferOutcome::Resolved {
                    path,
                    resolution,
                    backup,
                    deleted: false,
                })
            }
        }
    }

    /// Stores `bytes` under a fresh name in the conflict folder. An existing
    /// backup is never replaced; a numbered name is tried instead.
    async fn back_up(&self, path: &str, bytes: &[u8]) -> Result<String, TransferError> {
        let failed = |source: VaultError| TransferError::Backup {
            path: path.to_string(),
            source,
        };
        let first = backup_path(self.conflict_folder, path, self.stamp, 0);
        ensure_parent_dirs(self.vault, &first).await.map_err(failed)?;

        for attempt in 0..MAX_BACKUP_ATTEMPTS {
            let target = backup_path(self.conflict_folder, path, self.stamp, attempt);
            match self.vault.create_new(&target, bytes).await {
                Ok(()) => {
                    info!(path = %path, backup = %target, "backed up before overwrite");
                    return Ok(target);
                }
                Err(VaultError::AlreadyExists(_)) => {
                    debug!(backup = %target, "backup name taken, trying next");
                }
                Err(source) => return Err(failed(source)),
            }
        }
        Err(failed(VaultError::AlreadyExists(first)))
    }
}
