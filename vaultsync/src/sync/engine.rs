use std::collections::BTreeMap;

use drive_core::DriveError;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use super::conflict::{ConflictHandler, ConflictResolution, pair_resolutions};
use super::filter::{FilterError, PathFilter};
use super::paths::timestamped_name;
use super::reconcile::{
    FullPullDecision, FullPushDecision, Gate, GateError, classify_full_pull, classify_full_push,
    diff_pull, diff_push, pull_gate, push_gate,
};
use super::remote::{RemoteListing, RemoteStore};
use super::snapshot::{
    self, FileMetadata, LiveFiles, SnapshotError, SyncMeta, is_meta_path, scan_live_tree,
};
use super::transfer::{self, TransferError, TransferExecutor, TransferJob, TransferOutcome};
use super::vault::{LocalVault, VaultError};
use crate::config::SyncConfig;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("remote request failed: {0}")]
    Remote(#[from] DriveError),
    #[error("vault I/O failed: {0}")]
    Vault(#[from] VaultError),
    #[error("backup of {path} failed, destructive step skipped: {source}")]
    Backup {
        path: String,
        #[source]
        source: VaultError,
    },
    #[error("remote snapshot exists but no local snapshot; pull first")]
    PullRequired,
    #[error("remote has newer changes; pull before pushing")]
    RemoteNewer,
    #[error("no remote snapshot; run a full push first")]
    NoRemoteSnapshot,
    #[error("remote snapshot lists {0} but the object is missing")]
    MissingRemoteObject(String),
    #[error("conflict resolution cancelled")]
    Cancelled,
    #[error("snapshot serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Filter(#[from] FilterError),
}

impl From<GateError> for EngineError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::PullRequired => EngineError::PullRequired,
            GateError::RemoteNewer => EngineError::RemoteNewer,
            GateError::NoRemoteSnapshot => EngineError::NoRemoteSnapshot,
        }
    }
}

impl From<SnapshotError> for EngineError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::Vault(err) => EngineError::Vault(err),
            SnapshotError::Remote(err) => EngineError::Remote(err),
            SnapshotError::Json(err) => EngineError::Serialize(err),
        }
    }
}

impl From<TransferError> for EngineError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Remote(err) => EngineError::Remote(err),
            TransferError::Vault(err) => EngineError::Vault(err),
            TransferError::Backup { path, source } => EngineError::Backup { path, source },
            TransferError::MissingRemoteObject(path) => EngineError::MissingRemoteObject(path),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    Push,
    Pull,
    FullPush,
    FullPull,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedConflict {
    pub path: String,
    pub resolution: ConflictResolution,
}

/// What one operation did. The mode is the one that actually ran, so a push
/// that fell back to a full push reports `FullPush`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub uploaded: Vec<String>,
    pub downloaded: Vec<String>,
    pub deleted_local: Vec<String>,
    /// Remote objects no longer tracked by either snapshot.
    pub untracked_remote: Vec<String>,
    /// New names given to remote objects moved aside by a full push.
    pub renamed_remote: Vec<String>,
    pub conflicts_resolved: Vec<ResolvedConflict>,
    pub backups: Vec<String>,
    /// Files a full sync left alone because content already matched.
    pub skipped: usize,
    /// Whether new snapshot content was written. A run with nothing to do
    /// only refreshes the local `lastSyncTimestamp`.
    pub committed: bool,
}

impl SyncReport {
    fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            uploaded: Vec::new(),
            downloaded: Vec::new(),
            deleted_local: Vec::new(),
            untracked_remote: Vec::new(),
            renamed_remote: Vec::new(),
            conflicts_resolved: Vec::new(),
            backups: Vec::new(),
            skipped: 0,
            committed: false,
        }
    }

    fn record(&mut self, outcome: &TransferOutcome) {
        match outcome {
            TransferOutcome::Uploaded { path, .. } => self.uploaded.push(path.clone()),
            TransferOutcome::Replaced {
                path, untracked, ..
            } => {
                self.uploaded.push(path.clone());
                if let Some(object) = untracked {
                    self.renamed_remote.push(object.name.clone());
                }
            }
            TransferOutcome::Downloaded { path, .. } => self.downloaded.push(path.clone()),
            TransferOutcome::Overwritten {
                path,
                backup,
                written,
                ..
            } => {
                if *written {
                    self.downloaded.push(path.clone());
                } else {
                    self.skipped += 1;
                }
                self.backups.extend(backup.iter().cloned());
            }
            TransferOutcome::DeletedLocal { path, .. } => self.deleted_local.push(path.clone()),
            TransferOutcome::Resolved {
                path,
                resolution,
                backup,
                deleted,
            } => {
                self.conflicts_resolved.push(ResolvedConflict {
                    path: path.clone(),
                    resolution: *resolution,
                });
                self.backups.extend(backup.iter().cloned());
                match (resolution, deleted) {
                    (ConflictResolution::Remote, true) => self.deleted_local.push(path.clone()),
                    (ConflictResolution::Remote, false) => self.downloaded.push(path.clone()),
                    (ConflictResolution::Local, _) => {}
                }
            }
        }
    }
}

/// Reconciles one vault with one remote folder. Operations take `&mut self`,
/// so a single engine never runs two reconciliations at once.
pub struct SyncEngine<V, R> {
    vault: V,
    remote: R,
}

impl<V: LocalVault, R: RemoteStore> SyncEngine<V, R> {
    pub fn new(vault: V, remote: R) -> Self {
        Self { vault, remote }
    }

    /// Sends local changes. Falls back to a full push when there is no
    /// snapshot pair to compare against.
    pub async fn push(&mut self, config: &SyncConfig) -> Result<SyncReport, EngineError> {
        let filter = PathFilter::for_config(config)?;
        let mut listing = self.load_listing().await?;
        let local = snapshot::read_local(&self.vault).await;
        let remote = snapshot::read_remote(&self.remote, &listing).await?;

        let local = match (push_gate(local.as_ref(), remote.as_ref())?, local) {
            (Gate::Incremental, Some(local)) => local,
            _ => {
                info!("no snapshot pair, running full push");
                return self.full_push_with(config, &filter, listing, remote).await;
            }
        };

        let live = scan_live_tree(&self.vault, &filter, config.concurrency).await?;
        let diff = diff_push(&local, &live, &listing, &filter);
        let mut report = SyncReport::new(SyncMode::Push);
        if diff.is_empty() {
            info!("nothing to push");
            let meta = local.synced(OffsetDateTime::now_utc());
            snapshot::write_local(&self.vault, &meta).await?;
            return Ok(report);
        }

        let jobs = diff
            .to_upload
            .iter()
            .filter_map(|path| {
                live.get(path).map(|file| TransferJob::Upload {
                    path: path.clone(),
                    remote_id: listing.id_of(path).map(str::to_string),
                    modified: file.modified_time,
                })
            })
            .collect();
        let now = OffsetDateTime::now_utc();
        let outcomes = self.executor(config, now).run_all(jobs, config.concurrency).await?;

        let mut files = local.files.clone();
        for path in &diff.deleted_locally {
            files.remove(path);
            info!(path = %path, "deleted locally, remote copy left untracked");
        }
        for outcome in &outcomes {
            if let TransferOutcome::Uploaded { path, object, file } = outcome {
                files.insert(path.clone(), file.clone());
                listing.insert(object.clone());
            }
            report.record(outcome);
        }
        report.untracked_remote = diff.deleted_locally;
        files.retain(|path, _| !filter.is_excluded(path));

        let meta = local.with_files(files).updated(now);
        snapshot::write_remote(&self.remote, &meta, &mut listing).await?;
        snapshot::write_local(&self.vault, &meta).await?;
        report.committed = true;
        info!(
            uploaded = report.uploaded.len(),
            untracked = report.untracked_remote.len(),
            "push complete"
        );
        Ok(report)
    }

    /// Brings remote changes in. Conflicts go to `handler` before anything is
    /// transferred; a refusal aborts with nothing changed.
    pub async fn pull(
        &mut self,
        config: &SyncConfig,
        handler: &dyn ConflictHandler,
    ) -> Result<SyncReport, EngineError> {
        let filter = PathFilter::for_config(config)?;
        let listing = self.load_listing().await?;
        let local = snapshot::read_local(&self.vault).await;
        let remote = snapshot::read_remote(&self.remote, &listing).await?;

        let (local, remote) = match (pull_gate(local.as_ref(), remote.as_ref())?, local, remote) {
            (Gate::Incremental, Some(local), Some(remote)) => (local, remote),
            (_, _, remote) => {
                info!("no local snapshot, running full pull");
                return self.full_pull_with(config, &filter, &listing, remote).await;
            }
        };

        let live = scan_live_tree(&self.vault, &filter, config.concurrency).await?;
        let diff = diff_pull(&local, &remote, &live, &filter);
        let mut report = SyncReport::new(SyncMode::Pull);

        let mut jobs = Vec::new();
        for path in &diff.to_download {
            let remote_id = listing
                .id_of(path)
                .ok_or_else(|| EngineError::MissingRemoteObject(path.clone()))?;
            jobs.push(TransferJob::Download {
                path: path.clone(),
                remote_id: remote_id.to_string(),
            });
        }
        for path in &diff.deleted_remotely {
            jobs.push(TransferJob::DeleteLocal { path: path.clone() });
        }

        if !diff.conflicts.is_empty() {
            info!(conflicts = diff.conflicts.len(), "waiting for conflict resolution");
            let answers = handler.resolve(&diff.conflicts).await;
            let Some(resolved) = pair_resolutions(diff.conflicts, answers) else {
                info!("conflict resolution cancelled, nothing changed");
                return Err(EngineError::Cancelled);
            };
            for (conflict, resolution) in resolved {
                let remote_id = if conflict.remote_deleted {
                    None
                } else {
                    listing.id_of(&conflict.path).map(str::to_string)
                };
                if resolution == ConflictResolution::Remote
                    && !conflict.remote_deleted
                    && remote_id.is_none()
                {
                    return Err(EngineError::MissingRemoteObject(conflict.path));
                }
                jobs.push(TransferJob::Resolve {
                    conflict,
                    resolution,
                    remote_id,
                });
            }
        }

        let now = OffsetDateTime::now_utc();
        let outcomes = self.executor(config, now).run_all(jobs, config.concurrency).await?;
        for outcome in &outcomes {
            report.record(outcome);
        }
        let removed: Vec<String> = outcomes.iter().filter_map(removed_path).collect();
        if !removed.is_empty() {
            transfer::prune_empty_dirs(&self.vault, &removed).await?;
        }

        let files = tracked_files(&remote, &filter);
        let transferred = !outcomes.is_empty();
        if !transferred && files == local.files && !remote.is_newer_than(&local) {
            info!("already up to date");
            snapshot::write_local(&self.vault, &local.synced(now)).await?;
            return Ok(report);
        }

        let last_updated_at = if transferred {
            now
        } else {
            local.last_updated_at.max(remote.last_updated_at)
        };
        let meta = SyncMeta::from_files(files, now).with_last_updated_at(last_updated_at);
        snapshot::write_local(&self.vault, &meta).await?;
        report.committed = true;
        info!(
            downloaded = report.downloaded.len(),
            deleted = report.deleted_local.len(),
            conflicts = report.conflicts_resolved.len(),
            "pull complete"
        );
        Ok(report)
    }

    /// Makes the remote folder mirror the live tree, keeping any replaced
    /// remote version under a timestamped name.
    pub async fn full_push(&mut self, config: &SyncConfig) -> Result<SyncReport, EngineError> {
        let filter = PathFilter::for_config(config)?;
        let listing = self.load_listing().await?;
        let remote = snapshot::read_remote(&self.remote, &listing).await?;
        self.full_push_with(config, &filter, listing, remote).await
    }

    /// Overwrites local files with remote content, backing up any differing
    /// local version first. Never deletes.
    pub async fn full_pull(&mut self, config: &SyncConfig) -> Result<SyncReport, EngineError> {
        let filter = PathFilter::for_config(config)?;
        let listing = self.load_listing().await?;
        let remote = snapshot::read_remote(&self.remote, &listing).await?;
        self.full_pull_with(config, &filter, &listing, remote).await
    }

    async fn full_push_with(
        &self,
        config: &SyncConfig,
        filter: &PathFilter,
        mut listing: RemoteListing,
        remote: Option<SyncMeta>,
    ) -> Result<SyncReport, EngineError> {
        let live = scan_live_tree(&self.vault, filter, config.concurrency).await?;
        let now = OffsetDateTime::now_utc();
        let mut report = SyncReport::new(SyncMode::FullPush);

        let mut jobs = Vec::new();
        for (path, file) in &live {
            let snapshot_hash = remote.as_ref().and_then(|meta| meta.hash_of(path));
            let remote_id = listing.id_of(path);
            let decision = classify_full_push(snapshot_hash, &file.hash, remote_id.is_some());
            match (decision, remote_id) {
                (FullPushDecision::Skip, _) => report.skipped += 1,
                (FullPushDecision::Replace, Some(id)) => jobs.push(TransferJob::Replace {
                    path: path.clone(),
                    remote_id: id.to_string(),
                    untracked_name: timestamped_name(path, now),
                    modified: file.modified_time,
                }),
                _ => jobs.push(TransferJob::Upload {
                    path: path.clone(),
                    remote_id: None,
                    modified: file.modified_time,
                }),
            }
        }

        let outcomes = self.executor(config, now).run_all(jobs, config.concurrency).await?;
        let mut files: LiveFiles = live;
        for outcome in &outcomes {
            match outcome {
                TransferOutcome::Uploaded { path, object, file } => {
                    files.insert(path.clone(), file.clone());
                    listing.insert(object.clone());
                }
                TransferOutcome::Replaced {
                    path,
                    untracked,
                    object,
                    file,
                } => {
                    files.insert(path.clone(), file.clone());
                    listing.remove(path);
                    if let Some(untracked) = untracked {
                        listing.insert(untracked.clone());
                    }
                    listing.insert(object.clone());
                }
                _ => {}
            }
            report.record(outcome);
        }

        let meta = SyncMeta::from_files(files, now);
        snapshot::write_remote(&self.remote, &meta, &mut listing).await?;
        snapshot::write_local(&self.vault, &meta).await?;
        report.committed = true;
        info!(
            uploaded = report.uploaded.len(),
            renamed = report.renamed_remote.len(),
            skipped = report.skipped,
            "full push complete"
        );
        Ok(report)
    }

    async fn full_pull_with(
        &self,
        config: &SyncConfig,
        filter: &PathFilter,
        listing: &RemoteListing,
        remote: Option<SyncMeta>,
    ) -> Result<SyncReport, EngineError> {
        let live = scan_live_tree(&self.vault, filter, config.concurrency).await?;
        let now = OffsetDateTime::now_utc();
        let mut report = SyncReport::new(SyncMode::FullPull);
        let tracked = |path: &str| !is_meta_path(path) && !filter.is_excluded(path);

        let candidates: Vec<(&str, Option<&str>)> = match &remote {
            Some(meta) => meta
                .files
                .iter()
                .filter(|(path, _)| tracked(path))
                .filter(|(path, _)| {
                    let present = listing.contains(path);
                    if !present {
                        warn!(path = %path, "snapshot entry has no remote object, skipping");
                    }
                    present
                })
                .map(|(path, file)| (path.as_str(), Some(file.hash.as_str())))
                .collect(),
            None => listing
                .objects()
                .into_iter()
                .filter(|object| tracked(&object.name))
                .map(|object| (object.name.as_str(), None))
                .collect(),
        };

        let mut jobs = Vec::new();
        for (path, snapshot_hash) in candidates {
            let live_hash = live.get(path).map(|file| file.hash.as_str());
            match (classify_full_pull(snapshot_hash, live_hash), listing.id_of(path)) {
                (FullPullDecision::Download, Some(id)) => jobs.push(TransferJob::Overwrite {
                    path: path.to_string(),
                    remote_id: id.to_string(),
                }),
                _ => report.skipped += 1,
            }
        }

        let outcomes = self.executor(config, now).run_all(jobs, config.concurrency).await?;
        for outcome in &outcomes {
            report.record(outcome);
        }

        let files = match &remote {
            Some(meta) => tracked_files(meta, filter),
            None => outcomes
                .iter()
                .filter_map(|outcome| match outcome {
                    TransferOutcome::Overwritten { path, hash, .. } => {
                        let modified_time = listing
                            .get(path)
                            .and_then(|object| object.modified_time)
                            .unwrap_or(now);
                        Some((
                            path.clone(),
                            FileMetadata {
                                hash: hash.clone(),
                                modified_time,
                            },
                        ))
                    }
                    _ => None,
                })
                .collect(),
        };

        let meta = SyncMeta::from_files(files, now);
        snapshot::write_local(&self.vault, &meta).await?;
        report.committed = true;
        info!(
            downloaded = report.downloaded.len(),
            backups = report.backups.len(),
            skipped = report.skipped,
            "full pull complete"
        );
        Ok(report)
    }

    async fn load_listing(&self) -> Result<RemoteListing, EngineError> {
        let listing = RemoteListing::from_objects(self.remote.list().await?);
        if listing.is_empty() {
            info!("remote folder is empty");
        } else {
            info!(objects = listing.len(), "remote listing loaded");
        }
        Ok(listing)
    }

    fn executor<'a>(
        &'a self,
        config: &'a SyncConfig,
        stamp: OffsetDateTime,
    ) -> TransferExecutor<'a> {
        TransferExecutor::new(&self.vault, &self.remote, &config.conflict_folder, stamp)
    }
}

/// Local files a pull actually removed, for pruning their directories.
fn removed_path(outcome: &TransferOutcome) -> Option<String> {
    match outcome {
        TransferOutcome::DeletedLocal {
            path,
            removed: true,
        }
        | TransferOutcome::Resolved {
            path,
            deleted: true,
            ..
        } => Some(path.clone()),
        _ => None,
    }
}

fn tracked_files(meta: &SyncMeta, filter: &PathFilter) -> BTreeMap<String, FileMetadata> {
    meta.files
        .iter()
        .filter(|(path, _)| !is_meta_path(path) && !filter.is_excluded(path))
        .map(|(path, file)| (path.clone(), file.clone()))
        .collect()
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
