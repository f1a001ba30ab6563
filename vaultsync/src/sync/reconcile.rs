//! Three-way classification of vault paths.
//!
//! Every function here is pure: it looks at the local snapshot, the remote
//! snapshot, the hashes of the live local tree and the remote listing, and
//! says what should happen. Nothing is read or written.

use std::collections::BTreeSet;

use thiserror::Error;

use super::conflict::ConflictInfo;
use super::filter::PathFilter;
use super::remote::RemoteListing;
use super::snapshot::{LiveFiles, SyncMeta, is_meta_path};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GateError {
    #[error("remote snapshot exists but no local snapshot; pull first")]
    PullRequired,
    #[error("remote has changes newer than the local snapshot; pull before pushing")]
    RemoteNewer,
    #[error("no remote snapshot; run a full push first")]
    NoRemoteSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Full,
    Incremental,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDiff {
    pub to_upload: Vec<String>,
    pub to_download: Vec<String>,
    pub conflicts: Vec<ConflictInfo>,
    /// Push: tracked paths gone from the live tree; their remote objects stay.
    pub deleted_locally: Vec<String>,
    /// Pull: tracked paths the remote dropped; the local copy gets deleted.
    pub deleted_remotely: Vec<String>,
}

impl SyncDiff {
    pub fn is_empty(&self) -> bool {
        self.to_upload.is_empty()
            && self.to_download.is_empty()
            && self.conflicts.is_empty()
            && self.deleted_locally.is_empty()
            && self.deleted_remotely.is_empty()
    }
}

/// | local | remote | remote newer | result |
/// |---|---|---|---|
/// | absent | absent | - | full push |
/// | absent | present | - | `PullRequired` |
/// | present | present | yes | `RemoteNewer` |
/// | present | present | no | incremental |
/// | present | absent | - | full push |
pub fn push_gate(local: Option<&SyncMeta>, remote: Option<&SyncMeta>) -> Result<Gate, GateError> {
    match (local, remote) {
        (None, None) | (Some(_), None) => Ok(Gate::Full),
        (None, Some(_)) => Err(GateError::PullRequired),
        (Some(local), Some(remote)) if remote.is_newer_than(local) => Err(GateError::RemoteNewer),
        (Some(_), Some(_)) => Ok(Gate::Incremental),
    }
}

pub fn pull_gate(local: Option<&SyncMeta>, remote: Option<&SyncMeta>) -> Result<Gate, GateError> {
    match (local, remote) {
        (_, None) => Err(GateError::NoRemoteSnapshot),
        (None, Some(_)) => Ok(Gate::Full),
        (Some(_), Some(_)) => Ok(Gate::Incremental),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushDecision {
    Skip,
    Upload,
    /// Dropped from both snapshots; the remote object is left as an
    /// untracked leftover.
    Untrack,
}

/// | saved | actual | remote object | decision |
/// |---|---|---|---|
/// | A | A | yes | skip |
/// | A | A | no | upload (new) |
/// | A | B | any | upload |
/// | absent | A | any | upload |
/// | A | deleted | any | untrack |
pub fn classify_push(
    saved: Option<&str>,
    actual: Option<&str>,
    remote_exists: bool,
) -> PushDecision {
    match (saved, actual) {
        (Some(_), None) => PushDecision::Untrack,
        (None, None) => PushDecision::Skip,
        (Some(saved), Some(actual)) if saved == actual && remote_exists => PushDecision::Skip,
        (_, Some(_)) => PushDecision::Upload,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullDecision {
    Skip,
    Download,
    DeleteLocal,
    /// Live content already equals the remote version; only the snapshot moves.
    Adopt,
    Conflict { remote_deleted: bool },
}

/// `local` and `remote` are the snapshot hashes, `live` the hash on disk.
///
/// Tracked on both sides:
///
/// | L | R | X | decision |
/// |---|---|---|---|
/// | A | A | any | skip |
/// | A | B | A | download |
/// | A | B | absent | download |
/// | A | B | B or C | conflict |
///
/// Tracked only locally (remote deleted):
///
/// | L | X | decision |
/// |---|---|---|
/// | A | A | delete local |
/// | A | B | conflict, remote deleted |
/// | A | absent | skip |
///
/// Tracked only remotely (new remote):
///
/// | R | X | decision |
/// |---|---|---|
/// | A | absent | download |
/// | A | A | adopt |
/// | A | B | conflict |
pub fn classify_pull(
    local: Option<&str>,
    remote: Option<&str>,
    live: Option<&str>,
) -> PullDecision {
    match (local, remote) {
        (Some(local), Some(remote)) => {
            let remote_changed = local != remote;
            let local_changed = live.is_some_and(|live| live != local);
            match (local_changed, remote_changed) {
                (_, false) => PullDecision::Skip,
                (false, true) => PullDecision::Download,
                (true, true) => PullDecision::Conflict {
                    remote_deleted: false,
                },
            }
        }
        (Some(local), None) => match live {
            None => PullDecision::Skip,
            Some(live) if live == local => PullDecision::DeleteLocal,
            Some(_) => PullDecision::Conflict {
                remote_deleted: true,
            },
        },
        (None, Some(remote)) => match live {
            None => PullDecision::Download,
            Some(live) if live == remote => PullDecision::Adopt,
            Some(_) => PullDecision::Conflict {
                remote_deleted: false,
            },
        },
        (None, None) => PullDecision::Skip,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullPushDecision {
    Skip,
    Create,
    /// Rename the existing object aside, then create a fresh one.
    Replace,
}

pub fn classify_full_push(
    snapshot: Option<&str>,
    live: &str,
    remote_exists: bool,
) -> FullPushDecision {
    match (remote_exists, snapshot) {
        (false, _) => FullPushDecision::Create,
        (true, Some(snapshot)) if snapshot == live => FullPushDecision::Skip,
        (true, _) => FullPushDecision::Replace,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullPullDecision {
    Skip,
    /// Download and overwrite, backing up a differing live file first.
    Download,
}

pub fn classify_full_pull(snapshot: Option<&str>, live: Option<&str>) -> FullPullDecision {
    match (snapshot, live) {
        (Some(snapshot), Some(live)) if snapshot == live => FullPullDecision::Skip,
        _ => FullPullDecision::Download,
    }
}

/// Compares the local snapshot with the live tree.
pub fn diff_push(
    local: &SyncMeta,
    live: &LiveFiles,
    listing: &RemoteListing,
    filter: &PathFilter,
) -> SyncDiff {
    let mut diff = SyncDiff::default();
    for path in tracked_paths(local.files.keys().chain(live.keys()), filter) {
        let decision = classify_push(
            local.hash_of(path),
            live.get(path).map(|file| file.hash.as_str()),
            listing.contains(path),
        );
        match decision {
            PushDecision::Skip => {}
            PushDecision::Upload => diff.to_upload.push(path.to_string()),
            PushDecision::Untrack => diff.deleted_locally.push(path.to_string()),
        }
    }
    diff
}

/// Compares both snapshots against the live tree. Paths present in neither
/// snapshot are local additions and are left for the next push.
pub fn diff_pull(
    local: &SyncMeta,
    remote: &SyncMeta,
    live: &LiveFiles,
    filter: &PathFilter,
) -> SyncDiff {
    let mut diff = SyncDiff::default();
    for path in tracked_paths(local.files.keys().chain(remote.files.keys()), filter) {
        let live_file = live.get(path);
        let decision = classify_pull(
            local.hash_of(path),
            remote.hash_of(path),
            live_file.map(|file| file.hash.as_str()),
        );
        match decision {
            PullDecision::Skip | PullDecision::Adopt => {}
            PullDecision::Download => diff.to_download.push(path.to_string()),
            PullDecision::DeleteLocal => diff.deleted_remotely.push(path.to_string()),
            PullDecision::Conflict { remote_deleted } => {
                let remote_file = remote.files.get(path);
                diff.conflicts.push(ConflictInfo {
                    path: path.to_string(),
                    local_modified_time: live_file.map(|file| file.modified_time),
                    remote_modified_time: remote_file.map(|file| file.modified_time),
                    local_hash: live_file.map(|file| file.hash.clone()),
                    remote_hash: remote_file.map(|file| file.hash.clone()),
                    remote_deleted,
                });
            }
        }
    }
    diff
}

fn tracked_paths<'a>(
    paths: impl Iterator<Item = &'a String>,
    filter: &PathFilter,
) -> BTreeSet<&'a str> {
    paths
        .map(String::as_str)
        .filter(|path| !is_meta_path(path) && !filter.is_excluded(path))
        .collect()
}
