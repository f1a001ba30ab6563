use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("vault path is empty")]
    Empty,
    #[error("vault path contains unsupported component: {0}")]
    UnsupportedComponent(String),
}

/// Maps a vault-relative path ("notes/a.md") under the vault root.
pub fn local_path_for(root: &Path, relative: &str) -> Result<PathBuf, PathError> {
    if relative.trim_matches('/').is_empty() {
        return Err(PathError::Empty);
    }

    let mut out = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::CurDir => continue,
            Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent(relative.to_string()));
            }
        }
    }
    Ok(out)
}

pub fn parent_path(path: &str) -> Option<String> {
    path.rsplit_once('/')
        .map(|(dir, _)| dir.to_string())
        .filter(|dir| !dir.is_empty())
}

/// Every ancestor directory of `path`, shallowest first.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = parent_path(path);
    while let Some(dir) = current {
        current = parent_path(&dir);
        out.push(dir);
    }
    out.reverse();
    out
}

pub fn depth(path: &str) -> usize {
    path.matches('/').count()
}

/// `dir/name.ext` -> `dir/name_YYYYMMDD_HHMMSS.ext`, in the same directory.
pub fn timestamped_name(path: &str, stamp: OffsetDateTime) -> String {
    with_name_suffix(path, &format_stamp(stamp))
}

/// Where the discarded side of a conflict is kept inside the vault. A
/// non-zero `attempt` tells apart backups taken within the same second.
pub fn backup_path(
    conflict_folder: &str,
    path: &str,
    stamp: OffsetDateTime,
    attempt: usize,
) -> String {
    let suffix = match attempt {
        0 => format_stamp(stamp),
        n => format!("{}_{n}", format_stamp(stamp)),
    };
    format!(
        "{}/{}",
        conflict_folder.trim_end_matches('/'),
        with_name_suffix(path, &suffix)
    )
}

fn with_name_suffix(path: &str, suffix: &str) -> String {
    let (dir, name) = match path.rsplit_once('/') {
        Some((dir, name)) => (format!("{dir}/"), name),
        None => (String::new(), path),
    };

    if let Some((stem, ext)) = name.rsplit_once('.')
        && !stem.is_empty()
    {
        return format!("{dir}{stem}_{suffix}.{ext}");
    }

    format!("{dir}{name}_{suffix}")
}

fn format_stamp(stamp: OffsetDateTime) -> String {
    let format = format_description!("[year][month][day]_[hour][minute][second]");
    stamp
        .format(&format)
        .unwrap_or_else(|_| stamp.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn maps_relative_path_under_vault_root() {
        let root = PathBuf::from("/vault");
        let mapped = local_path_for(&root, "notes/a.md").unwrap();
        assert_eq!(mapped, PathBuf::from("/vault/notes/a.md"));
    }

    #[test]
    fn rejects_parent_dir() {
        let root = PathBuf::from("/vault");
        assert!(matches!(
            local_path_for(&root, "../secret"),
            Err(PathError::UnsupportedComponent(_))
        ));
        assert!(matches!(local_path_for(&root, ""), Err(PathError::Empty)));
    }

    #[test]
    fn ancestors_are_shallowest_first() {
        assert_eq!(ancestors("a/b/c.md"), vec!["a".to_string(), "a/b".to_string()]);
        assert!(ancestors("top.md").is_empty());
    }

    #[test]
    fn timestamped_name_keeps_directory_and_extension() {
        let stamp = datetime!(2024-03-05 07:08:09 UTC);
        assert_eq!(
            timestamped_name("notes/today.md", stamp),
            "notes/today_20240305_070809.md"
        );
        assert_eq!(timestamped_name("README", stamp), "README_20240305_070809");
        assert_eq!(timestamped_name(".env", stamp), ".env_20240305_070809");
    }

    #[test]
    fn backup_path_lives_in_conflict_folder() {
        let stamp = datetime!(2024-03-05 07:08:09 UTC);
        assert_eq!(
            backup_path("sync_conflicts/", "notes/today.md", stamp, 0),
            "sync_conflicts/notes/today_20240305_070809.md"
        );
        assert_eq!(
            backup_path("sync_conflicts", "notes/today.md", stamp, 2),
            "sync_conflicts/notes/today_20240305_070809_2.md"
        );
        assert_eq!(
            backup_path("sync_conflicts", "README", stamp, 1),
            "sync_conflicts/README_20240305_070809_1"
        );
    }
}
