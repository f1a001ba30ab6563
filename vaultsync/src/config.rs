use std::path::{Path, PathBuf};

use anyhow::{Context, bail};

use crate::sync::transfer::DEFAULT_CONCURRENCY;

pub const DEFAULT_CONFLICT_FOLDER: &str = "sync_conflicts";
const DEFAULT_VAULT_DIR_NAME: &str = "Vault";

/// Settings every engine operation receives explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub exclude_patterns: Vec<String>,
    pub conflict_folder: String,
    pub concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            exclude_patterns: Vec::new(),
            conflict_folder: DEFAULT_CONFLICT_FOLDER.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl SyncConfig {
    pub fn with_exclude_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_conflict_folder(mut self, folder: impl Into<String>) -> Self {
        self.conflict_folder = folder.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    AccessToken(String),
    RefreshToken {
        refresh_token: String,
        client_id: String,
        client_secret: String,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::AccessToken(_) => f.write_str("AccessToken(..)"),
            Credentials::RefreshToken { client_id, .. } => f
                .debug_struct("RefreshToken")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub vault_dir: PathBuf,
    pub folder_id: String,
    pub credentials: Credentials,
    pub sync: SyncConfig,
    pub api_base_url: Option<String>,
    pub oauth_base_url: Option<String>,
}

impl AppConfig {
    /// Reads `VAULTSYNC_*` variables, after loading a `.env` file if present.
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        let home = dirs::home_dir().context("home directory is unavailable")?;
        Self::from_vars(|name| std::env::var(name).ok(), &home)
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>, home: &Path) -> anyhow::Result<Self> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let vault_dir = var("VAULTSYNC_VAULT_DIR")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| home.join(DEFAULT_VAULT_DIR_NAME));
        let folder_id = var("VAULTSYNC_FOLDER_ID").context("VAULTSYNC_FOLDER_ID is not set")?;

        let credentials = match var("VAULTSYNC_TOKEN") {
            Some(token) => Credentials::AccessToken(token),
            None => {
                let refresh_token = var("VAULTSYNC_REFRESH_TOKEN")
                    .context("set VAULTSYNC_TOKEN or VAULTSYNC_REFRESH_TOKEN")?;
                Credentials::RefreshToken {
                    refresh_token,
                    client_id: var("VAULTSYNC_CLIENT_ID")
                        .context("VAULTSYNC_CLIENT_ID is not set")?,
                    client_secret: var("VAULTSYNC_CLIENT_SECRET")
                        .context("VAULTSYNC_CLIENT_SECRET is not set")?,
                }
            }
        };

        let mut sync = SyncConfig::default();
        if let Some(patterns) = var("VAULTSYNC_EXCLUDE") {
            sync = sync.with_exclude_patterns(
                patterns
                    .split(',')
                    .map(str::trim)
                    .filter(|pattern| !pattern.is_empty()),
            );
        }
        if let Some(folder) = var("VAULTSYNC_CONFLICT_FOLDER") {
            let folder = folder.trim().trim_matches('/');
            if folder.is_empty() || folder.split('/').any(|part| part == "..") {
                bail!("VAULTSYNC_CONFLICT_FOLDER must be a relative folder inside the vault");
            }
            sync = sync.with_conflict_folder(folder);
        }
        if let Some(value) = var("VAULTSYNC_CONCURRENCY") {
            let concurrency = value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|value| *value > 0)
                .with_context(|| {
                    format!("VAULTSYNC_CONCURRENCY must be a positive integer, got {value:?}")
                })?;
            sync = sync.with_concurrency(concurrency);
        }

        Ok(Self {
            vault_dir,
            folder_id,
            credentials,
            sync,
            api_base_url: var("VAULTSYNC_API_BASE_URL"),
            oauth_base_url: var("VAULTSYNC_OAUTH_BASE_URL"),
        })
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_vars(|name| vars.get(name).cloned(), Path::new("/home/user"))
    }

    #[test]
    fn defaults_apply_with_access_token() {
        let config = load(&[("VAULTSYNC_FOLDER_ID", "f1"), ("VAULTSYNC_TOKEN", "t")]).unwrap();
        assert_eq!(config.vault_dir, PathBuf::from("/home/user/Vault"));
        assert_eq!(config.folder_id, "f1");
        assert_eq!(config.credentials, Credentials::AccessToken("t".into()));
        assert_eq!(config.sync, SyncConfig::default());
        assert_eq!(config.sync.conflict_folder, "sync_conflicts");
        assert_eq!(config.sync.concurrency, 5);
    }

    #[test]
    fn reads_overrides_and_expands_home() {
        let config = load(&[
            ("VAULTSYNC_FOLDER_ID", "f1"),
            ("VAULTSYNC_VAULT_DIR", "~/notes"),
            ("VAULTSYNC_REFRESH_TOKEN", "r"),
            ("VAULTSYNC_CLIENT_ID", "id"),
            ("VAULTSYNC_CLIENT_SECRET", "secret"),
            ("VAULTSYNC_EXCLUDE", ".git, **/*.tmp,,"),
            ("VAULTSYNC_CONFLICT_FOLDER", "backups/"),
            ("VAULTSYNC_CONCURRENCY", "2"),
        ])
        .unwrap();
        assert_eq!(config.vault_dir, PathBuf::from("/home/user/notes"));
        assert!(matches!(
            config.credentials,
            Credentials::RefreshToken { ref client_id, .. } if client_id == "id"
        ));
        assert_eq!(config.sync.exclude_patterns, vec![".git", "**/*.tmp"]);
        assert_eq!(config.sync.conflict_folder, "backups");
        assert_eq!(config.sync.concurrency, 2);
    }

    #[test]
    fn missing_folder_or_credentials_is_an_error() {
        assert!(load(&[("VAULTSYNC_TOKEN", "t")]).is_err());
        assert!(load(&[("VAULTSYNC_FOLDER_ID", "f1")]).is_err());
        assert!(load(&[("VAULTSYNC_FOLDER_ID", "f1"), ("VAULTSYNC_REFRESH_TOKEN", "r")]).is_err());
    }

    #[test]
    fn rejects_bad_concurrency_and_escaping_conflict_folder() {
        let base = [("VAULTSYNC_FOLDER_ID", "f1"), ("VAULTSYNC_TOKEN", "t")];
        let with = |extra: (&'static str, &'static str)| {
            let mut pairs = base.to_vec();
            pairs.push(extra);
            load(&pairs)
        };
        assert!(with(("VAULTSYNC_CONCURRENCY", "0")).is_err());
        assert!(with(("VAULTSYNC_CONCURRENCY", "many")).is_err());
        assert!(with(("VAULTSYNC_CONFLICT_FOLDER", "../outside")).is_err());
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let debug = format!("{:?}", Credentials::AccessToken("secret-token".into()));
        assert!(!debug.contains("secret-token"));
    }
}
