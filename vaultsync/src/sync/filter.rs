use regex::Regex;
use thiserror::Error;

use super::snapshot::LOCAL_META_DIR;
use crate::config::SyncConfig;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid exclude pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Compiled exclusion rules. A path is excluded when a pattern matches the
/// whole path or one of its leading directories.
#[derive(Debug, Clone)]
pub struct PathFilter {
    rules: Vec<Regex>,
}

impl PathFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, FilterError> {
        let rules = patterns
            .iter()
            .map(|pattern| compile(pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// User patterns plus the conflict folder and the local meta directory,
    /// so neither backups nor the snapshot document are ever synced.
    pub fn for_config(config: &SyncConfig) -> Result<Self, FilterError> {
        let mut patterns = config.exclude_patterns.clone();
        patterns.push(format!("{}/**", config.conflict_folder.trim_end_matches('/')));
        patterns.push(format!("{LOCAL_META_DIR}/**"));
        Self::new(&patterns)
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.rules.iter().any(|rule| rule.is_match(path))
    }
}

pub fn excluded<S: AsRef<str>>(path: &str, patterns: &[S]) -> bool {
    patterns
        .iter()
        .filter_map(|pattern| compile(pattern.as_ref()).ok())
        .any(|rule| rule.is_match(path))
}

pub fn glob_to_regex(pattern: &str) -> String {
    let pattern = pattern.trim_matches('/');
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    // `**/` also matches zero directories.
                    chars.next();
                    out.push_str("(?:.*/)?");
                } else {
                    out.push_str(".*");
                }
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    out
}

fn compile(pattern: &str) -> Result<Regex, FilterError> {
    let source = format!("^(?:{})(?:/.*)?$", glob_to_regex(pattern));
    Regex::new(&source).map_err(|source| FilterError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}
