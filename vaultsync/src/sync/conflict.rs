use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A path both replicas changed since the last common snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub path: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub local_modified_time: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub remote_modified_time: Option<OffsetDateTime>,
    pub local_hash: Option<String>,
    pub remote_hash: Option<String>,
    /// The remote side removed the path while the local copy was edited.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub remote_deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    Local,
    Remote,
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictResolution::Local => f.write_str("local"),
            ConflictResolution::Remote => f.write_str("remote"),
        }
    }
}

impl FromStr for ConflictResolution {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" | "l" => Ok(ConflictResolution::Local),
            "remote" | "r" => Ok(ConflictResolution::Remote),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

pub type Resolutions = HashMap<String, ConflictResolution>;

/// Decides every conflict of one reconciliation at once. Returning `None`
/// cancels the operation before anything is transferred.
#[async_trait]
pub trait ConflictHandler: Send + Sync {
    async fn resolve(&self, conflicts: &[ConflictInfo]) -> Option<Resolutions>;
}

/// Resolves every conflict toward one side without asking.
#[derive(Debug, Clone, Copy)]
pub struct PreferSide(pub ConflictResolution);

#[async_trait]
impl ConflictHandler for PreferSide {
    async fn resolve(&self, conflicts: &[ConflictInfo]) -> Option<Resolutions> {
        Some(
            conflicts
                .iter()
                .map(|conflict| (conflict.path.clone(), self.0))
                .collect(),
        )
    }
}

/// Pairs each conflict with its answer. Any unanswered path cancels the whole
/// batch, same as an outright refusal.
pub fn pair_resolutions(
    conflicts: Vec<ConflictInfo>,
    resolutions: Option<Resolutions>,
) -> Option<Vec<(ConflictInfo, ConflictResolution)>> {
    let resolutions = resolutions?;
    conflicts
        .into_iter()
        .map(|conflict| {
            let choice = resolutions.get(&conflict.path).copied()?;
            Some((conflict, choice))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict(path: &str) -> ConflictInfo {
        ConflictInfo {
            path: path.into(),
            local_modified_time: None,
            remote_modified_time: None,
            local_hash: Some("h1".into()),
            remote_hash: Some("h2".into()),
            remote_deleted: false,
        }
    }

    #[tokio::test]
    async fn prefer_side_answers_every_path() {
        let conflicts = vec![conflict("a.md"), conflict("b/c.md")];
        let answers = PreferSide(ConflictResolution::Remote)
            .resolve(&conflicts)
            .await
            .unwrap();
        assert_eq!(answers.len(), 2);
        assert_eq!(answers["b/c.md"], ConflictResolution::Remote);
    }

    #[test]
    fn missing_answer_cancels() {
        let mut answers = Resolutions::new();
        answers.insert("a.md".into(), ConflictResolution::Local);
        let conflicts = vec![conflict("a.md"), conflict("b.md")];
        assert!(pair_resolutions(conflicts, Some(answers)).is_none());
        assert!(pair_resolutions(vec![conflict("a.md")], None).is_none());
    }

    #[test]
    fn complete_answers_keep_conflict_order() {
        let mut answers = Resolutions::new();
        answers.insert("a.md".into(), ConflictResolution::Local);
        answers.insert("b.md".into(), ConflictResolution::Remote);
        let conflicts = vec![conflict("b.md"), conflict("a.md")];
        let paired = pair_resolutions(conflicts, Some(answers)).unwrap();
        let flat: Vec<_> = paired.iter().map(|(c, r)| (c.path.as_str(), *r)).collect();
        assert_eq!(
            flat,
            vec![("b.md", ConflictResolution::Remote), ("a.md", ConflictResolution::Local)]
        );
    }

    #[test]
    fn parses_side_names() {
        assert_eq!("Local".parse::<ConflictResolution>(), Ok(ConflictResolution::Local));
        assert_eq!("r".parse::<ConflictResolution>(), Ok(ConflictResolution::Remote));
        assert!("both".parse::<ConflictResolution>().is_err());
    }

    #[test]
    fn remote_deleted_flag_serializes_only_when_set() {
        let mut info = conflict("a.md");
        let value = serde_json::to_value(&info).unwrap();
        assert!(value.get("remoteDeleted").is_none());
        assert_eq!(value["localHash"], "h1");
        info.remote_deleted = true;
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["remoteDeleted"], true);
    }
}
