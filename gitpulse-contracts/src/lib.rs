//! Command messages exchanged between the GitPulse services over the
//! broker. Bodies are UTF-8 JSON; field names are pinned to the deployed
//! wire format, so changes here are protocol changes.

use chrono::{DateTime, Utc};
use gitpulse_model::{Commit, RepoName, Repository};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discriminant of an [`IntentCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    NewIntent,
    UpdateIntent,
    CancelIntent,
}

/// The intent the harvester should act on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentPayload {
    pub id: Uuid,
    pub repo_owner: String,
    pub repo_name: String,
    pub from: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl IntentPayload {
    pub fn repo(&self) -> gitpulse_model::ModelResult<RepoName> {
        RepoName::new(self.repo_owner.clone(), self.repo_name.clone())
    }
}

/// Command consumed by the harvester: start, refresh, or stop watching
/// one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentCommand {
    pub kind: IntentKind,
    #[serde(rename = "payload")]
    pub intent: IntentPayload,
}

impl IntentCommand {
    pub fn new(kind: IntentKind, intent: IntentPayload) -> Self {
        Self { kind, intent }
    }
}

/// Discriminant of a [`CommitsCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitsKind {
    NewCommits,
    NewRepoInfo,
}

/// Harvested data: a commit batch or one repository metadata record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitPayload {
    #[serde(default)]
    pub commits: Vec<Commit>,
    #[serde(default)]
    pub repo: Option<Repository>,
}

/// Command consumed by the manager's ingestion loop.
///
/// The payload key is misspelled on the wire; deployed consumers expect
/// it, so it stays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitsCommand {
    pub kind: CommitsKind,
    #[serde(rename = "paylad")]
    pub payload: CommitPayload,
}

impl CommitsCommand {
    pub fn new_commits(commits: Vec<Commit>) -> Self {
        Self {
            kind: CommitsKind::NewCommits,
            payload: CommitPayload {
                commits,
                repo: None,
            },
        }
    }

    pub fn new_repo_info(repo: Repository) -> Self {
        Self {
            kind: CommitsKind::NewRepoInfo,
            payload: CommitPayload {
                commits: Vec::new(),
                repo: Some(repo),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_command_wire_shape() {
        let cmd = IntentCommand::new(
            IntentKind::NewIntent,
            IntentPayload {
                id: Uuid::nil(),
                repo_owner: "octocat".into(),
                repo_name: "hello-world".into(),
                from: Utc::now(),
                until: Utc::now(),
            },
        );
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&cmd).unwrap()).unwrap();
        assert_eq!(value["kind"], "new_intent");
        assert_eq!(value["payload"]["repo_owner"], "octocat");
        assert_eq!(value["payload"]["repo_name"], "hello-world");
    }

    #[test]
    fn commits_command_keeps_legacy_payload_key() {
        let cmd = CommitsCommand::new_repo_info(Repository {
            id: 42,
            full_name: "octocat/hello-world".into(),
            ..Repository::default()
        });
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&cmd).unwrap()).unwrap();
        assert_eq!(value["kind"], "new_repo_info");
        assert_eq!(value["paylad"]["repo"]["full_name"], "octocat/hello-world");
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn commits_round_trip() {
        let cmd = CommitsCommand::new_commits(vec![Commit {
            hash: "abc123".into(),
            author: gitpulse_model::Author {
                id: 7,
                name: "Mona".into(),
                email: "mona@github.com".into(),
                username: "octocat".into(),
            },
            message: "initial".into(),
            url: None,
            created_at: Utc::now(),
            repository: Repository {
                full_name: "octocat/hello-world".into(),
                ..Repository::default()
            },
        }]);
        let decoded: CommitsCommand =
            serde_json::from_str(&serde_json::to_string(&cmd).unwrap()).unwrap();
        assert_eq!(decoded, cmd);
    }
}
