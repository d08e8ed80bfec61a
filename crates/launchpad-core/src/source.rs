//! Source repositories, push events and fetched snapshots.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::Result;

/// Revision GitHub sends as `after` when a branch is deleted.
const NULL_REVISION: &str = "0000000000000000000000000000000000000000";

/// A source repository on the hosting provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub owner: String,
    pub name: String,
}

impl RepositoryRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// `owner/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.owner, self.name)
    }
}

/// A push delivered by the source-control webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub r#ref: String,
    pub branch: Option<String>,
    /// Head revision after the push.
    pub revision: String,
    pub repository_full_name: String,
    pub pusher: String,
    pub head_message: Option<String>,
}

impl PushEvent {
    /// Parse a GitHub push webhook payload.
    pub fn from_github_payload(payload: &serde_json::Value) -> Option<Self> {
        let r#ref = payload.get("ref")?.as_str()?.to_string();
        let revision = payload.get("after")?.as_str()?.to_string();
        let repository_full_name = payload
            .get("repository")?
            .get("full_name")?
            .as_str()?
            .to_string();

        let branch = r#ref.strip_prefix("refs/heads/").map(String::from);

        let pusher = payload
            .get("pusher")
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("unknown")
            .to_string();

        let head_message = payload
            .get("head_commit")
            .and_then(|c| c.get("message"))
            .and_then(|m| m.as_str())
            .map(|m| m.lines().next().unwrap_or_default().to_string());

        Some(PushEvent {
            r#ref,
            branch,
            revision,
            repository_full_name,
            pusher,
            head_message,
        })
    }

    /// Whether this push removed the ref instead of moving it.
    pub fn is_deletion(&self) -> bool {
        self.revision == NULL_REVISION
    }

    /// Whether this push should trigger a run for `branch`.
    pub fn targets_branch(&self, branch: &str) -> bool {
        !self.is_deletion() && self.branch.as_deref() == Some(branch)
    }
}

/// Source retrieved for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    /// Resolved revision; `None` if the fetcher could not determine it.
    pub revision: Option<String>,
    /// Local checkout, owned by the run and removed when the run ends.
    pub path: PathBuf,
    pub fetched_at: DateTime<Utc>,
}

impl SourceSnapshot {
    /// The resolved revision, if it is non-blank.
    pub fn resolved_revision(&self) -> Option<&str> {
        self.revision
            .as_deref()
            .map(str::trim)
            .filter(|rev| !rev.is_empty())
    }
}

/// Retrieves source for a branch, optionally pinned to a revision.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Name of this fetcher.
    fn name(&self) -> &'static str;

    /// Fetch the branch head, or `revision` when given.
    async fn fetch(&self, branch: &str, revision: Option<&str>) -> Result<SourceSnapshot>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(r#ref: &str, after: &str) -> serde_json::Value {
        json!({
            "ref": r#ref,
            "before": "1111111111111111111111111111111111111111",
            "after": after,
            "repository": { "full_name": "acme/storefront" },
            "pusher": { "name": "octocat" },
            "head_commit": { "id": after, "message": "Fix checkout\n\nLonger body" }
        })
    }

    #[test]
    fn parses_branch_push() {
        let event = PushEvent::from_github_payload(&payload(
            "refs/heads/main",
            "abcdef1234567890abcdef1234567890abcdef12",
        ))
        .unwrap();

        assert_eq!(event.branch.as_deref(), Some("main"));
        assert_eq!(event.repository_full_name, "acme/storefront");
        assert_eq!(event.pusher, "octocat");
        assert_eq!(event.head_message.as_deref(), Some("Fix checkout"));
        assert!(event.targets_branch("main"));
        assert!(!event.targets_branch("develop"));
    }

    #[test]
    fn tag_push_targets_no_branch() {
        let event = PushEvent::from_github_payload(&payload("refs/tags/v1.0.0", "abc")).unwrap();
        assert_eq!(event.branch, None);
        assert!(!event.targets_branch("main"));
    }

    #[test]
    fn branch_deletion_does_not_trigger() {
        let event = PushEvent::from_github_payload(&payload("refs/heads/main", NULL_REVISION)).unwrap();
        assert!(event.is_deletion());
        assert!(!event.targets_branch("main"));
    }

    #[test]
    fn missing_fields_yield_none() {
        assert!(PushEvent::from_github_payload(&json!({ "zen": "Keep it simple" })).is_none());
    }

    #[test]
    fn repository_urls() {
        let repo = RepositoryRef::new("acme", "storefront");
        assert_eq!(repo.full_name(), "acme/storefront");
        assert_eq!(repo.clone_url(), "https://github.com/acme/storefront.git");
    }
}
