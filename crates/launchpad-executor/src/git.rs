//! Git source fetcher.

use async_trait::async_trait;
use chrono::Utc;
use launchpad_core::secret::{SecretRef, SecretStore};
use launchpad_core::source::{RepositoryRef, SourceFetcher, SourceSnapshot};
use launchpad_core::{Error, Result, Uid};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

const REDACTED: &str = "[REDACTED]";

/// Clones the watched repository into a fresh directory per fetch.
pub struct GitSourceFetcher {
    clone_url: String,
    work_dir: PathBuf,
    token: Option<(Arc<dyn SecretStore>, SecretRef)>,
}

impl GitSourceFetcher {
    pub fn new(repository: &RepositoryRef, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            clone_url: repository.clone_url(),
            work_dir: work_dir.into(),
            token: None,
        }
    }

    /// Clone from an explicit URL instead of the hosted repository.
    pub fn with_clone_url(mut self, clone_url: impl Into<String>) -> Self {
        self.clone_url = clone_url.into();
        self
    }

    /// Authenticate HTTPS clones with the token held in `secret`.
    pub fn with_token(mut self, store: Arc<dyn SecretStore>, secret: SecretRef) -> Self {
        self.token = Some((store, secret));
        self
    }

    async fn resolve_token(&self) -> Result<Option<String>> {
        let Some((store, secret)) = &self.token else {
            return Ok(None);
        };
        let value = store.get(secret).await?;
        Ok(value.as_string().map(str::to_string))
    }

    async fn git(&self, args: &[&str], dir: Option<&Path>, token: Option<&str>) -> Result<String> {
        let mut command = Command::new("git");
        command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = dir {
            command.current_dir(dir);
        }

        let output = command
            .output()
            .await
            .map_err(|e| Error::ExecutionFailed(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = redact(stderr.trim(), token);
            // Don't log the raw error as it may contain the token
            warn!(command = args.first().copied().unwrap_or("git"), "git failed");
            return Err(Error::ExecutionFailed(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                message
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Clone `branch` into `checkout` and return the resolved head.
    async fn clone_into(
        &self,
        checkout: &Path,
        branch: &str,
        revision: Option<&str>,
    ) -> Result<Option<String>> {
        let checkout_str = checkout.to_string_lossy().to_string();
        let token = self.resolve_token().await?;
        let url = authenticated_url(&self.clone_url, token.as_deref());

        info!(clone_url = %self.clone_url, branch, revision, path = %checkout.display(), "cloning repository");

        // A pinned revision may be behind the branch head, so only shallow
        // clone when fetching the head itself.
        let mut args = vec!["clone", "--single-branch", "--branch", branch];
        if revision.is_none() {
            args.extend(["--depth", "1"]);
        }
        args.extend([url.as_str(), checkout_str.as_str()]);
        self.git(&args, None, token.as_deref()).await?;

        if let Some(revision) = revision {
            self.git(
                &["checkout", "--detach", revision],
                Some(checkout),
                token.as_deref(),
            )
            .await?;
        }

        let head = self
            .git(&["rev-parse", "HEAD"], Some(checkout), token.as_deref())
            .await
            .ok()
            .filter(|head| !head.is_empty());

        Ok(head)
    }
}

/// `https://github.com/o/r.git` -> `https://x-access-token:<token>@github.com/o/r.git`
fn authenticated_url(clone_url: &str, token: Option<&str>) -> String {
    match (token, clone_url.strip_prefix("https://")) {
        (Some(token), Some(rest)) => format!("https://x-access-token:{}@{}", token, rest),
        _ => clone_url.to_string(),
    }
}

fn redact(message: &str, token: Option<&str>) -> String {
    match token.filter(|t| !t.is_empty()) {
        Some(token) => message.replace(token, REDACTED),
        None => message.to_string(),
    }
}

#[async_trait]
impl SourceFetcher for GitSourceFetcher {
    fn name(&self) -> &'static str {
        "git"
    }

    async fn fetch(&self, branch: &str, revision: Option<&str>) -> Result<SourceSnapshot> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("cannot create work dir: {e}")))?;

        let checkout = self.work_dir.join(format!("src-{}", Uid::new()));
        let head = match self.clone_into(&checkout, branch, revision).await {
            Ok(head) => head,
            Err(err) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&checkout).await {
                    debug!(path = %checkout.display(), error = %cleanup, "no partial checkout to remove");
                }
                return Err(err);
            }
        };

        info!(path = %checkout.display(), revision = ?head, "repository cloned");

        Ok(SourceSnapshot {
            revision: head,
            path: checkout,
            fetched_at: Utc::now(),
        })
    }
}
