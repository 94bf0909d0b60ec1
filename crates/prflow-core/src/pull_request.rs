//! ---
//! prflow_section: "02-orchestration-core"
//! prflow_subsection: "module"
//! prflow_type: "source"
//! prflow_scope: "code"
//! prflow_description: "Pull request metadata and commit status reporting."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use tracing::info;

use crate::error::{OrchestrationError, Result};
use crate::services::SourceHost;

/// Longest description the source-control host accepts on a commit status.
pub const MAX_STATUS_DESCRIPTION: usize = 140;

/// Commit status states accepted by the source-control host.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
    Error,
}

/// A commit status ready to be pushed to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatus {
    pub state: CommitState,
    /// Label the host deduplicates on together with the sha (the pipeline name).
    pub context: String,
    pub description: String,
}

impl CommitStatus {
    /// Build a status, truncating the description to the host limit.
    pub fn new(state: CommitState, context: impl Into<String>, description: &str) -> Self {
        let description = description
            .chars()
            .take(MAX_STATUS_DESCRIPTION)
            .collect::<String>();
        Self {
            state,
            context: context.into(),
            description,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebhookPullRequest {
    number: u64,
    title: String,
    url: String,
    #[serde(default)]
    merged: Option<bool>,
    head: WebhookHead,
}

#[derive(Debug, Deserialize)]
struct WebhookHead {
    #[serde(rename = "ref")]
    git_ref: String,
    sha: String,
    repo: WebhookRepo,
}

#[derive(Debug, Deserialize)]
struct WebhookRepo {
    name: String,
    owner: WebhookOwner,
}

#[derive(Debug, Deserialize)]
struct WebhookOwner {
    login: String,
}

/// Immutable view over the pull request a workflow run belongs to.
///
/// Built once from the webhook payload with [`PullRequestRef::from_webhook`];
/// later steps adopt the serialized form from the snapshot as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    owner: String,
    repo_name: String,
    branch: String,
    sha: String,
    number: u64,
    title: String,
    url: String,
    #[serde(default)]
    merged: bool,
}

impl PullRequestRef {
    /// Parse the `pull_request` object of a source-control webhook.
    pub fn from_webhook(payload: &serde_json::Value) -> Result<Self> {
        let raw: WebhookPullRequest = serde_json::from_value(payload.clone())
            .map_err(|err| OrchestrationError::Validation(format!("invalid pull request webhook: {err}")))?;
        let pr = Self {
            owner: raw.head.repo.owner.login,
            repo_name: raw.head.repo.name,
            branch: raw.head.git_ref,
            sha: raw.head.sha,
            number: raw.number,
            title: raw.title,
            url: raw.url,
            merged: raw.merged.unwrap_or(false),
        };
        pr.validate()?;
        Ok(pr)
    }

    /// Reject identities that cannot address a commit on the host.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("head.sha", &self.sha),
            ("head.repo.owner.login", &self.owner),
            ("head.repo.name", &self.repo_name),
        ] {
            if value.trim().is_empty() {
                return Err(OrchestrationError::Validation(format!(
                    "pull request field {field} must not be empty"
                )));
            }
        }
        Ok(())
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo_name(&self) -> &str {
        &self.repo_name
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn sha(&self) -> &str {
        &self.sha
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn merged(&self) -> bool {
        self.merged
    }

    /// Push a commit status given as a raw state name.
    ///
    /// `status` must be one of `pending`, `success`, `failure`, `error`; anything
    /// else fails with [`OrchestrationError::Validation`] before the host is contacted.
    pub async fn set_status(
        &self,
        host: &dyn SourceHost,
        token: &str,
        status: &str,
        context: &str,
        description: &str,
    ) -> Result<CommitStatus> {
        let state = status.parse::<CommitState>().map_err(|_| {
            OrchestrationError::Validation(format!(
                "commit status {status:?} is not one of pending, success, failure, error"
            ))
        })?;
        self.push_status(host, token, CommitStatus::new(state, context, description))
            .await
    }

    /// Push an already typed commit status for the head sha.
    pub async fn push_status(
        &self,
        host: &dyn SourceHost,
        token: &str,
        status: CommitStatus,
    ) -> Result<CommitStatus> {
        host.create_commit_status(token, &self.owner, &self.repo_name, &self.sha, &status)
            .await?;
        info!(
            pr = self.number,
            sha = %self.sha,
            state = %status.state,
            context = %status.context,
            "commit status pushed"
        );
        Ok(status)
    }
}

impl std::fmt::Display for PullRequestRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}#{} ({} @ {})",
            self.owner, self.repo_name, self.number, self.branch, self.sha
        )
    }
}
