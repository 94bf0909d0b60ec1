//! ---
//! prflow_section: "03-external-services"
//! prflow_subsection: "module"
//! prflow_type: "source"
//! prflow_scope: "code"
//! prflow_description: "GitHub adapter: zipball downloads and commit statuses."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
use std::path::Path;

use async_trait::async_trait;
use octocrab::models::StatusState;
use octocrab::Octocrab;
use prflow_core::{CommitState, CommitStatus, OrchestrationError, Result, SourceHost};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use tracing::{debug, info};
use url::Url;

const SERVICE: &str = "github";
const USER_AGENT: &str = concat!("prflow/", env!("CARGO_PKG_VERSION"));
const ACCEPT_JSON: &str = "application/vnd.github+json";

/// [`SourceHost`] backed by the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: Url,
}

impl GitHubClient {
    pub fn new(mut api_base: Url) -> Result<Self> {
        // relative joins drop the last segment otherwise (GitHub Enterprise `/api/v3`)
        if !api_base.path().ends_with('/') {
            let path = format!("{}/", api_base.path());
            api_base.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| OrchestrationError::service(SERVICE, "client", err))?;
        Ok(Self { http, api_base })
    }

    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    fn zipball_url(&self, owner: &str, repo: &str, sha: &str) -> Result<Url> {
        self.api_base
            .join(&format!("repos/{owner}/{repo}/zipball/{sha}"))
            .map_err(|err| OrchestrationError::Validation(format!("invalid zipball url: {err}")))
    }

    /// Octocrab is authenticated per request since the token travels with the snapshot.
    fn octocrab(&self, token: &str) -> Result<Octocrab> {
        Octocrab::builder()
            .personal_token(token.to_owned())
            .base_uri(self.api_base.as_str())
            .and_then(|builder| builder.build())
            .map_err(|err| OrchestrationError::service(SERVICE, "client", err))
    }
}

fn status_state(state: CommitState) -> StatusState {
    match state {
        CommitState::Pending => StatusState::Pending,
        CommitState::Success => StatusState::Success,
        CommitState::Failure => StatusState::Failure,
        CommitState::Error => StatusState::Error,
    }
}

#[async_trait]
impl SourceHost for GitHubClient {
    async fn download_archive(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        sha: &str,
        dest: &Path,
    ) -> Result<()> {
        let url = self.zipball_url(owner, repo, sha)?;
        debug!(url = %url, "requesting zipball");
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, format!("token {token}"))
            .header(ACCEPT, ACCEPT_JSON)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| OrchestrationError::service(SERVICE, "download_archive", err))?;
        let body = response
            .bytes()
            .await
            .map_err(|err| OrchestrationError::service(SERVICE, "download_archive", err))?;
        tokio::fs::write(dest, &body).await?;
        info!(owner, repo, sha, bytes = body.len(), path = %dest.display(), "zipball downloaded");
        Ok(())
    }

    async fn create_commit_status(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        sha: &str,
        status: &CommitStatus,
    ) -> Result<()> {
        self.octocrab(token)?
            .repos(owner, repo)
            .create_status(sha.to_owned(), status_state(status.state))
            .context(status.context.clone())
            .description(status.description.clone())
            .send()
            .await
            .map_err(|err| OrchestrationError::service(SERVICE, "create_commit_status", err))?;
        debug!(owner, repo, sha, state = %status.state, "commit status created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zipball_url_is_relative_to_api_base() {
        let client = GitHubClient::new(Url::parse("https://ghe.example.com/api/v3/").unwrap()).unwrap();
        assert_eq!(
            client.zipball_url("octo", "repo", "abc123").unwrap().as_str(),
            "https://ghe.example.com/api/v3/repos/octo/repo/zipball/abc123"
        );
    }

    #[test]
    fn every_commit_state_maps() {
        assert!(matches!(status_state(CommitState::Pending), StatusState::Pending));
        assert!(matches!(status_state(CommitState::Error), StatusState::Error));
    }
}
