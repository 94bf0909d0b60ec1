//! ---
//! prflow_section: "02-orchestration-core"
//! prflow_subsection: "module"
//! prflow_type: "source"
//! prflow_scope: "code"
//! prflow_description: "Collaborator seams injected into each invocation."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::pipeline::PipelineStatus;
use crate::pull_request::CommitStatus;
use crate::stack::StackStatus;

/// Source-control host (archives and commit statuses).
#[async_trait]
pub trait SourceHost: Send + Sync + 'static {
    /// Download the zip snapshot of `sha` into `dest`.
    async fn download_archive(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        sha: &str,
        dest: &Path,
    ) -> Result<()>;

    /// Create a commit status keyed by `sha` and `status.context`.
    async fn create_commit_status(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        sha: &str,
        status: &CommitStatus,
    ) -> Result<()>;
}

/// Versioned object storage for normalized source archives.
#[async_trait]
pub trait ArtifactStore: Send + Sync + 'static {
    /// Upload the file at `source`; returns the version id assigned by the store, if any.
    async fn put_object(&self, bucket: &str, key: &str, source: &Path) -> Result<Option<String>>;

    /// Download the latest version of `key` into `dest`.
    async fn get_object(&self, bucket: &str, key: &str, dest: &Path) -> Result<()>;
}

/// Current view of a stack as reported by the orchestration service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDescription {
    pub arn: String,
    pub status: StackStatus,
    pub parameters: BTreeMap<String, String>,
}

/// One entry of a stack's lifecycle event history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEvent {
    pub logical_resource_id: String,
    pub resource_status: String,
    pub reason: Option<String>,
}

/// Create or update request for a named stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRequest {
    pub name: String,
    pub template_body: String,
    pub parameters: BTreeMap<String, String>,
}

/// Infrastructure-orchestration service.
#[async_trait]
pub trait StackService: Send + Sync + 'static {
    async fn validate_template(&self, template_body: &str) -> Result<()>;

    /// Describe a stack by name or ARN; `None` when the service reports it does not exist.
    async fn describe_stack(&self, stack: &str) -> Result<Option<StackDescription>>;

    /// Template body currently deployed for the stack.
    async fn deployed_template(&self, stack: &str) -> Result<String>;

    /// Create the stack and return its ARN.
    async fn create_stack(&self, request: &StackRequest) -> Result<String>;

    /// Update the stack; `false` when the service reports there is nothing to update.
    async fn update_stack(&self, request: &StackRequest) -> Result<bool>;

    /// Delete the stack; `false` when it was already gone.
    async fn delete_stack(&self, stack: &str) -> Result<bool>;

    /// Most recent lifecycle events, newest first.
    async fn stack_events(&self, stack: &str) -> Result<Vec<StackEvent>>;
}

/// Managed pipeline service.
#[async_trait]
pub trait PipelineService: Send + Sync + 'static {
    /// Start a new run of `pipeline`; returns the execution id.
    async fn start_execution(&self, pipeline: &str) -> Result<String>;

    async fn execution_status(&self, pipeline: &str, execution_id: &str)
        -> Result<PipelineStatus>;
}

/// Service clients scoped to one invocation.
#[derive(Clone)]
pub struct Services {
    pub source_host: Arc<dyn SourceHost>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub stacks: Arc<dyn StackService>,
    pub pipelines: Arc<dyn PipelineService>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
