//! ---
//! prflow_section: "02-orchestration-core"
//! prflow_subsection: "module"
//! prflow_type: "source"
//! prflow_scope: "code"
//! prflow_description: "Core step orchestrator: stacks, artifacts, pipelines, and dispatch."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
pub mod archive;
pub mod error;
pub mod manager;
pub mod pipeline;
pub mod pull_request;
pub mod services;
pub mod snapshot;
pub mod source;
pub mod stack;

pub use error::{OrchestrationError, Result};
pub use manager::{classify, Dispatcher, OrchestrationManager};
pub use pipeline::{PipelineExecution, PipelineState, PipelineStatus};
pub use pull_request::{CommitState, CommitStatus, PullRequestRef, MAX_STATUS_DESCRIPTION};
pub use services::{
    ArtifactStore, PipelineService, Services, SourceHost, StackDescription, StackEvent,
    StackRequest, StackService,
};
pub use snapshot::{AuthToken, ManagerState, PipelineAction, Snapshot, SCHEMA_VERSION};
pub use source::{SourceArtifact, SourceState, ARTIFACT_KEY_PREFIX};
pub use stack::{
    canonical_template, content_digest, ApplyOutcome, ResourceStack, StackOperation, StackRef,
    StackStatus, WaitPolicy,
};
