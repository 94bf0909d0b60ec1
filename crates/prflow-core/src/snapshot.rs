//! ---
//! prflow_section: "02-orchestration-core"
//! prflow_subsection: "module"
//! prflow_type: "source"
//! prflow_scope: "code"
//! prflow_description: "Versioned step snapshot exchanged with the external workflow engine."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::{OrchestrationError, Result};
use crate::pipeline::PipelineState;
use crate::pull_request::PullRequestRef;
use crate::source::SourceState;
use crate::stack::StackRef;

/// Newest snapshot layout this build reads and writes.
pub const SCHEMA_VERSION: u32 = 1;

fn current_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Selector of the next step, or the classification produced by `HandleWebhook`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
pub enum PipelineAction {
    HandleWebhook,
    RetrieveSource,
    BuildPipeline,
    StartPipeline,
    CheckPipelineStatus,
    ReportStatus,
    TeardownStack,
    #[serde(rename = "build_stack")]
    #[strum(serialize = "build_stack")]
    BuildStack,
    #[serde(rename = "test")]
    #[strum(serialize = "test")]
    Test,
    #[serde(rename = "prod_deploy")]
    #[strum(serialize = "prod_deploy")]
    ProdDeploy,
    #[serde(rename = "delete_stack")]
    #[strum(serialize = "delete_stack")]
    DeleteStack,
    #[serde(rename = "none")]
    #[strum(serialize = "none")]
    NoAction,
}

impl PipelineAction {
    /// True for actions that name a step; false for webhook classifications.
    pub fn is_dispatchable(self) -> bool {
        matches!(
            self,
            PipelineAction::HandleWebhook
                | PipelineAction::RetrieveSource
                | PipelineAction::BuildPipeline
                | PipelineAction::StartPipeline
                | PipelineAction::CheckPipelineStatus
                | PipelineAction::ReportStatus
                | PipelineAction::TeardownStack
        )
    }
}

/// Source-control OAuth token; never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Serialized orchestration state for one pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerState {
    pub bucket_name: String,
    #[serde(default)]
    pub auth_token: Option<AuthToken>,
    pub pull_request: PullRequestRef,
    pub pipeline: PipelineState,
    pub stack: StackRef,
    pub source: SourceState,
}

/// Document passed between invocations by the external workflow engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    pub pipeline_action: PipelineAction,
    /// Webhook event name; only read by `HandleWebhook`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Raw webhook `pull_request` object; only read by `HandleWebhook`, which
    /// carries it forward unchanged. Later steps use `manager.pull_request`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager: Option<ManagerState>,
}

impl Snapshot {
    /// Parse and version-check a snapshot document.
    pub fn from_json(raw: &str) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_str(raw)
            .map_err(|err| OrchestrationError::Validation(format!("invalid snapshot: {err}")))?;
        snapshot.check_version()?;
        Ok(snapshot)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn check_version(&self) -> Result<()> {
        if self.schema_version == 0 || self.schema_version > SCHEMA_VERSION {
            return Err(OrchestrationError::Validation(format!(
                "unsupported snapshot schema_version {} (supported up to {SCHEMA_VERSION})",
                self.schema_version
            )));
        }
        Ok(())
    }

    pub fn take_manager(&mut self) -> Result<ManagerState> {
        self.manager
            .take()
            .ok_or(OrchestrationError::MissingState("manager"))
    }
}
