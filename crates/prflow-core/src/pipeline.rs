//! ---
//! prflow_section: "02-orchestration-core"
//! prflow_subsection: "module"
//! prflow_type: "source"
//! prflow_scope: "code"
//! prflow_description: "Managed pipeline execution handle."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use tracing::info;

use crate::error::{OrchestrationError, Result};
use crate::pull_request::CommitState;
use crate::services::PipelineService;

/// Execution status as reported by the pipeline service.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "PascalCase")]
#[strum(serialize_all = "PascalCase")]
pub enum PipelineStatus {
    InProgress,
    Stopping,
    Stopped,
    Succeeded,
    Superseded,
    Failed,
    Cancelled,
}

impl PipelineStatus {
    /// Commit status reported for this execution status.
    pub fn commit_state(self) -> CommitState {
        match self {
            PipelineStatus::Succeeded => CommitState::Success,
            PipelineStatus::Failed => CommitState::Failure,
            PipelineStatus::Superseded | PipelineStatus::Stopped | PipelineStatus::Cancelled => {
                CommitState::Error
            }
            PipelineStatus::InProgress | PipelineStatus::Stopping => CommitState::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, PipelineStatus::InProgress | PipelineStatus::Stopping)
    }
}

/// Serialized pipeline state. `status` is the last observed value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    pub name: String,
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub status: Option<PipelineStatus>,
}

impl PipelineState {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Handle over one named pipeline and at most one execution of it.
pub struct PipelineExecution {
    service: Arc<dyn PipelineService>,
    state: PipelineState,
}

impl std::fmt::Debug for PipelineExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecution")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl PipelineExecution {
    pub fn new(service: Arc<dyn PipelineService>, state: PipelineState) -> Self {
        Self { service, state }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.state.execution_id.as_deref()
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn into_state(self) -> PipelineState {
        self.state
    }

    /// Trigger a new run and capture its execution id.
    ///
    /// A handle tracks one execution; starting twice is rejected.
    pub async fn start(&mut self) -> Result<String> {
        if let Some(existing) = &self.state.execution_id {
            return Err(OrchestrationError::Validation(format!(
                "pipeline {} already has execution {existing}",
                self.state.name
            )));
        }
        let execution_id = self.service.start_execution(&self.state.name).await?;
        info!(pipeline = %self.state.name, execution_id = %execution_id, "pipeline execution started");
        self.state.execution_id = Some(execution_id.clone());
        self.state.status = Some(PipelineStatus::InProgress);
        Ok(execution_id)
    }

    /// Query the execution status; `None` before an execution exists.
    pub async fn status(&mut self) -> Result<Option<PipelineStatus>> {
        let Some(execution_id) = self.state.execution_id.as_deref() else {
            return Ok(None);
        };
        let status = self
            .service
            .execution_status(&self.state.name, execution_id)
            .await?;
        info!(pipeline = %self.state.name, execution_id = %execution_id, status = %status, "pipeline status observed");
        self.state.status = Some(status);
        Ok(Some(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_uses_service_spelling() {
        assert_eq!("InProgress".parse::<PipelineStatus>().unwrap(), PipelineStatus::InProgress);
        assert_eq!(PipelineStatus::Superseded.to_string(), "Superseded");
        assert_eq!(
            serde_json::to_string(&PipelineStatus::Stopping).unwrap(),
            "\"Stopping\""
        );
    }

    #[test]
    fn commit_state_mapping() {
        assert_eq!(PipelineStatus::Succeeded.commit_state(), CommitState::Success);
        assert_eq!(PipelineStatus::Failed.commit_state(), CommitState::Failure);
        assert_eq!(PipelineStatus::Superseded.commit_state(), CommitState::Error);
        assert_eq!(PipelineStatus::Stopped.commit_state(), CommitState::Error);
        assert_eq!(PipelineStatus::InProgress.commit_state(), CommitState::Pending);
        assert_eq!(PipelineStatus::Stopping.commit_state(), CommitState::Pending);
        assert!(!PipelineStatus::Stopping.is_terminal());
        assert!(PipelineStatus::Cancelled.is_terminal());
    }
}
