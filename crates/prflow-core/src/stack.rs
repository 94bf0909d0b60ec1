//! ---
//! prflow_section: "02-orchestration-core"
//! prflow_subsection: "module"
//! prflow_type: "source"
//! prflow_scope: "code"
//! prflow_description: "Idempotent infrastructure stack lifecycle with bounded waits."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use prflow_common::WaiterConfig;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::error::{OrchestrationError, Result};
use crate::services::{StackDescription, StackRequest, StackService};

/// Most failure reasons carried by a [`OrchestrationError::LifecycleTimeout`].
const MAX_FAILURE_REASONS: usize = 10;

macro_rules! stack_statuses {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Lifecycle status reported by the orchestration service.
        ///
        /// Unknown values are kept verbatim in [`StackStatus::Other`].
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum StackStatus {
            $($variant,)+
            Other(String),
        }

        impl StackStatus {
            pub fn as_str(&self) -> &str {
                match self {
                    $(StackStatus::$variant => $name,)+
                    StackStatus::Other(raw) => raw,
                }
            }
        }

        impl FromStr for StackStatus {
            type Err = Infallible;

            fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
                Ok(match raw {
                    $($name => StackStatus::$variant,)+
                    other => StackStatus::Other(other.to_owned()),
                })
            }
        }
    };
}

stack_statuses! {
    CreateInProgress => "CREATE_IN_PROGRESS",
    CreateFailed => "CREATE_FAILED",
    CreateComplete => "CREATE_COMPLETE",
    RollbackInProgress => "ROLLBACK_IN_PROGRESS",
    RollbackFailed => "ROLLBACK_FAILED",
    RollbackComplete => "ROLLBACK_COMPLETE",
    DeleteInProgress => "DELETE_IN_PROGRESS",
    DeleteFailed => "DELETE_FAILED",
    DeleteComplete => "DELETE_COMPLETE",
    UpdateInProgress => "UPDATE_IN_PROGRESS",
    UpdateCompleteCleanupInProgress => "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
    UpdateComplete => "UPDATE_COMPLETE",
    UpdateFailed => "UPDATE_FAILED",
    UpdateRollbackInProgress => "UPDATE_ROLLBACK_IN_PROGRESS",
    UpdateRollbackFailed => "UPDATE_ROLLBACK_FAILED",
    UpdateRollbackCompleteCleanupInProgress => "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS",
    UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
    ReviewInProgress => "REVIEW_IN_PROGRESS",
    ImportInProgress => "IMPORT_IN_PROGRESS",
    ImportComplete => "IMPORT_COMPLETE",
    ImportRollbackInProgress => "IMPORT_ROLLBACK_IN_PROGRESS",
    ImportRollbackFailed => "IMPORT_ROLLBACK_FAILED",
    ImportRollbackComplete => "IMPORT_ROLLBACK_COMPLETE",
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for StackStatus {
    fn from(raw: &str) -> Self {
        match raw.parse() {
            Ok(status) => status,
            Err(never) => match never {},
        }
    }
}

/// Mutating stack operation a wait loop is settling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOperation {
    Create,
    Update,
    Delete,
}

impl StackOperation {
    /// Status that ends the wait successfully.
    pub fn target(self) -> StackStatus {
        match self {
            StackOperation::Create => StackStatus::CreateComplete,
            StackOperation::Update => StackStatus::UpdateComplete,
            StackOperation::Delete => StackStatus::DeleteComplete,
        }
    }

    /// Terminal statuses from which the target can no longer be reached.
    pub fn is_failure(self, status: &StackStatus) -> bool {
        use StackStatus::*;
        match self {
            StackOperation::Create => matches!(
                status,
                CreateFailed
                    | RollbackInProgress
                    | RollbackFailed
                    | RollbackComplete
                    | DeleteInProgress
                    | DeleteFailed
                    | DeleteComplete
            ),
            StackOperation::Update => matches!(
                status,
                UpdateFailed
                    | UpdateRollbackInProgress
                    | UpdateRollbackFailed
                    | UpdateRollbackCompleteCleanupInProgress
                    | UpdateRollbackComplete
                    | RollbackComplete
                    | DeleteComplete
            ),
            StackOperation::Delete => matches!(status, DeleteFailed),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            StackOperation::Create => "create",
            StackOperation::Update => "update",
            StackOperation::Delete => "delete",
        }
    }
}

/// Serialized identity of a stack. `arn` and `digest` cache external state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackRef {
    pub name: String,
    #[serde(default)]
    pub arn: Option<String>,
    /// Content digest of the last applied template.
    #[serde(default)]
    pub digest: Option<String>,
}

impl StackRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Poll interval and attempt bounds of the stack wait loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
    pub delete_max_attempts: u32,
}

impl WaitPolicy {
    fn attempts_for(&self, operation: StackOperation) -> u32 {
        match operation {
            StackOperation::Delete => self.delete_max_attempts,
            _ => self.max_attempts,
        }
        .max(1)
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::from(&WaiterConfig::default())
    }
}

impl From<&WaiterConfig> for WaitPolicy {
    fn from(config: &WaiterConfig) -> Self {
        Self {
            delay: config.delay,
            max_attempts: config.max_attempts,
            delete_max_attempts: config.delete_max_attempts,
        }
    }
}

/// What [`ResourceStack::apply`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Template with a guaranteed trailing newline.
pub fn canonical_template(body: &str) -> String {
    if body.ends_with('\n') {
        body.to_owned()
    } else {
        format!("{body}\n")
    }
}

/// Hex SHA-256 of a canonical template.
pub fn content_digest(canonical: &str) -> String {
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Handle over one named stack.
pub struct ResourceStack {
    service: Arc<dyn StackService>,
    stack: StackRef,
    policy: WaitPolicy,
}

impl fmt::Debug for ResourceStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceStack")
            .field("stack", &self.stack)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ResourceStack {
    pub fn new(service: Arc<dyn StackService>, stack: StackRef, policy: WaitPolicy) -> Self {
        Self {
            service,
            stack,
            policy,
        }
    }

    pub fn name(&self) -> &str {
        &self.stack.name
    }

    pub fn stack_ref(&self) -> &StackRef {
        &self.stack
    }

    pub fn into_ref(self) -> StackRef {
        self.stack
    }

    /// Current status; `None` when the stack does not exist.
    pub async fn status(&self) -> Result<Option<StackStatus>> {
        Ok(self.describe().await?.map(|description| description.status))
    }

    pub async fn describe(&self) -> Result<Option<StackDescription>> {
        self.service.describe_stack(&self.stack.name).await
    }

    /// Resolved view of the stack: ARN and deployed-template digest when it exists.
    pub async fn resolve(&self) -> Result<StackRef> {
        let Some(description) = self.describe().await? else {
            return Ok(StackRef::named(&self.stack.name));
        };
        let digest = match &self.stack.digest {
            Some(digest) => digest.clone(),
            None => self.deployed_digest(&description.arn).await?,
        };
        Ok(StackRef {
            name: self.stack.name.clone(),
            arn: Some(description.arn),
            digest: Some(digest),
        })
    }

    /// Resolved ARN, `None` when the stack does not exist.
    pub async fn arn(&self) -> Result<Option<String>> {
        Ok(self.describe().await?.map(|description| description.arn))
    }

    async fn deployed_digest(&self, stack_id: &str) -> Result<String> {
        let deployed = self.service.deployed_template(stack_id).await?;
        Ok(content_digest(&canonical_template(&deployed)))
    }

    /// Create or update the stack so it runs `template_body` with `parameters`.
    ///
    /// A stack left in `ROLLBACK_COMPLETE` cannot be updated and is deleted first.
    pub async fn apply(
        &mut self,
        template_body: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<ApplyOutcome> {
        let mut current = self.describe().await?;
        if matches!(&current, Some(d) if d.status == StackStatus::RollbackComplete) {
            info!(stack = %self.stack.name, "stack in ROLLBACK_COMPLETE, deleting before apply");
            self.delete().await?;
            current = None;
        }

        self.service.validate_template(template_body).await?;
        let template = canonical_template(template_body);
        let digest = content_digest(&template);
        let request = StackRequest {
            name: self.stack.name.clone(),
            template_body: template,
            parameters: parameters.clone(),
        };

        let Some(description) = current else {
            info!(stack = %self.stack.name, ?parameters, "creating stack");
            let arn = self.service.create_stack(&request).await?;
            info!(stack = %self.stack.name, arn = %arn, "stack create started");
            self.wait_for(StackOperation::Create, &arn).await?;
            info!(stack = %self.stack.name, "stack created");
            self.stack = StackRef {
                name: self.stack.name.clone(),
                arn: Some(arn),
                digest: Some(digest),
            };
            return Ok(ApplyOutcome::Created);
        };

        let known = match &self.stack.digest {
            Some(known) => known.clone(),
            None => self.deployed_digest(&description.arn).await?,
        };
        let drifted = parameters
            .iter()
            .any(|(key, value)| description.parameters.get(key) != Some(value));
        let outcome = if known != digest || drifted {
            info!(stack = %self.stack.name, template_changed = known != digest, drifted, "updating stack");
            if self.service.update_stack(&request).await? {
                self.wait_for(StackOperation::Update, &description.arn).await?;
                info!(stack = %self.stack.name, "stack updated");
                ApplyOutcome::Updated
            } else {
                info!(stack = %self.stack.name, "service reported no updates to perform");
                ApplyOutcome::Unchanged
            }
        } else {
            info!(stack = %self.stack.name, "stack already up-to-date");
            ApplyOutcome::Unchanged
        };
        self.stack = StackRef {
            name: self.stack.name.clone(),
            arn: Some(description.arn),
            digest: Some(digest),
        };
        Ok(outcome)
    }

    /// Delete the stack and wait for it to disappear.
    ///
    /// Returns `false` when there was nothing to delete.
    pub async fn delete(&mut self) -> Result<bool> {
        let Some(description) = self.describe().await? else {
            info!(stack = %self.stack.name, "stack already absent");
            self.stack = StackRef::named(&self.stack.name);
            return Ok(false);
        };
        info!(stack = %self.stack.name, arn = %description.arn, "deleting stack");
        let deleted = self.service.delete_stack(&description.arn).await?;
        if deleted {
            self.wait_for(StackOperation::Delete, &description.arn).await?;
            info!(stack = %self.stack.name, "stack deleted");
        }
        self.stack = StackRef::named(&self.stack.name);
        Ok(deleted)
    }

    async fn wait_for(&self, operation: StackOperation, stack_id: &str) -> Result<()> {
        let attempts = self.policy.attempts_for(operation);
        let target = operation.target();
        info!(
            stack = %self.stack.name,
            operation = operation.as_str(),
            max_wait_secs = self.policy.delay.as_secs() * u64::from(attempts),
            "waiting for {target}"
        );

        let mut last = None;
        for attempt in 1..=attempts {
            match self.service.describe_stack(stack_id).await? {
                None if operation == StackOperation::Delete => return Ok(()),
                None => last = None,
                Some(description) if description.status == target => return Ok(()),
                Some(description) => {
                    let failed = operation.is_failure(&description.status);
                    debug!(stack = %self.stack.name, attempt, status = %description.status, "stack not settled");
                    last = Some(description.status);
                    if failed {
                        break;
                    }
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.policy.delay).await;
            }
        }
        Err(self.lifecycle_failure(target, last).await)
    }

    async fn lifecycle_failure(
        &self,
        target: StackStatus,
        last: Option<StackStatus>,
    ) -> OrchestrationError {
        let reasons = match self.service.stack_events(&self.stack.name).await {
            Ok(events) => events
                .into_iter()
                .filter(|event| event.resource_status.ends_with("_FAILED"))
                .filter_map(|event| {
                    event
                        .reason
                        .map(|reason| format!("{}: {}", event.logical_resource_id, reason))
                })
                .take(MAX_FAILURE_REASONS)
                .collect(),
            Err(err) => {
                warn!(stack = %self.stack.name, error = %err, "unable to read stack events");
                Vec::new()
            }
        };
        for reason in &reasons {
            error!(stack = %self.stack.name, reason = %reason, "stack resource failed");
        }
        OrchestrationError::LifecycleTimeout {
            stack: self.stack.name.clone(),
            expected: target.to_string(),
            last_status: last
                .as_ref()
                .map_or("ABSENT", StackStatus::as_str)
                .to_owned(),
            reasons,
        }
    }
}
