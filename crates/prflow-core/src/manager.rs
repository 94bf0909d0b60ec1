//! ---
//! prflow_section: "02-orchestration-core"
//! prflow_subsection: "module"
//! prflow_type: "source"
//! prflow_scope: "code"
//! prflow_description: "Per-PR orchestration manager and single-step action dispatch."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
//! One invocation = one dispatched action. The [`Dispatcher`] rebuilds an
//! [`OrchestrationManager`] from the incoming [`Snapshot`], runs exactly one
//! side-effecting step, and serializes the manager back out.

use std::collections::BTreeMap;
use std::path::Path;

use prflow_common::{log_step_event, OrchestratorConfig, StepContext, StepOutcome};
use tracing::info;

use crate::error::{OrchestrationError, Result};
use crate::pipeline::{PipelineExecution, PipelineState, PipelineStatus};
use crate::pull_request::{CommitStatus, PullRequestRef};
use crate::services::Services;
use crate::snapshot::{AuthToken, ManagerState, PipelineAction, Snapshot, SCHEMA_VERSION};
use crate::source::{SourceArtifact, SourceState};
use crate::stack::{ApplyOutcome, ResourceStack, StackRef, WaitPolicy};

/// Map a webhook event to the workflow branch the engine should take.
pub fn classify(event: &str, merged: bool) -> PipelineAction {
    match (event, merged) {
        ("opened", _) => PipelineAction::BuildStack,
        ("synchronize", _) => PipelineAction::Test,
        ("closed", true) => PipelineAction::ProdDeploy,
        ("closed", false) => PipelineAction::DeleteStack,
        _ => PipelineAction::NoAction,
    }
}

/// Aggregate of every handle owned by one pull request.
#[derive(Debug)]
pub struct OrchestrationManager {
    services: Services,
    bucket_name: String,
    auth_token: Option<AuthToken>,
    pull_request: PullRequestRef,
    pipeline: PipelineExecution,
    stack: ResourceStack,
    source: SourceArtifact,
}

impl OrchestrationManager {
    /// Fresh manager for a pull request seen on a webhook.
    pub fn for_pull_request(
        config: &OrchestratorConfig,
        services: &Services,
        pull_request: PullRequestRef,
        auth_token: Option<AuthToken>,
    ) -> Self {
        let number = pull_request.number();
        let state = ManagerState {
            bucket_name: config.bucket_name.clone(),
            auth_token,
            pipeline: PipelineState::named(config.pipeline_name(number)),
            stack: StackRef::named(config.stack_name(number)),
            source: SourceState {
                owner: pull_request.owner().to_owned(),
                repo_name: pull_request.repo_name().to_owned(),
                id: number.to_string(),
                sha: pull_request.sha().to_owned(),
                bucket_name: config.bucket_name.clone(),
                project: config.project.clone(),
                work_path: config.work_path.clone(),
                version_id: None,
            },
            pull_request,
        };
        Self::from_state(config, services, state)
    }

    /// Rehydrate a manager from its serialized form.
    pub fn from_state(config: &OrchestratorConfig, services: &Services, state: ManagerState) -> Self {
        Self {
            services: services.clone(),
            bucket_name: state.bucket_name,
            auth_token: state.auth_token,
            pull_request: state.pull_request,
            pipeline: PipelineExecution::new(services.pipelines.clone(), state.pipeline),
            stack: ResourceStack::new(
                services.stacks.clone(),
                state.stack,
                WaitPolicy::from(&config.waiter),
            ),
            source: SourceArtifact::new(
                state.source,
                services.source_host.clone(),
                services.artifacts.clone(),
            ),
        }
    }

    pub fn into_state(self) -> ManagerState {
        ManagerState {
            bucket_name: self.bucket_name,
            auth_token: self.auth_token,
            pull_request: self.pull_request,
            pipeline: self.pipeline.into_state(),
            stack: self.stack.into_ref(),
            source: self.source.into_state(),
        }
    }

    pub fn pull_request(&self) -> &PullRequestRef {
        &self.pull_request
    }

    pub fn pipeline(&self) -> &PipelineExecution {
        &self.pipeline
    }

    pub fn stack(&self) -> &ResourceStack {
        &self.stack
    }

    pub fn source(&self) -> &SourceArtifact {
        &self.source
    }

    fn token(&self) -> Result<String> {
        self.auth_token
            .as_ref()
            .map(|token| token.expose().to_owned())
            .ok_or(OrchestrationError::MissingState("auth_token"))
    }

    /// Store the head commit snapshot in the artifact bucket; returns the version id.
    pub async fn retrieve_source(&mut self) -> Result<String> {
        let token = self.token()?;
        self.source.retrieve(&token).await
    }

    /// Apply the pipeline stack template shipped inside the stored artifact.
    pub async fn build_pipeline(&mut self, template_path: &Path) -> Result<ApplyOutcome> {
        let version_id = self
            .source
            .version_id()
            .map(str::to_owned)
            .ok_or(OrchestrationError::MissingState("source.version_id"))?;

        let template = self.read_stored_template(template_path).await;
        self.source.cleanup();
        let template = template?;

        let parameters = BTreeMap::from([
            ("SourceBucket".to_owned(), self.bucket_name.clone()),
            ("SourceObjectKey".to_owned(), self.source.storage_key()),
            ("SourceObjectVersion".to_owned(), version_id),
            ("PipelineName".to_owned(), self.pipeline.name().to_owned()),
        ]);
        self.stack.apply(&template, &parameters).await
    }

    async fn read_stored_template(&mut self, template_path: &Path) -> Result<String> {
        self.source.fetch_stored().await?;
        self.source.extract()?;
        self.source.read_project_file(template_path)
    }

    /// Start the pipeline and mark the head commit pending.
    pub async fn start_pipeline(&mut self) -> Result<String> {
        let token = self.token()?;
        let execution_id = self.pipeline.start().await?;
        self.pull_request
            .set_status(
                self.services.source_host.as_ref(),
                &token,
                "pending",
                self.pipeline.name(),
                &execution_id,
            )
            .await?;
        Ok(execution_id)
    }

    pub async fn check_pipeline_status(&mut self) -> Result<Option<PipelineStatus>> {
        self.pipeline.status().await
    }

    /// Mirror the execution status onto the head commit.
    pub async fn report_status(&mut self) -> Result<CommitStatus> {
        let token = self.token()?;
        let execution_id = self
            .pipeline
            .execution_id()
            .map(str::to_owned)
            .ok_or(OrchestrationError::MissingState("pipeline.execution_id"))?;
        let status = self
            .pipeline
            .status()
            .await?
            .ok_or(OrchestrationError::MissingState("pipeline.status"))?;
        let commit = CommitStatus::new(status.commit_state(), self.pipeline.name(), &execution_id);
        self.pull_request
            .push_status(self.services.source_host.as_ref(), &token, commit)
            .await
    }

    pub async fn teardown_stack(&mut self) -> Result<bool> {
        self.stack.delete().await
    }
}

/// Stack or pipeline a dispatched action acts on, for step events.
fn step_target(action: PipelineAction, state: &ManagerState) -> Option<&str> {
    match action {
        PipelineAction::BuildPipeline | PipelineAction::TeardownStack => Some(&state.stack.name),
        PipelineAction::StartPipeline
        | PipelineAction::CheckPipelineStatus
        | PipelineAction::ReportStatus => Some(&state.pipeline.name),
        _ => None,
    }
}

/// Entry point of one invocation.
#[derive(Debug)]
pub struct Dispatcher {
    config: OrchestratorConfig,
    services: Services,
    auth_token: Option<String>,
}

impl Dispatcher {
    pub fn new(config: OrchestratorConfig, services: Services) -> Self {
        Self {
            config,
            services,
            auth_token: None,
        }
    }

    /// Token used when the snapshot does not carry one.
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token.filter(|token| !token.trim().is_empty());
        self
    }

    /// Parse a snapshot document, dispatch it, and serialize the result.
    pub async fn dispatch_json(&self, raw: &str) -> Result<String> {
        let snapshot = Snapshot::from_json(raw)?;
        self.dispatch(snapshot).await?.to_json()
    }

    /// Run the action selected by `pipeline_action` and return the next snapshot.
    pub async fn dispatch(&self, snapshot: Snapshot) -> Result<Snapshot> {
        snapshot.check_version()?;
        let action = snapshot.pipeline_action;
        let subject = |state: &ManagerState| {
            (
                state.pull_request.number(),
                state.pull_request.sha().to_owned(),
                step_target(action, state).map(str::to_owned),
            )
        };
        let before = snapshot.manager.as_ref().map(subject);

        let result = self.run(snapshot).await;

        let after = match &result {
            Ok(Snapshot {
                manager: Some(manager),
                ..
            }) => Some(subject(manager)),
            _ => before,
        };
        let mut context = StepContext::new().with_action(action.as_ref());
        if let Some((pr, sha, target)) = &after {
            context = context.with_pr(*pr).with_sha(sha);
            if let Some(target) = target.as_deref() {
                context = context.with_target(target);
            }
        }
        match &result {
            Ok(next) => log_step_event(&context, next.pipeline_action.as_ref(), StepOutcome::Success),
            Err(err) => log_step_event(&context, &err.to_string(), StepOutcome::Fault),
        }
        result
    }

    async fn run(&self, mut snapshot: Snapshot) -> Result<Snapshot> {
        let action = snapshot.pipeline_action;
        if !action.is_dispatchable() {
            return Err(OrchestrationError::Validation(format!(
                "{action} is a webhook classification, not a dispatchable action"
            )));
        }
        if action == PipelineAction::HandleWebhook {
            return self.handle_webhook(snapshot);
        }

        let mut state = snapshot.take_manager()?;
        if state.auth_token.is_none() {
            state.auth_token = self.auth_token.clone().map(AuthToken::new);
        }
        let mut manager = OrchestrationManager::from_state(&self.config, &self.services, state);
        match action {
            PipelineAction::RetrieveSource => {
                let version_id = manager.retrieve_source().await?;
                info!(pr = manager.pull_request().number(), version_id = %version_id, "source retrieved");
            }
            PipelineAction::BuildPipeline => {
                let outcome = manager.build_pipeline(&self.config.template_path).await?;
                info!(stack = %manager.stack().name(), ?outcome, "pipeline stack applied");
            }
            PipelineAction::StartPipeline => {
                manager.start_pipeline().await?;
            }
            PipelineAction::CheckPipelineStatus => {
                manager.check_pipeline_status().await?;
            }
            PipelineAction::ReportStatus => {
                manager.report_status().await?;
            }
            PipelineAction::TeardownStack => {
                let deleted = manager.teardown_stack().await?;
                info!(stack = %manager.stack().name(), deleted, "stack teardown finished");
            }
            other => {
                return Err(OrchestrationError::Validation(format!(
                    "{other} cannot run against an existing manager"
                )))
            }
        }
        snapshot.schema_version = SCHEMA_VERSION;
        snapshot.manager = Some(manager.into_state());
        Ok(snapshot)
    }

    fn handle_webhook(&self, snapshot: Snapshot) -> Result<Snapshot> {
        let event = snapshot
            .action
            .ok_or_else(|| OrchestrationError::Validation("webhook has no action".into()))?;
        let payload = snapshot
            .pull_request
            .ok_or_else(|| OrchestrationError::Validation("webhook has no pull_request".into()))?;
        let pull_request = PullRequestRef::from_webhook(&payload)?;
        let outcome = classify(&event, pull_request.merged());
        info!(
            outcome = %outcome,
            title = %pull_request.title(),
            url = %pull_request.url(),
            branch = %pull_request.branch(),
            "webhook classified"
        );
        let manager = OrchestrationManager::for_pull_request(
            &self.config,
            &self.services,
            pull_request,
            self.auth_token.clone().map(AuthToken::new),
        );
        Ok(Snapshot {
            schema_version: SCHEMA_VERSION,
            pipeline_action: outcome,
            action: Some(event),
            pull_request: Some(payload),
            manager: Some(manager.into_state()),
        })
    }
}
