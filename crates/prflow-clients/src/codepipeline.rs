//! ---
//! prflow_section: "03-external-services"
//! prflow_subsection: "module"
//! prflow_type: "source"
//! prflow_scope: "code"
//! prflow_description: "CodePipeline adapter for the pipeline service trait."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
use async_trait::async_trait;
use aws_sdk_codepipeline::error::DisplayErrorContext;
use aws_sdk_codepipeline::Client;
use prflow_core::{OrchestrationError, PipelineService, PipelineStatus, Result};

const SERVICE: &str = "codepipeline";

/// [`PipelineService`] backed by AWS CodePipeline.
#[derive(Debug, Clone)]
pub struct CodePipelines {
    client: Client,
}

impl CodePipelines {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PipelineService for CodePipelines {
    async fn start_execution(&self, pipeline: &str) -> Result<String> {
        let output = self
            .client
            .start_pipeline_execution()
            .name(pipeline)
            .send()
            .await
            .map_err(|err| {
                OrchestrationError::service(SERVICE, "start_pipeline_execution", DisplayErrorContext(err))
            })?;
        output
            .pipeline_execution_id()
            .map(str::to_owned)
            .ok_or_else(|| {
                OrchestrationError::service(
                    SERVICE,
                    "start_pipeline_execution",
                    "response carried no pipelineExecutionId",
                )
            })
    }

    async fn execution_status(&self, pipeline: &str, execution_id: &str) -> Result<PipelineStatus> {
        let output = self
            .client
            .get_pipeline_execution()
            .pipeline_name(pipeline)
            .pipeline_execution_id(execution_id)
            .send()
            .await
            .map_err(|err| {
                OrchestrationError::service(SERVICE, "get_pipeline_execution", DisplayErrorContext(err))
            })?;
        let raw = output
            .pipeline_execution()
            .and_then(|execution| execution.status())
            .map(|status| status.as_str().to_owned())
            .unwrap_or_default();
        raw.parse().map_err(|_| {
            OrchestrationError::service(
                SERVICE,
                "get_pipeline_execution",
                format!("unrecognised execution status {raw:?}"),
            )
        })
    }
}
