//! ---
//! prflow_section: "03-external-services"
//! prflow_subsection: "module"
//! prflow_type: "source"
//! prflow_scope: "code"
//! prflow_description: "Production service bundle wiring for orchestration steps."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
//! Adapters implementing the `prflow-core` service traits on top of GitHub and
//! AWS. Each invocation builds one [`Services`] bundle from configuration.

pub mod cloudformation;
pub mod codepipeline;
pub mod github;
pub mod s3;

use std::sync::Arc;

use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, SdkConfig};
use prflow_common::OrchestratorConfig;
use prflow_core::Services;
use tracing::debug;

pub use cloudformation::CloudFormationStacks;
pub use codepipeline::CodePipelines;
pub use github::GitHubClient;
pub use s3::S3Artifacts;

/// Bundle the AWS adapters around a loaded SDK configuration.
pub fn aws_services(sdk: &SdkConfig, source_host: GitHubClient) -> Services {
    Services {
        source_host: Arc::new(source_host),
        artifacts: Arc::new(S3Artifacts::new(aws_sdk_s3::Client::new(sdk))),
        stacks: Arc::new(CloudFormationStacks::new(aws_sdk_cloudformation::Client::new(sdk))),
        pipelines: Arc::new(CodePipelines::new(aws_sdk_codepipeline::Client::new(sdk))),
    }
}

/// Resolve credentials and region from the environment and build every adapter.
pub async fn services_from_config(config: &OrchestratorConfig) -> Result<Services> {
    let sdk = aws_config::load_defaults(BehaviorVersion::latest()).await;
    debug!(region = ?sdk.region(), "aws configuration loaded");
    let api_base = config.github.api_url()?;
    let github = GitHubClient::new(api_base).context("unable to build github client")?;
    Ok(aws_services(&sdk, github))
}
