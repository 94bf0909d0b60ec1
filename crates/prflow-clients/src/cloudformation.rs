//! ---
//! prflow_section: "03-external-services"
//! prflow_subsection: "module"
//! prflow_type: "source"
//! prflow_scope: "code"
//! prflow_description: "CloudFormation adapter for the stack service trait."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
use async_trait::async_trait;
use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudformation::types::{Capability, Parameter};
use aws_sdk_cloudformation::Client;
use prflow_core::{
    OrchestrationError, Result, StackDescription, StackEvent, StackRequest, StackService,
    StackStatus,
};
use tracing::debug;

const SERVICE: &str = "cloudformation";
const NOT_FOUND: &str = "does not exist";
const NO_UPDATES: &str = "No updates are to be performed";

/// [`StackService`] backed by AWS CloudFormation.
#[derive(Debug, Clone)]
pub struct CloudFormationStacks {
    client: Client,
}

impl CloudFormationStacks {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn service_message<E: ProvideErrorMetadata, R>(err: &SdkError<E, R>) -> Option<&str> {
    err.as_service_error().and_then(ProvideErrorMetadata::message)
}

fn message_contains<E: ProvideErrorMetadata, R>(err: &SdkError<E, R>, needle: &str) -> bool {
    service_message(err).is_some_and(|message| message.contains(needle))
}

fn failure<E, R>(operation: &'static str, err: SdkError<E, R>) -> OrchestrationError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    OrchestrationError::service(SERVICE, operation, DisplayErrorContext(err))
}

fn parameters(request: &StackRequest) -> Vec<Parameter> {
    request
        .parameters
        .iter()
        .map(|(key, value)| {
            Parameter::builder()
                .parameter_key(key)
                .parameter_value(value)
                .build()
        })
        .collect()
}

#[async_trait]
impl StackService for CloudFormationStacks {
    async fn validate_template(&self, template_body: &str) -> Result<()> {
        self.client
            .validate_template()
            .template_body(template_body)
            .send()
            .await
            .map_err(|err| failure("validate_template", err))?;
        Ok(())
    }

    async fn describe_stack(&self, stack: &str) -> Result<Option<StackDescription>> {
        let output = match self.client.describe_stacks().stack_name(stack).send().await {
            Ok(output) => output,
            Err(err) if message_contains(&err, NOT_FOUND) => {
                debug!(stack, "stack does not exist");
                return Ok(None);
            }
            Err(err) => return Err(failure("describe_stacks", err)),
        };
        let Some(found) = output.stacks().first() else {
            return Ok(None);
        };
        let arn = found.stack_id().unwrap_or(stack).to_owned();
        let status = found
            .stack_status()
            .map(|status| StackStatus::from(status.as_str()))
            .unwrap_or_else(|| StackStatus::Other("UNKNOWN".into()));
        let parameters = found
            .parameters()
            .iter()
            .filter_map(|parameter| {
                Some((
                    parameter.parameter_key()?.to_owned(),
                    parameter.parameter_value().unwrap_or_default().to_owned(),
                ))
            })
            .collect();
        Ok(Some(StackDescription {
            arn,
            status,
            parameters,
        }))
    }

    async fn deployed_template(&self, stack: &str) -> Result<String> {
        let output = self
            .client
            .get_template()
            .stack_name(stack)
            .send()
            .await
            .map_err(|err| failure("get_template", err))?;
        Ok(output.template_body().unwrap_or_default().to_owned())
    }

    async fn create_stack(&self, request: &StackRequest) -> Result<String> {
        let output = self
            .client
            .create_stack()
            .stack_name(&request.name)
            .template_body(&request.template_body)
            .capabilities(Capability::CapabilityIam)
            .set_parameters(Some(parameters(request)))
            .send()
            .await
            .map_err(|err| failure("create_stack", err))?;
        output.stack_id().map(str::to_owned).ok_or_else(|| {
            OrchestrationError::service(SERVICE, "create_stack", "response carried no StackId")
        })
    }

    async fn update_stack(&self, request: &StackRequest) -> Result<bool> {
        match self
            .client
            .update_stack()
            .stack_name(&request.name)
            .template_body(&request.template_body)
            .capabilities(Capability::CapabilityIam)
            .set_parameters(Some(parameters(request)))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if message_contains(&err, NO_UPDATES) => Ok(false),
            Err(err) => Err(failure("update_stack", err)),
        }
    }

    async fn delete_stack(&self, stack: &str) -> Result<bool> {
        match self.client.delete_stack().stack_name(stack).send().await {
            Ok(_) => Ok(true),
            Err(err) if message_contains(&err, NOT_FOUND) => Ok(false),
            Err(err) => Err(failure("delete_stack", err)),
        }
    }

    async fn stack_events(&self, stack: &str) -> Result<Vec<StackEvent>> {
        let output = self
            .client
            .describe_stack_events()
            .stack_name(stack)
            .send()
            .await
            .map_err(|err| failure("describe_stack_events", err))?;
        Ok(output
            .stack_events()
            .iter()
            .map(|event| StackEvent {
                logical_resource_id: event.logical_resource_id().unwrap_or_default().to_owned(),
                resource_status: event
                    .resource_status()
                    .map(|status| status.as_str().to_owned())
                    .unwrap_or_default(),
                reason: event.resource_status_reason().map(str::to_owned),
            })
            .collect())
    }
}
