//! ---
//! prflow_section: "03-external-services"
//! prflow_subsection: "module"
//! prflow_type: "source"
//! prflow_scope: "code"
//! prflow_description: "S3 adapter for the versioned artifact store trait."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use prflow_core::{ArtifactStore, OrchestrationError, Result};
use tracing::debug;

const SERVICE: &str = "s3";

/// [`ArtifactStore`] backed by a versioned S3 bucket.
#[derive(Debug, Clone)]
pub struct S3Artifacts {
    client: Client,
}

impl S3Artifacts {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtifactStore for S3Artifacts {
    async fn put_object(&self, bucket: &str, key: &str, source: &Path) -> Result<Option<String>> {
        let body = ByteStream::from_path(source)
            .await
            .map_err(|err| OrchestrationError::service(SERVICE, "put_object", err))?;
        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|err| OrchestrationError::service(SERVICE, "put_object", DisplayErrorContext(err)))?;
        debug!(bucket, key, version_id = ?output.version_id(), "object stored");
        Ok(output.version_id().map(str::to_owned))
    }

    async fn get_object(&self, bucket: &str, key: &str, dest: &Path) -> Result<()> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| OrchestrationError::service(SERVICE, "get_object", DisplayErrorContext(err)))?;
        let body = output
            .body
            .collect()
            .await
            .map_err(|err| OrchestrationError::service(SERVICE, "get_object", err))?
            .into_bytes();
        tokio::fs::write(dest, &body).await?;
        debug!(bucket, key, bytes = body.len(), path = %dest.display(), "object fetched");
        Ok(())
    }
}
