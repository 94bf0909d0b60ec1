//! ---
//! prflow_section: "02-orchestration-core"
//! prflow_subsection: "module"
//! prflow_type: "source"
//! prflow_scope: "code"
//! prflow_description: "Source snapshot retrieval, repackaging, and artifact upload."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::archive;
use crate::error::{OrchestrationError, Result};
use crate::services::{ArtifactStore, SourceHost};

/// Key prefix for uploaded artifacts inside the bucket.
pub const ARTIFACT_KEY_PREFIX: &str = "source/";

fn default_work_path() -> PathBuf {
    PathBuf::from("/tmp")
}

/// Serialized identity of a source artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceState {
    pub owner: String,
    pub repo_name: String,
    /// Artifact id, the pull request number.
    pub id: String,
    pub sha: String,
    pub bucket_name: String,
    /// Archive name prefix.
    pub project: String,
    #[serde(default = "default_work_path")]
    pub work_path: PathBuf,
    /// Storage version of the last upload.
    #[serde(default)]
    pub version_id: Option<String>,
}

impl SourceState {
    /// Name of the normalized archive, `<project>-<id>.zip`.
    pub fn archive_name(&self) -> String {
        format!("{}-{}.zip", self.project, self.id)
    }

    /// Deterministic storage key of the normalized archive.
    pub fn storage_key(&self) -> String {
        format!("{}{}", ARTIFACT_KEY_PREFIX, self.archive_name())
    }
}

/// Handle driving one source artifact through download, repackage, and upload.
///
/// Scratch files live under `work_path` and are removed by [`SourceArtifact::cleanup`],
/// after a successful upload, and when the handle is dropped.
pub struct SourceArtifact {
    state: SourceState,
    host: Arc<dyn SourceHost>,
    store: Arc<dyn ArtifactStore>,
    download_path: Option<PathBuf>,
    unzip_dir: Option<PathBuf>,
}

impl std::fmt::Debug for SourceArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceArtifact")
            .field("state", &self.state)
            .field("download_path", &self.download_path)
            .field("unzip_dir", &self.unzip_dir)
            .finish_non_exhaustive()
    }
}

impl SourceArtifact {
    pub fn new(state: SourceState, host: Arc<dyn SourceHost>, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            state,
            host,
            store,
            download_path: None,
            unzip_dir: None,
        }
    }

    pub fn state(&self) -> &SourceState {
        &self.state
    }

    pub fn storage_key(&self) -> String {
        self.state.storage_key()
    }

    pub fn version_id(&self) -> Option<&str> {
        self.state.version_id.as_deref()
    }

    /// Local path of the downloaded archive, once fetched.
    pub fn download_path(&self) -> Option<&Path> {
        self.download_path.as_deref()
    }

    /// Project root of the extracted archive, once extracted.
    pub fn unzip_dir(&self) -> Option<&Path> {
        self.unzip_dir.as_deref()
    }

    fn repackaged_path(&self) -> PathBuf {
        self.state.work_path.join(self.state.archive_name())
    }

    fn extract_dir(&self) -> PathBuf {
        self.state
            .work_path
            .join(format!("{}-{}", self.state.project, self.state.id))
    }

    /// Fetch the zip snapshot of the commit from the source-control host.
    pub async fn download(&mut self, token: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.state.work_path)?;
        let path = self.state.work_path.join(format!("{}.zip", self.state.sha));
        // Recorded first so a partial download is still cleaned up.
        self.download_path = Some(path.clone());
        info!(
            owner = %self.state.owner,
            repo = %self.state.repo_name,
            sha = %self.state.sha,
            path = %path.display(),
            "downloading source archive"
        );
        self.host
            .download_archive(
                token,
                &self.state.owner,
                &self.state.repo_name,
                &self.state.sha,
                &path,
            )
            .await?;
        Ok(path)
    }

    /// Download the previously uploaded normalized archive from artifact storage.
    pub async fn fetch_stored(&mut self) -> Result<PathBuf> {
        fs::create_dir_all(&self.state.work_path)?;
        let path = self.repackaged_path();
        self.download_path = Some(path.clone());
        let key = self.storage_key();
        info!(bucket = %self.state.bucket_name, key = %key, path = %path.display(), "downloading stored artifact");
        self.store
            .get_object(&self.state.bucket_name, &key, &path)
            .await?;
        Ok(path)
    }

    /// Extract the downloaded archive and record the project root.
    pub fn extract(&mut self) -> Result<PathBuf> {
        let download = self
            .download_path
            .clone()
            .ok_or(OrchestrationError::MissingState("downloaded source archive"))?;
        let dest = self.extract_dir();
        if dest.exists() {
            fs::remove_dir_all(&dest)?;
        }
        let root = archive::extract(&download, &dest)?;
        debug!(unzip_dir = %root.display(), "unzip_dir set");
        self.unzip_dir = Some(root.clone());
        Ok(root)
    }

    /// Re-encode the downloaded archive so entries are relative to the project root.
    pub fn repackage(&mut self) -> Result<PathBuf> {
        let root = self.extract()?;
        let dest = self.repackaged_path();
        info!(from = %root.display(), to = %dest.display(), "repackaging source archive");
        archive::compress_dir(&root, &dest)?;
        Ok(dest)
    }

    /// Read a file below the extracted project root.
    pub fn read_project_file(&self, relative: &Path) -> Result<String> {
        let root = self
            .unzip_dir
            .as_deref()
            .ok_or(OrchestrationError::MissingState("extracted source archive"))?;
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(OrchestrationError::Validation(format!(
                "{} is not a project-relative path",
                relative.display()
            )));
        }
        Ok(fs::read_to_string(root.join(relative))?)
    }

    /// Upload the normalized archive and return its storage version id.
    ///
    /// Scratch files are removed once the upload succeeded.
    pub async fn upload(&mut self) -> Result<String> {
        let path = self.repackaged_path();
        if !path.is_file() {
            return Err(OrchestrationError::MissingState("repackaged source archive"));
        }
        let key = self.storage_key();
        info!(path = %path.display(), bucket = %self.state.bucket_name, key = %key, "uploading artifact");
        let version_id = self
            .store
            .put_object(&self.state.bucket_name, &key, &path)
            .await?
            .filter(|version| !version.is_empty())
            .ok_or_else(|| {
                OrchestrationError::Validation(format!(
                    "bucket {} returned no version id; versioning must be enabled",
                    self.state.bucket_name
                ))
            })?;
        info!(version_id = %version_id, "upload has version id");
        self.state.version_id = Some(version_id.clone());
        self.cleanup();
        Ok(version_id)
    }

    /// Download, repackage, and upload; scratch space is cleaned on every path.
    pub async fn retrieve(&mut self, token: &str) -> Result<String> {
        let outcome = self.retrieve_steps(token).await;
        self.cleanup();
        outcome
    }

    async fn retrieve_steps(&mut self, token: &str) -> Result<String> {
        self.download(token).await?;
        self.repackage()?;
        self.upload().await
    }

    /// Remove every scratch file this handle may have produced. Best effort.
    pub fn cleanup(&mut self) {
        let mut files = vec![self.repackaged_path()];
        if let Some(download) = self.download_path.take() {
            files.push(download);
        }
        for file in files {
            match fs::remove_file(&file) {
                Ok(()) => debug!(path = %file.display(), "removed scratch file"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!(path = %file.display(), error = %err, "failed removing scratch file"),
            }
        }
        let dir = self.extract_dir();
        match fs::remove_dir_all(&dir) {
            Ok(()) => debug!(path = %dir.display(), "removed scratch directory"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %dir.display(), error = %err, "failed removing scratch directory"),
        }
        self.unzip_dir = None;
    }

    pub fn into_state(mut self) -> SourceState {
        self.cleanup();
        self.state.clone()
    }
}

impl Drop for SourceArtifact {
    fn drop(&mut self) {
        if self.download_path.is_some() || self.unzip_dir.is_some() {
            self.cleanup();
        }
    }
}
