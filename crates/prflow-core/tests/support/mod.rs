//! ---
//! prflow_section: "05-testing-qa"
//! prflow_subsection: "integration"
//! prflow_type: "source"
//! prflow_scope: "test"
//! prflow_description: "In-memory service fakes shared by core integration tests."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use prflow_core::{
    ArtifactStore, CommitStatus, OrchestrationError, PipelineService, PipelineStatus, Result,
    Services, SourceHost, StackDescription, StackEvent, StackRequest, StackService, StackStatus,
};
use zip::write::FileOptions;
use zip::ZipWriter;

/// Build a zip archive in memory; `None` bodies are directory entries.
pub fn zip_bytes(entries: &[(&str, Option<&str>)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in entries {
        match body {
            Some(body) => {
                writer.start_file(*name, FileOptions::default()).unwrap();
                writer.write_all(body.as_bytes()).unwrap();
            }
            None => writer.add_directory(*name, FileOptions::default()).unwrap(),
        }
    }
    writer.finish().unwrap().into_inner()
}

/// Host-style zipball: everything below `<owner>-<repo>-<sha>/`.
pub fn nested_zipball(template: &str) -> Vec<u8> {
    zip_bytes(&[
        ("nimbusscale-thebestest-0a1b2c3/", None),
        ("nimbusscale-thebestest-0a1b2c3/buildspec.yml", Some("version: 0.2\n")),
        ("nimbusscale-thebestest-0a1b2c3/pipeline/", None),
        (
            "nimbusscale-thebestest-0a1b2c3/pipeline/pipeline_deploy_stack.yaml",
            Some(template),
        ),
    ])
}

#[derive(Debug, Clone)]
pub struct FakeStack {
    pub arn: String,
    pub status: StackStatus,
    pub template: String,
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct StackWorld {
    pub stacks: BTreeMap<String, FakeStack>,
    pub calls: Vec<String>,
    /// Status forced on every describe while set.
    pub pinned: Option<StackStatus>,
    pub events: Vec<StackEvent>,
    pub created: u32,
}

/// Stack service whose in-progress operations settle on the next describe.
#[derive(Debug, Default)]
pub struct FakeStacks {
    pub world: Mutex<StackWorld>,
}

impl FakeStacks {
    pub fn with_stack(name: &str, status: StackStatus, template: &str) -> Self {
        let fake = Self::default();
        fake.world.lock().stacks.insert(
            name.to_owned(),
            FakeStack {
                arn: format!("arn:aws:cloudformation:us-east-1:123456789012:stack/{name}/seed"),
                status,
                template: template.to_owned(),
                parameters: BTreeMap::new(),
            },
        );
        fake
    }

    pub fn pin(&self, status: StackStatus) {
        self.world.lock().pinned = Some(status);
    }

    pub fn set_parameters(&self, name: &str, parameters: BTreeMap<String, String>) {
        if let Some(stack) = self.world.lock().stacks.get_mut(name) {
            stack.parameters = parameters;
        }
    }

    /// Mutating calls in order, without the describe polling noise.
    pub fn mutations(&self) -> Vec<String> {
        self.world
            .lock()
            .calls
            .iter()
            .filter(|call| !call.starts_with("describe"))
            .cloned()
            .collect()
    }

    pub fn describe_count(&self) -> usize {
        self.world
            .lock()
            .calls
            .iter()
            .filter(|call| call.starts_with("describe"))
            .count()
    }

    pub fn stack(&self, name: &str) -> Option<FakeStack> {
        self.world.lock().stacks.get(name).cloned()
    }
}

fn find<'a>(world: &'a mut StackWorld, id: &str) -> Option<(String, &'a mut FakeStack)> {
    world
        .stacks
        .iter_mut()
        .find(|(name, stack)| name.as_str() == id || stack.arn == id)
        .map(|(name, stack)| (name.clone(), stack))
}

#[async_trait]
impl StackService for FakeStacks {
    async fn validate_template(&self, template_body: &str) -> Result<()> {
        self.world.lock().calls.push("validate".into());
        if template_body.contains("INVALID") {
            return Err(OrchestrationError::service(
                "cloudformation",
                "validate_template",
                "Template format error",
            ));
        }
        Ok(())
    }

    async fn describe_stack(&self, stack: &str) -> Result<Option<StackDescription>> {
        let mut world = self.world.lock();
        world.calls.push(format!("describe:{stack}"));
        let pinned = world.pinned.clone();
        let Some((name, entry)) = find(&mut world, stack) else {
            return Ok(None);
        };
        if let Some(pinned) = pinned {
            entry.status = pinned;
            return Ok(Some(StackDescription {
                arn: entry.arn.clone(),
                status: entry.status.clone(),
                parameters: entry.parameters.clone(),
            }));
        }
        let observed = entry.status.clone();
        entry.status = match observed {
            StackStatus::CreateInProgress => StackStatus::CreateComplete,
            StackStatus::UpdateInProgress => StackStatus::UpdateComplete,
            ref other => other.clone(),
        };
        if observed == StackStatus::DeleteInProgress {
            world.stacks.remove(&name);
            return Ok(None);
        }
        Ok(Some(StackDescription {
            arn: entry.arn.clone(),
            status: observed,
            parameters: entry.parameters.clone(),
        }))
    }

    async fn deployed_template(&self, stack: &str) -> Result<String> {
        let mut world = self.world.lock();
        world.calls.push("get_template".into());
        find(&mut world, stack)
            .map(|(_, entry)| entry.template.clone())
            .ok_or_else(|| OrchestrationError::service("cloudformation", "get_template", "does not exist"))
    }

    async fn create_stack(&self, request: &StackRequest) -> Result<String> {
        let mut world = self.world.lock();
        world.calls.push(format!("create:{}", request.name));
        world.created += 1;
        let arn = format!(
            "arn:aws:cloudformation:us-east-1:123456789012:stack/{}/{}",
            request.name, world.created
        );
        world.stacks.insert(
            request.name.clone(),
            FakeStack {
                arn: arn.clone(),
                status: StackStatus::CreateInProgress,
                template: request.template_body.clone(),
                parameters: request.parameters.clone(),
            },
        );
        Ok(arn)
    }

    async fn update_stack(&self, request: &StackRequest) -> Result<bool> {
        let mut world = self.world.lock();
        world.calls.push(format!("update:{}", request.name));
        let Some((_, entry)) = find(&mut world, &request.name) else {
            return Err(OrchestrationError::service("cloudformation", "update_stack", "does not exist"));
        };
        if entry.template == request.template_body && entry.parameters == request.parameters {
            return Ok(false);
        }
        entry.template = request.template_body.clone();
        entry.parameters = request.parameters.clone();
        entry.status = StackStatus::UpdateInProgress;
        Ok(true)
    }

    async fn delete_stack(&self, stack: &str) -> Result<bool> {
        let mut world = self.world.lock();
        world.calls.push("delete".into());
        match find(&mut world, stack) {
            Some((_, entry)) => {
                entry.status = StackStatus::DeleteInProgress;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn stack_events(&self, _stack: &str) -> Result<Vec<StackEvent>> {
        let mut world = self.world.lock();
        world.calls.push("events".into());
        Ok(world.events.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedStatus {
    pub owner: String,
    pub repo: String,
    pub sha: String,
    pub status: CommitStatus,
}

/// Source host serving one canned zipball.
#[derive(Debug, Default)]
pub struct FakeSourceHost {
    pub zipball: Mutex<Vec<u8>>,
    pub downloads: Mutex<Vec<String>>,
    pub statuses: Mutex<Vec<PushedStatus>>,
}

impl FakeSourceHost {
    pub fn serving(zipball: Vec<u8>) -> Self {
        Self {
            zipball: Mutex::new(zipball),
            ..Self::default()
        }
    }
}

#[async_trait]
impl SourceHost for FakeSourceHost {
    async fn download_archive(
        &self,
        _token: &str,
        owner: &str,
        repo: &str,
        sha: &str,
        dest: &Path,
    ) -> Result<()> {
        self.downloads.lock().push(format!("{owner}/{repo}@{sha}"));
        let body = self.zipball.lock().clone();
        std::fs::write(dest, body)?;
        Ok(())
    }

    async fn create_commit_status(
        &self,
        _token: &str,
        owner: &str,
        repo: &str,
        sha: &str,
        status: &CommitStatus,
    ) -> Result<()> {
        self.statuses.lock().push(PushedStatus {
            owner: owner.to_owned(),
            repo: repo.to_owned(),
            sha: sha.to_owned(),
            status: status.clone(),
        });
        Ok(())
    }
}

/// Versioned bucket keeping the latest body per key.
#[derive(Debug)]
pub struct FakeArtifacts {
    pub objects: Mutex<BTreeMap<String, Vec<u8>>>,
    pub versioned: bool,
    pub puts: Mutex<u32>,
}

impl Default for FakeArtifacts {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            versioned: true,
            puts: Mutex::new(0),
        }
    }
}

impl FakeArtifacts {
    pub fn unversioned() -> Self {
        Self {
            versioned: false,
            ..Self::default()
        }
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(&format!("{bucket}/{key}")).cloned()
    }
}

#[async_trait]
impl ArtifactStore for FakeArtifacts {
    async fn put_object(&self, bucket: &str, key: &str, source: &Path) -> Result<Option<String>> {
        let body = std::fs::read(source)?;
        self.objects.lock().insert(format!("{bucket}/{key}"), body);
        let mut puts = self.puts.lock();
        *puts += 1;
        Ok(self.versioned.then(|| format!("v{}", *puts)))
    }

    async fn get_object(&self, bucket: &str, key: &str, dest: &Path) -> Result<()> {
        let body = self
            .object(bucket, key)
            .ok_or_else(|| OrchestrationError::service("s3", "get_object", "NoSuchKey"))?;
        std::fs::write(dest, body)?;
        Ok(())
    }
}

/// Pipeline service returning a settable status.
#[derive(Debug)]
pub struct FakePipelines {
    pub status: Mutex<PipelineStatus>,
    pub started: Mutex<Vec<String>>,
}

impl Default for FakePipelines {
    fn default() -> Self {
        Self {
            status: Mutex::new(PipelineStatus::InProgress),
            started: Mutex::new(Vec::new()),
        }
    }
}

impl FakePipelines {
    pub fn set_status(&self, status: PipelineStatus) {
        *self.status.lock() = status;
    }
}

#[async_trait]
impl PipelineService for FakePipelines {
    async fn start_execution(&self, pipeline: &str) -> Result<String> {
        let mut started = self.started.lock();
        started.push(pipeline.to_owned());
        Ok(format!("exec-{}", started.len()))
    }

    async fn execution_status(&self, _pipeline: &str, _execution_id: &str) -> Result<PipelineStatus> {
        Ok(*self.status.lock())
    }
}

/// Every fake behind a [`Services`] bundle, with typed handles kept for assertions.
pub struct Harness {
    pub host: Arc<FakeSourceHost>,
    pub artifacts: Arc<FakeArtifacts>,
    pub stacks: Arc<FakeStacks>,
    pub pipelines: Arc<FakePipelines>,
}

impl Harness {
    pub fn new(host: FakeSourceHost, artifacts: FakeArtifacts, stacks: FakeStacks) -> Self {
        Self {
            host: Arc::new(host),
            artifacts: Arc::new(artifacts),
            stacks: Arc::new(stacks),
            pipelines: Arc::new(FakePipelines::default()),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            source_host: self.host.clone(),
            artifacts: self.artifacts.clone(),
            stacks: self.stacks.clone(),
            pipelines: self.pipelines.clone(),
        }
    }
}

/// Webhook `pull_request` object for PR 17.
pub fn webhook_pull_request(merged: bool) -> serde_json::Value {
    serde_json::json!({
        "number": 17,
        "title": "Add widgets",
        "url": "https://api.github.com/repos/nimbusscale/thebestest/pulls/17",
        "merged": merged,
        "head": {
            "ref": "feature/widgets",
            "sha": "0a1b2c3d4e",
            "repo": {"name": "thebestest", "owner": {"login": "nimbusscale"}}
        }
    })
}
