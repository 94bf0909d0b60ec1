//! ---
//! prflow_section: "01-shared-runtime"
//! prflow_subsection: "module"
//! prflow_type: "source"
//! prflow_scope: "code"
//! prflow_description: "Shared primitives and utilities for orchestration steps."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_project() -> String {
    "prflow".to_owned()
}

fn default_stack_prefix() -> String {
    "prflow-pipeline-test".to_owned()
}

fn default_pipeline_prefix() -> String {
    "prflow-pipeline-test".to_owned()
}

fn default_template_path() -> PathBuf {
    PathBuf::from("pipeline/pipeline_deploy_stack.yaml")
}

fn default_work_path() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_oauth_token_env() -> String {
    "PRFLOW_OAUTH_TOKEN".to_owned()
}

fn default_waiter_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_waiter_max_attempts() -> u32 {
    18
}

fn default_waiter_delete_max_attempts() -> u32 {
    12
}

fn default_github_api_base() -> String {
    "https://api.github.com".to_owned()
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for an orchestration step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Prefix used for repackaged archive names (`<project>-<id>.zip`).
    #[serde(default = "default_project")]
    pub project: String,
    /// Versioned bucket receiving normalized source artifacts.
    #[serde(default)]
    pub bucket_name: String,
    /// Prefix of per-PR infrastructure stack names.
    #[serde(default = "default_stack_prefix")]
    pub stack_prefix: String,
    /// Prefix of per-PR managed pipeline names.
    #[serde(default = "default_pipeline_prefix")]
    pub pipeline_prefix: String,
    /// Stack template location relative to the project root of the artifact.
    #[serde(default = "default_template_path")]
    pub template_path: PathBuf,
    /// Scratch directory for downloads and archive rewrites.
    #[serde(default = "default_work_path")]
    pub work_path: PathBuf,
    /// Environment variable holding the source-control OAuth token.
    #[serde(default = "default_oauth_token_env")]
    pub oauth_token_env: String,
    #[serde(default)]
    pub waiter: WaiterConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`OrchestratorConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: OrchestratorConfig,
    pub source: PathBuf,
}

impl OrchestratorConfig {
    pub const ENV_CONFIG_PATH: &'static str = "PRFLOW_CONFIG";

    /// Load configuration from disk, respecting the `PRFLOW_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<OrchestratorConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Read the source-control token from the configured environment variable.
    pub fn oauth_token(&self) -> Option<String> {
        std::env::var(&self.oauth_token_env)
            .ok()
            .filter(|token| !token.trim().is_empty())
    }

    /// Stack name owned by the pull request with the given number.
    pub fn stack_name(&self, pr_number: u64) -> String {
        format!("{}-{}", self.stack_prefix, pr_number)
    }

    /// Managed pipeline name owned by the pull request with the given number.
    pub fn pipeline_name(&self, pr_number: u64) -> String {
        format!("{}-{}", self.pipeline_prefix, pr_number)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.bucket_name.trim().is_empty() {
            return Err(anyhow!("configuration must name an artifact bucket"));
        }
        if self.project.trim().is_empty() {
            return Err(anyhow!("project name must not be empty"));
        }
        if self.stack_prefix.trim().is_empty() || self.pipeline_prefix.trim().is_empty() {
            return Err(anyhow!("stack and pipeline prefixes must not be empty"));
        }
        if self.template_path.is_absolute() {
            return Err(anyhow!(
                "template_path {} must be relative to the project root",
                self.template_path.display()
            ));
        }
        self.waiter.validate()?;
        self.github.validate()?;
        Ok(())
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            project: default_project(),
            bucket_name: String::new(),
            stack_prefix: default_stack_prefix(),
            pipeline_prefix: default_pipeline_prefix(),
            template_path: default_template_path(),
            work_path: default_work_path(),
            oauth_token_env: default_oauth_token_env(),
            waiter: WaiterConfig::default(),
            github: GitHubConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl std::str::FromStr for OrchestratorConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: OrchestratorConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Bounds for the fixed-delay stack status poll loops.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaiterConfig {
    #[serde(default = "default_waiter_delay")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub delay: Duration,
    #[serde(default = "default_waiter_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_waiter_delete_max_attempts")]
    pub delete_max_attempts: u32,
}

impl WaiterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 || self.delete_max_attempts == 0 {
            return Err(anyhow!("waiter attempt bounds must be at least 1"));
        }
        Ok(())
    }
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            delay: default_waiter_delay(),
            max_attempts: default_waiter_max_attempts(),
            delete_max_attempts: default_waiter_delete_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default = "default_github_api_base")]
    pub api_base: String,
}

impl GitHubConfig {
    /// Parsed API base URL.
    pub fn api_url(&self) -> Result<Url> {
        Url::parse(&self.api_base)
            .with_context(|| format!("invalid github api_base {}", self.api_base))
    }

    pub fn validate(&self) -> Result<()> {
        self.api_url().map(|_| ())
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: default_github_api_base(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the rolling JSON log file; stdout only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
