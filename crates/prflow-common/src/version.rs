//! ---
//! prflow_section: "01-shared-runtime"
//! prflow_subsection: "module"
//! prflow_type: "source"
//! prflow_scope: "code"
//! prflow_description: "Shared primitives and utilities for orchestration steps."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
use serde::Serialize;

/// Build metadata reported by the step binary.
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    /// Workspace semantic version.
    pub semver: String,
    /// Git commit hash injected by the release pipeline, when available.
    pub git_sha: String,
}

impl VersionInfo {
    #[must_use]
    pub fn current() -> Self {
        Self {
            semver: env!("CARGO_PKG_VERSION").to_owned(),
            git_sha: option_env!("PRFLOW_GIT_SHA")
                .unwrap_or("UNKNOWN")
                .to_owned(),
        }
    }

    /// Human readable banner used in logging surfaces.
    #[must_use]
    pub fn banner(&self) -> String {
        format!("prflow v{} (git {})", self.semver, self.git_sha)
    }
}
