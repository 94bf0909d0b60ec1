//! ---
//! prflow_section: "01-shared-runtime"
//! prflow_subsection: "module"
//! prflow_type: "source"
//! prflow_scope: "code"
//! prflow_description: "Shared primitives and utilities for orchestration steps."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
//! Shared primitives for the prflow workspace.
//! This crate exposes configuration loading, tracing setup, and version
//! metadata consumed by the core orchestrator and the step binary.

pub mod config;
pub mod logging;
pub mod version;

pub use config::{GitHubConfig, LoadedConfig, LoggingConfig, OrchestratorConfig, WaiterConfig};
pub use logging::{init_tracing, log_step_event, LogFormat, StepContext, StepOutcome};
pub use version::VersionInfo;
