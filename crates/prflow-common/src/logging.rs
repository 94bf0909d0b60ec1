//! ---
//! prflow_section: "01-shared-runtime"
//! prflow_subsection: "module"
//! prflow_type: "source"
//! prflow_scope: "code"
//! prflow_description: "Shared primitives and utilities for orchestration steps."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, Level};
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "PRFLOW_LOG";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Available log formats for step invocations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Initialize the tracing subscriber based on configuration and environment variables.
///
/// * `PRFLOW_LOG` overrides the log filter (e.g. `info`, `debug,aws_config=warn`).
///   When unset the standard `RUST_LOG` variable is honoured, finally defaulting to
///   `info`.
/// * Events go to stderr so stdout stays reserved for the outgoing snapshot. A daily
///   rolling JSON file is added when `logging.directory` is configured.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(directive).unwrap_or_else(|err| {
            eprintln!(
                "invalid {} directive ({}); defaulting to info logging",
                LOG_ENV, err
            );
            EnvFilter::new("info")
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let fmt_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let file_layer = match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)?;
            let prefix = config
                .file_prefix
                .clone()
                .unwrap_or_else(|| service_name.to_owned());
            let appender = daily(directory, format!("{}.log", prefix));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_timer(fmt::time::UtcTime::rfc_3339())
                    .json()
                    .with_writer(writer)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(service = %service_name, format = ?config.format, file_log = config.directory.is_some(), "tracing initialised");
    Ok(())
}

/// Structured context attached to per-step log events.
#[derive(Debug, Default, Clone)]
pub struct StepContext<'a> {
    /// Dispatched action name.
    pub action: Option<&'a str>,
    /// Pull request number.
    pub pr: Option<u64>,
    /// Head commit sha.
    pub sha: Option<&'a str>,
    /// Stack or pipeline the step acted on.
    pub target: Option<&'a str>,
}

impl<'a> StepContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action(mut self, action: &'a str) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_pr(mut self, pr: u64) -> Self {
        self.pr = Some(pr);
        self
    }

    pub fn with_sha(mut self, sha: &'a str) -> Self {
        self.sha = Some(sha);
        self
    }

    pub fn with_target(mut self, target: &'a str) -> Self {
        self.target = Some(target);
        self
    }
}

/// Outcome attached to a step event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    Fault,
}

impl StepOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Success => "success",
            StepOutcome::Fault => "fault",
        }
    }
}

/// Emit one standardized event describing the result of a dispatched step.
pub fn log_step_event(context: &StepContext<'_>, message: &str, outcome: StepOutcome) {
    // `tracing::event!` needs a constant level per call site.
    match outcome {
        StepOutcome::Success => tracing::event!(
            Level::INFO,
            event = "step.completed",
            outcome = outcome.as_str(),
            action = context.action.unwrap_or(""),
            pr = context.pr.unwrap_or_default(),
            sha = context.sha.unwrap_or(""),
            target = context.target.unwrap_or(""),
            message = %message
        ),
        StepOutcome::Fault => tracing::event!(
            Level::ERROR,
            event = "step.failed",
            outcome = outcome.as_str(),
            action = context.action.unwrap_or(""),
            pr = context.pr.unwrap_or_default(),
            sha = context.sha.unwrap_or(""),
            target = context.target.unwrap_or(""),
            message = %message
        ),
    }
}
