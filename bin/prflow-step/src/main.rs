//! ---
//! prflow_section: "04-invocation-entrypoint"
//! prflow_subsection: "binary"
//! prflow_type: "source"
//! prflow_scope: "code"
//! prflow_description: "Binary entrypoint running one orchestration step per invocation."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use prflow_common::{init_tracing, OrchestratorConfig, VersionInfo};
use prflow_core::Dispatcher;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Run one prflow orchestration step: snapshot in, snapshot out",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "FILE",
        help = "Read the input snapshot from FILE instead of stdin"
    )]
    input: Option<PathBuf>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print version information and exit"
    )]
    version: bool,
}

fn config_candidates(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path.to_path_buf());
    }
    candidates.push(PathBuf::from("configs/prflow.toml"));
    candidates.push(PathBuf::from("/etc/prflow/prflow.toml"));
    candidates
}

async fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("unable to read snapshot {}", path.display())),
        None => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .context("unable to read snapshot from stdin")?;
            Ok(raw)
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let version = VersionInfo::current();
    if cli.version {
        println!("{}", version.banner());
        return Ok(());
    }

    let loaded = OrchestratorConfig::load_with_source(&config_candidates(cli.config.as_deref()))?;
    let config = loaded.config;
    init_tracing("prflow-step", &config.logging)?;
    info!(config_path = %loaded.source.display(), version = %version.banner(), "configuration loaded");

    let input = read_input(cli.input.as_deref()).await?;
    let services = prflow_clients::services_from_config(&config).await?;
    let auth_token = config.oauth_token();
    let dispatcher = Dispatcher::new(config, services).with_auth_token(auth_token);

    let output = match dispatcher.dispatch_json(&input).await {
        Ok(output) => output,
        Err(err) => {
            error!(error = %err, transient = err.is_transient(), "step failed");
            return Err(err.into());
        }
    };

    let mut stdout = tokio::io::stdout();
    stdout.write_all(output.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}
