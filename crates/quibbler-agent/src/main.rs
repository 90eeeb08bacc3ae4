//! # quibbler
//!
//! Binary entry point: wires settings, the model client, and the review
//! engine into the hook server or the stdio tool server, and provides the
//! small hook helpers the coding agent invokes.

#![deny(unsafe_code)]

mod hook;
mod wiring;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use quibbler_core::logging::init_subscriber;
use quibbler_core::paths;
use quibbler_runtime::FileFeedbackSink;
use quibbler_server::{QuibblerServer, ToolServer};
use quibbler_settings::{QuibblerSettings, load_settings};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::hook::{DEFAULT_MONITOR_BASE, MONITOR_BASE_ENV, Notified, Platform, SKIP_FORWARD_ENV};

/// Skeptical code reviewer for coding agents.
#[derive(Parser, Debug)]
#[command(name = "quibbler", version, about = "Skeptical code reviewer for coding agents")]
struct Cli {
    /// Log level when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP hook server.
    Serve {
        /// Port to bind (overrides settings).
        #[arg(long)]
        port: Option<u16>,
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,
        /// Project whose `.quibbler/config.json` is layered in (default: cwd).
        #[arg(long)]
        project: Option<PathBuf>,
    },
    /// Run the stdio tool server exposing `review_code`.
    Mcp {
        /// Project whose `.quibbler/config.json` is layered in (default: cwd).
        #[arg(long)]
        project: Option<PathBuf>,
    },
    /// Helpers invoked from the agent's hook configuration.
    Hook {
        #[command(subcommand)]
        action: HookAction,
    },
    /// Project rule management.
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
}

#[derive(Subcommand, Debug)]
enum HookAction {
    /// Forward the hook JSON on stdin to the running server.
    Forward {
        #[arg(long, value_enum, default_value_t = Platform::Claude)]
        platform: Platform,
    },
    /// Show and consume pending feedback for the hook's session.
    Notify {
        #[arg(long, value_enum, default_value_t = Platform::Claude)]
        platform: Platform,
    },
}

#[derive(Subcommand, Debug)]
enum RulesAction {
    /// Ask the running server to re-read `.quibbler/rules.md`.
    Reload {
        /// Project directory (default: cwd).
        #[arg(long)]
        project: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let home = paths::quibbler_home();

    // Hook helpers and the stdio server must keep the agent's stdio clean.
    let log_file = match cli.command {
        Command::Serve { .. } | Command::Rules { .. } => None,
        Command::Mcp { .. } | Command::Hook { .. } => Some(home.join(paths::LOG_FILE)),
    };
    if let Err(err) = init_subscriber(&cli.log_level, log_file.as_deref()) {
        eprintln!("quibbler: failed to initialize logging: {err}");
    }

    match run(cli.command, &home).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %format!("{err:#}"), "command failed");
            eprintln!("quibbler: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, home: &Path) -> Result<ExitCode> {
    match command {
        Command::Serve {
            port,
            host,
            project,
        } => {
            let mut settings = settings_for(home, project)?;
            if let Some(port) = port {
                settings.server.port = port;
            }
            if let Some(host) = host {
                settings.server.host = host;
            }
            serve(&settings, home).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Mcp { project } => {
            let settings = settings_for(home, project)?;
            let engine = wiring::build_engine(&settings, home)?;
            let server = Arc::new(ToolServer::new(engine, home.join(paths::LOG_FILE)));
            server
                .serve(tokio::io::stdin(), tokio::io::stdout(), CancellationToken::new())
                .await
                .context("Stdio tool server failed")?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Hook { action } => Ok(hook_command(action).await),
        Command::Rules {
            action: RulesAction::Reload { project },
        } => {
            let project = project_dir(project)?;
            let settings = load_settings(home, Some(&project)).context("Failed to load settings")?;
            reload_rules(&settings, &project).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn serve(settings: &QuibblerSettings, home: &Path) -> Result<()> {
    let metrics = quibbler_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let engine = wiring::build_engine(settings, home)?;
    QuibblerServer::new(settings, engine, Arc::new(FileFeedbackSink))
        .with_metrics(metrics)
        .run()
        .await
        .context("Hook server failed")
}

/// Hook helpers never fail loudly: errors go to the log and map to exit 1.
async fn hook_command(action: HookAction) -> ExitCode {
    hook_action(action).await.unwrap_or_else(|err| {
        error!(error = %format!("{err:#}"), "hook helper failed");
        ExitCode::FAILURE
    })
}

async fn hook_action(action: HookAction) -> Result<ExitCode> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    match action {
        HookAction::Forward { platform } => {
            if std::env::var(SKIP_FORWARD_ENV).is_ok_and(|v| v == "1") {
                return Ok(ExitCode::SUCCESS);
            }
            let raw = read_stdin()?;
            let base = std::env::var(MONITOR_BASE_ENV)
                .unwrap_or_else(|_| DEFAULT_MONITOR_BASE.to_owned());
            hook::forward(platform, &raw, &cwd, &base).await?;
            Ok(ExitCode::SUCCESS)
        }
        HookAction::Notify { platform } => {
            let raw = read_stdin()?;
            let shown = hook::notify(
                platform,
                &raw,
                &cwd,
                &mut std::io::stdout().lock(),
                &mut std::io::stderr().lock(),
            )?;
            Ok(match shown {
                Notified::Shown => ExitCode::from(2),
                Notified::Nothing => ExitCode::SUCCESS,
            })
        }
    }
}

async fn reload_rules(settings: &QuibblerSettings, project: &Path) -> Result<()> {
    let base = std::env::var(MONITOR_BASE_ENV).unwrap_or_else(|_| {
        format!("http://{}:{}", settings.server.host, settings.server.port)
    });
    let url = format!("{}/rules/invalidate", base.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .post(&url)
        .json(&json!({ "project_path": project }))
        .send()
        .await
        .with_context(|| format!("Failed to reach {url}; is `quibbler serve` running?"))?;
    let status = response.status();
    let body: serde_json::Value = response.json().await.unwrap_or_default();
    if !status.is_success() {
        bail!("server rejected rules reload ({status}): {body}");
    }
    println!(
        "Rules reloaded for {} (generation {})",
        project.display(),
        body["generation"]
    );
    Ok(())
}

fn settings_for(home: &Path, project: Option<PathBuf>) -> Result<QuibblerSettings> {
    let project = project_dir(project)?;
    load_settings(home, Some(&project)).context("Failed to load settings")
}

fn project_dir(project: Option<PathBuf>) -> Result<PathBuf> {
    match project {
        Some(path) => Ok(path),
        None => std::env::current_dir().context("Failed to read current directory"),
    }
}

fn read_stdin() -> Result<String> {
    let mut raw = String::new();
    let _ = std::io::stdin()
        .read_to_string(&mut raw)
        .context("Failed to read stdin")?;
    Ok(raw)
}
