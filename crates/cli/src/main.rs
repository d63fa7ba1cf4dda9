// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 cftunnel Contributors

// cftunnel - Quick Tunnel CLI
// Command-line front end for the quick-tunnel supervisor

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cftunnel_supervisor::{QuickResult, StopOutcome, Supervisor};

/// How often the foreground `start` checks on the tunnel
const WATCH_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "cftunnel-quick")]
#[command(about = "Run and control a Cloudflare quick tunnel", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: <config dir>/cftunnel/quick.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for quick.pid and quick.url
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Path to the cloudflared executable
    #[arg(long, global = true)]
    binary: Option<PathBuf>,

    /// Verbose logging (also shows cloudflared output)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a quick tunnel to a local port and keep it running until Ctrl+C
    Start {
        /// Local port to expose
        #[arg(short, long)]
        port: u16,

        /// Seconds to wait for the public URL before reporting it as pending
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Print the start result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Stop the quick tunnel, including one started by another invocation
    Stop {
        /// Output as JSON for scripting
        #[arg(short, long)]
        json: bool,
    },

    /// Show whether a quick tunnel is running
    Status {
        /// Output as JSON for scripting
        #[arg(short, long)]
        json: bool,
    },

    /// Print the public URL of the quick tunnel
    Url,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable with --json
fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "cftunnel_supervisor=debug,cftunnel_cli=debug,cloudflared=debug"
    } else {
        "cftunnel_supervisor=info,cftunnel_cli=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let timeout_secs = match &cli.command {
        Commands::Start { timeout, .. } => *timeout,
        _ => None,
    };
    let overrides = config::Overrides {
        config_path: cli.config,
        state_dir: cli.state_dir,
        binary: cli.binary,
        timeout_secs,
    };
    let config = config::load(&overrides)?;
    debug!("State directory: {}", config.state_dir.display());

    let supervisor = Supervisor::new(config);

    match cli.command {
        Commands::Start { port, json, .. } => start(&supervisor, port, json).await,
        Commands::Stop { json } => stop(&supervisor, json).await,
        Commands::Status { json } => status(&supervisor, json),
        Commands::Url => url(&supervisor),
    }
}

async fn start(supervisor: &Supervisor, port: u16, json: bool) -> Result<ExitCode> {
    // another invocation may already own a tunnel
    let existing = supervisor.status();
    if existing.running {
        anyhow::bail!(
            "A quick tunnel is already running (pid {}). Stop it first with 'cftunnel-quick stop'",
            existing.pid.unwrap_or_default()
        );
    }

    if !json {
        println!(
            "{}",
            format!("Starting quick tunnel for http://localhost:{}", port)
                .green()
                .bold()
        );
    }

    let result = supervisor.start(port).await;

    if json {
        println!("{}", QuickResult::from_start(&result).to_json()?);
    }

    let mut announced = match result.context("Failed to start quick tunnel")? {
        Some(url) => {
            if !json {
                announce(&url);
            }
            true
        }
        None => {
            if !json {
                println!(
                    "{}",
                    "Tunnel started, waiting for cloudflared to assign a URL...".dimmed()
                );
            }
            false
        }
    };

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(WATCH_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let outcome = supervisor.stop().await;
                if !json {
                    println!("{}", format!("✓ {}", outcome).green().bold());
                }
                return Ok(ExitCode::SUCCESS);
            }

            _ = ticker.tick() => {
                if !announced {
                    if let Some(url) = supervisor.query_endpoint() {
                        if !json {
                            announce(&url);
                        }
                        announced = true;
                    }
                }

                if !supervisor.is_running() {
                    eprintln!("{}", "Quick tunnel exited".red());
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }
}

fn announce(url: &str) {
    println!();
    println!("{}", format!("✓ Quick tunnel ready: {}", url).green().bold());
    println!();
    println!(
        "{}",
        "Tunnel is running. Press Ctrl+C to stop (or use 'cftunnel-quick stop')".dimmed()
    );
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, stopping tunnel"),
                    _ = sigterm.recv() => info!("Received SIGTERM, stopping tunnel"),
                }
            }
            Err(e) => {
                debug!("SIGTERM handler unavailable: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl+C, stopping tunnel");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, stopping tunnel");
    }
}

async fn stop(supervisor: &Supervisor, json: bool) -> Result<ExitCode> {
    let outcome = supervisor.stop().await;

    if json {
        println!("{}", serde_json::to_string(&outcome)?);
        return Ok(ExitCode::SUCCESS);
    }

    match outcome {
        StopOutcome::NothingToStop => println!("{}", outcome.to_string().dimmed()),
        StopOutcome::StartCancelled => println!("{}", outcome.to_string().yellow()),
        StopOutcome::Stopped {
            confirmed: true, ..
        } => println!("{}", format!("✓ {}", outcome).green().bold()),
        StopOutcome::Stopped {
            confirmed: false, ..
        } => println!("{}", outcome.to_string().yellow()),
    }
    Ok(ExitCode::SUCCESS)
}

fn status(supervisor: &Supervisor, json: bool) -> Result<ExitCode> {
    let status = supervisor.status();

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(ExitCode::SUCCESS);
    }

    if !status.running {
        println!("{}", "Quick tunnel is not running".dimmed());
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", "Quick tunnel is running".green().bold());
    if let Some(pid) = status.pid {
        println!("  PID: {}", pid.to_string().cyan());
    }
    match &status.url {
        Some(url) => println!("  URL: {}", url.cyan()),
        None => println!("  URL: {}", "not assigned yet".dimmed()),
    }
    Ok(ExitCode::SUCCESS)
}

fn url(supervisor: &Supervisor) -> Result<ExitCode> {
    match supervisor.query_endpoint() {
        Some(url) => {
            println!("{}", url);
            Ok(ExitCode::SUCCESS)
        }
        None => Ok(ExitCode::FAILURE),
    }
}
