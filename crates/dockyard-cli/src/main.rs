//! Dockyard - Immich provisioning
//!
//! Usage:
//!   dockyard install ...  # Provision the stack (prompts for missing inputs)
//!   dockyard check        # Inspect the host without changing anything
//!   dockyard render ...   # Write docker-compose.yml and .env only
//!   dockyard config       # Show the effective configuration

mod interactive;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dockyard_core::config::{ConfigStore, ProvisionConfig, to_toml};
use dockyard_core::progress::{
    DEFAULT_CHANNEL_CAPACITY, Outcome, ProgressEvent, ProgressSink, Stage,
};
use dockyard_core::render;
use dockyard_core::request::{Credential, ProvisionRequest};
use dockyard_core::runner::SystemRunner;
use dockyard_core::secret::GeneratedSecret;
use dockyard_core::sequencer::Sequencer;

use crate::interactive::{InteractiveFlow, PrefilledOptions, expand_home, read_credential};

#[derive(Parser)]
#[command(name = "dockyard")]
#[command(about = "Provision a self-hosted Immich stack", long_about = None)]
struct Cli {
    /// Path to dockyard.toml (default: ~/.config/dockyard/dockyard.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install Docker if needed, then deploy and start Immich
    Install(InstallArgs),

    /// Report Docker availability and running Immich containers
    Check,

    /// Write docker-compose.yml and .env without running anything
    Render(RenderArgs),

    /// Show the effective configuration
    Config {
        /// Write the defaults to the config file if it does not exist
        #[arg(long)]
        init: bool,
    },
}

#[derive(Args)]
struct InstallArgs {
    /// Installation directory (default: ~/immich)
    #[arg(long, value_name = "DIR")]
    install_path: Option<PathBuf>,
    /// Photos location, mounted read-only (default: /mnt/photos)
    #[arg(long, value_name = "DIR")]
    photos: Option<PathBuf>,
    /// External library path, mounted read-only (default: /mnt/external-hdd)
    #[arg(long, value_name = "DIR")]
    external: Option<PathBuf>,
    /// Leave running Immich containers alone instead of stopping them
    #[arg(long)]
    keep_existing: bool,
    /// Answer yes to every confirmation (including "port still in use")
    #[arg(short = 'y', long)]
    yes: bool,
    /// Read the sudo password from the first line of stdin
    #[arg(long)]
    password_stdin: bool,
    /// Interactive mode - prompts for every option and confirms a summary
    #[arg(short, long)]
    interactive: bool,
}

#[derive(Args)]
struct RenderArgs {
    /// Directory the files are written to
    #[arg(long, value_name = "DIR")]
    install_path: PathBuf,
    /// Photos location
    #[arg(long, value_name = "DIR")]
    photos: PathBuf,
    /// External library path
    #[arg(long, value_name = "DIR")]
    external: PathBuf,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dockyard=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let store = match &cli.config {
        Some(path) => ConfigStore::from_path(path.clone()),
        None => ConfigStore::with_defaults()?,
    };

    match cli.command {
        Commands::Install(args) => run_install(args, &store).await,
        Commands::Check => run_check(&store).await,
        Commands::Render(args) => run_render(args, &store),
        Commands::Config { init } => run_config(init, &store),
    }
}

fn load_config(store: &ConfigStore) -> Result<ProvisionConfig> {
    store
        .load()
        .with_context(|| format!("Failed to load {}", store.config_path().display()))
}

async fn run_install(args: InstallArgs, store: &ConfigStore) -> Result<ExitCode> {
    let config = load_config(store)?;

    let credential = if args.password_stdin {
        Some(read_credential(std::io::stdin().lock())?)
    } else {
        None
    };
    let prefilled = PrefilledOptions {
        install_path: args.install_path,
        photos_path: args.photos,
        external_path: args.external,
        credential,
        keep_existing: args.keep_existing.then_some(true),
        interactive: args.interactive,
        yes: args.yes,
    };
    let collected =
        tokio::task::spawn_blocking(move || InteractiveFlow::new(prefilled).collect()).await??;
    if !collected.confirmed {
        println!("Installation cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let (sink, rx) = ProgressSink::channel(DEFAULT_CHANNEL_CAPACITY);
    let sequencer = Sequencer::new(SystemRunner::new(), config);
    let request = collected.request;
    let worker = tokio::spawn(async move { sequencer.run(request, &sink).await });

    drain_progress(rx, args.yes).await;
    let outcome = worker.await.context("Provisioning task panicked")?;

    println!();
    match &outcome {
        Outcome::Succeeded { .. } => println!("{}", style(outcome.message()).green().bold()),
        Outcome::Failed { .. } => eprintln!("{}", style(outcome.message()).red().bold()),
    }
    Ok(exit_code(outcome.exit_code()))
}

/// Print progress until the worker drops its sink. This is the only place
/// that writes run output to the terminal.
async fn drain_progress(mut rx: mpsc::Receiver<ProgressEvent>, assume_yes: bool) {
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::Stage(stage) => print_stage(stage),
            ProgressEvent::Line(line) => print_line(&line),
            ProgressEvent::Confirm { prompt, reply } => {
                let answer = if assume_yes {
                    println!("{} {} {}", style("?").yellow(), prompt, style("yes").dim());
                    true
                } else {
                    ask(prompt).await
                };
                // The worker may have given up waiting; nothing to do then.
                let _ = reply.send(answer);
            }
            ProgressEvent::Done(outcome) => {
                tracing::debug!(exit_code = outcome.exit_code(), "Run finished");
            }
        }
    }
}

async fn ask(prompt: String) -> bool {
    let answer = tokio::task::spawn_blocking(move || {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(false)
            .interact()
    })
    .await;
    match answer {
        Ok(Ok(answer)) => answer,
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "Confirmation prompt failed");
            false
        }
        Err(err) => {
            tracing::warn!(error = %err, "Confirmation prompt panicked");
            false
        }
    }
}

fn print_stage(stage: Stage) {
    if stage.is_terminal() {
        return;
    }
    println!("{} {}", style("==>").cyan().bold(), style(stage).bold());
}

fn print_line(line: &str) {
    if line.starts_with("ERROR") {
        println!("{}", style(line).red());
    } else if line.starts_with('✓') {
        println!("{}", style(line).green());
    } else if line.starts_with('⚠') {
        println!("{}", style(line).yellow());
    } else {
        println!("    {}", line);
    }
}

async fn run_check(store: &ConfigStore) -> Result<ExitCode> {
    let config = load_config(store)?;
    let port = config.ports.host;
    let pattern = config.conflicts.pattern.clone();
    let sequencer = Sequencer::new(SystemRunner::new(), config);
    let (sink, _rx) = ProgressSink::channel(DEFAULT_CHANNEL_CAPACITY);

    let report = sequencer.inspect(&sink).await?;

    println!("{}", style("Host").bold());
    println!("  Docker installed:  {}", yes_no(report.tool_available));
    println!("  Docker daemon:     {}", yes_no(report.daemon_reachable));
    println!(
        "  Port {:<5}         {}",
        port,
        if report.port_in_use {
            style("in use").yellow()
        } else {
            style("free").green()
        }
    );

    if report.conflicting.is_empty() {
        println!("  No running '{}' containers", pattern);
    } else {
        println!("{}", style(format!("Running '{}' containers", pattern)).bold());
        for instance in &report.conflicting {
            let ports: Vec<&str> = instance.ports.iter().map(String::as_str).collect();
            println!("  {}  {}", instance.name, style(ports.join(", ")).dim());
        }
    }

    Ok(if report.is_ready() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn yes_no(value: bool) -> console::StyledObject<&'static str> {
    if value {
        style("yes").green()
    } else {
        style("no").red()
    }
}

fn run_render(args: RenderArgs, store: &ConfigStore) -> Result<ExitCode> {
    let config = load_config(store)?;
    let install_dir = expand_home(&args.install_path);
    let photos = expand_home(&args.photos);
    let external = expand_home(&args.external);
    for path in [&photos, &external] {
        warn_if_missing(path);
    }

    // Rendering never elevates, so no credential is involved.
    let request = ProvisionRequest::new(Credential::new(""), &install_dir, photos, external);
    let artifacts = render::render(&request, &GeneratedSecret::generate(), &config);
    for path in render::write_artifacts(&install_dir, &artifacts)? {
        println!("{} {}", style("Created:").green(), path.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn warn_if_missing(path: &Path) {
    if !path.exists() {
        eprintln!(
            "{} {} does not exist yet",
            style("warning:").yellow().bold(),
            path.display()
        );
    }
}

fn run_config(init: bool, store: &ConfigStore) -> Result<ExitCode> {
    if init && !store.config_path().exists() {
        store.save(&ProvisionConfig::default())?;
        println!(
            "{} {}",
            style("Wrote").green(),
            store.config_path().display()
        );
    }

    let config = load_config(store)?;
    println!("{}", style(format!("# {}", store.config_path().display())).dim());
    print!("{}", to_toml(&config)?);
    Ok(ExitCode::SUCCESS)
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
