//! artifact-sync - per-node registry of deployed gateway artifacts
//!
//! Keeps a gateway node's APIs, sequences, endpoints and local entries in
//! line with the control plane, pushes every change to the execution engine,
//! and answers "what is deployed here" without calling back to the control
//! plane.
//!
//! ## Usage
//!
//! ```bash
//! # Replay an event file against the engine admin API
//! artifact-sync sync --events events.jsonl --state-dir ./state \
//!     --engine-url http://localhost:9443/api/admin --checkpoint cursor.json
//!
//! # Dry run: log pushes instead of sending them
//! artifact-sync sync --events events.jsonl --dry-run
//!
//! # Look up a deployed API and its sequences
//! artifact-sync query api -e events.jsonl -t t1 -n PetStore -V v1
//! artifact-sync query sequences -e events.jsonl -t t1 -n PetStore -V v1
//!
//! # Configuration
//! artifact-sync config init
//! artifact-sync config env
//! ```

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

mod cli;

use artifact_sync::adapter::{EngineAdapters, HttpEngineAdapter, InMemoryEngine, LoggingAdapter};
use artifact_sync::config::{self, AppConfig, ConfigFile, EnvConfig};
use artifact_sync::feed::FileFeed;
use artifact_sync::http::HttpClient;
use artifact_sync::models::ArtifactKind;
use artifact_sync::output::{store_entries, OutputFormat, ReportFormatter};
use artifact_sync::query::QueryGateway;
use artifact_sync::store::ArtifactStore;
use artifact_sync::sync::{CheckpointStore, SyncSettings, Synchronizer};
use artifact_sync::utils::{init_logger, LogLevel};
use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env_config = EnvConfig::load();

    let explicit = args.config.clone().or_else(|| env_config.config_file.clone());
    let (config_file, source) = ConfigFile::resolve(explicit.as_deref())?;
    let mut app = config_file.app;
    env_config.apply_to(&mut app);
    if let Some(level) = &args.log_level {
        app.log_level = level.clone();
    } else if args.verbose {
        app.log_level = "debug".to_string();
    }
    app.validate().context("Invalid configuration")?;

    let level = LogLevel::from_str(&app.log_level).unwrap_or(LogLevel::Info);
    init_logger(level);
    if let Some(path) = &source {
        info!("Loaded configuration from {}", path.display());
    }

    match args.command {
        cli::Command::Sync(sync_args) => {
            run_sync(app, sync_args).await?;
        }
        cli::Command::Query(query_args) => {
            let success = run_query(app, query_args).await?;
            if !success {
                std::process::exit(1);
            }
        }
        cli::Command::Config(config_args) => {
            manage_config(app, source, env_config, config_args)?;
        }
    }

    Ok(())
}

fn formatter(format: &str) -> ReportFormatter {
    let format = OutputFormat::from_str(format).unwrap_or(OutputFormat::Table);
    let formatter = ReportFormatter::new(format);
    if std::io::stdout().is_terminal() {
        formatter
    } else {
        formatter.no_color()
    }
}

/// Build the event file feed from CLI flags falling back to config
fn build_feed(app: &AppConfig, args: &cli::FeedArgs) -> Result<FileFeed> {
    let events = args
        .events
        .clone()
        .or_else(|| app.feed.events_path.clone())
        .context("No event file given; pass --events or set feed.events_path")?;

    let mut feed = FileFeed::new(events);
    if let Some(dir) = args.state_dir.clone().or_else(|| app.feed.full_state_dir.clone()) {
        feed = feed.with_state_dir(dir);
    }
    Ok(feed)
}

/// One HTTP adapter per artifact kind sharing a client
fn build_http_adapters(app: &AppConfig, base_url: &str) -> Result<EngineAdapters> {
    let mut client = HttpClient::new(base_url, app.engine.push_timeout_ms)
        .context("Failed to create engine HTTP client")?;
    for (name, value) in &app.engine.headers {
        client = client
            .default_header(name, value)
            .with_context(|| format!("Invalid engine header: {name}"))?;
    }

    let adapters = ArtifactKind::all()
        .into_iter()
        .fold(EngineAdapters::new(), |adapters, kind| {
            adapters.with(kind, Arc::new(HttpEngineAdapter::new(client.clone(), kind)))
        });
    Ok(adapters)
}

async fn run_sync(mut app: AppConfig, args: cli::SyncArgs) -> Result<()> {
    if let Some(url) = &args.engine_url {
        app.engine.base_url = Some(url.clone());
    }
    if let Some(path) = &args.checkpoint {
        app.checkpoint.path = Some(path.clone());
    }

    let feed = build_feed(&app, &args.feed)?;
    let adapters = match (&app.engine.base_url, args.dry_run) {
        (Some(url), false) => {
            info!("Pushing to engine at {}", url);
            build_http_adapters(&app, url)?
        }
        (None, false) => {
            warn!("No engine URL configured; pushes are only logged");
            EngineAdapters::uniform(Arc::new(LoggingAdapter))
        }
        (_, true) => EngineAdapters::uniform(Arc::new(LoggingAdapter)),
    };

    let store = Arc::new(ArtifactStore::new());
    let mut synchronizer = Synchronizer::new(Arc::clone(&store), adapters, feed)
        .settings(SyncSettings::from(&app));
    if let Some(path) = &app.checkpoint.path {
        synchronizer = synchronizer.checkpoint_store(CheckpointStore::new(path));
    }
    let status = synchronizer.status_handle();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received; shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    synchronizer
        .run(shutdown_rx)
        .await
        .context("Synchronization failed")?;

    let formatter = formatter(&args.format);
    println!("{}", formatter.format_store(&store_entries(&store)));
    println!("{}", formatter.format_status(&status.status()));

    Ok(())
}

/// Replay the feed into a fresh store, then answer the lookup
async fn run_query(app: AppConfig, args: cli::QueryArgs) -> Result<bool> {
    let feed = build_feed(&app, &args.feed)?;
    let store = Arc::new(ArtifactStore::new());
    let engine = Arc::new(InMemoryEngine::new());

    let mut synchronizer =
        Synchronizer::new(Arc::clone(&store), EngineAdapters::uniform(engine), feed)
            .settings(SyncSettings::from(&app));
    synchronizer
        .run_until_end()
        .await
        .context("Failed to replay event feed")?;

    let gateway = QueryGateway::new(store);
    let response = match args.target {
        cli::QueryTarget::Api => gateway.status_for_api(&args.tenant, &args.name, &args.version),
        cli::QueryTarget::Sequences => {
            gateway.status_for_sequences(&args.tenant, &args.name, &args.version)
        }
    };

    println!("{}", formatter(&args.format).format_response(&response));
    Ok(response.is_success())
}

fn manage_config(
    app: AppConfig,
    source: Option<PathBuf>,
    env_config: EnvConfig,
    args: cli::ConfigArgs,
) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { path, force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    path.display()
                );
            }

            ConfigFile::example().save(&path)?;
            println!("✓ Configuration file created: {}", path.display());
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { format } => {
            match &source {
                Some(path) => println!("# Loaded from {}", path.display()),
                None => println!("# No configuration file found; using defaults"),
            }
            let output = if format == "json" {
                serde_json::to_string_pretty(&app)?
            } else {
                serde_yaml::to_string(&app)?
            };
            println!("{output}");
        }

        cli::ConfigAction::Validate { file } => {
            let path = file
                .or(source)
                .context("No configuration file found to validate")?;

            match ConfigFile::load(&path) {
                Ok(_) => {
                    println!("✓ Configuration file is valid: {}", path.display());
                }
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", path.display());
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }

        cli::ConfigAction::Env => {
            config::print_env_help();
            println!();
            if env_config.has_any() {
                env_config.print_summary();
            } else {
                println!("No ARTIFACT_SYNC_* variables are set.");
            }
        }
    }

    Ok(())
}
