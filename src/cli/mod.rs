//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Per-node registry of deployed gateway artifacts
#[derive(Parser, Debug)]
#[command(name = "artifact-sync")]
#[command(author = "hephaex@gmail.com")]
#[command(version)]
#[command(about = "Keep a gateway node's deployed artifacts in sync with the control plane")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Consume the event feed and push changes to the engine
    Sync(SyncArgs),

    /// Answer a deployed-artifact lookup from a replayed store
    Query(QueryArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Feed sources shared by sync and query
#[derive(Parser, Debug)]
pub struct FeedArgs {
    /// JSON-lines event file
    #[arg(short, long)]
    pub events: Option<PathBuf>,

    /// Directory of `<tenant>.json` full-state files
    #[arg(short, long)]
    pub state_dir: Option<PathBuf>,
}

/// Arguments for sync command
#[derive(Parser, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub feed: FeedArgs,

    /// Engine admin REST base URL
    #[arg(long)]
    pub engine_url: Option<String>,

    /// Cursor checkpoint file
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Log pushes instead of sending them
    #[arg(long)]
    pub dry_run: bool,

    /// Output format (table, json, json-pretty)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum QueryTarget {
    /// Serialized API configuration
    Api,
    /// Sequence names bound to the API
    Sequences,
}

/// Arguments for query command
#[derive(Parser, Debug)]
pub struct QueryArgs {
    /// What to look up
    #[arg(value_enum)]
    pub target: QueryTarget,

    #[command(flatten)]
    pub feed: FeedArgs,

    /// Tenant domain
    #[arg(short, long)]
    pub tenant: String,

    /// API name
    #[arg(short, long)]
    pub name: String,

    /// API version
    #[arg(short = 'V', long)]
    pub version: String,

    /// Output format (table, json, json-pretty)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Validate a configuration file
    Validate {
        /// File to validate (defaults to the standard locations)
        file: Option<PathBuf>,
    },

    /// Write an example configuration file
    Init {
        /// Destination path
        #[arg(default_value = "artifact-sync.yaml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List supported environment variables and their current values
    Env,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_args() {
        let args = Args::parse_from([
            "artifact-sync",
            "sync",
            "--events",
            "events.jsonl",
            "--engine-url",
            "http://engine:9443/admin",
            "--dry-run",
        ]);
        match args.command {
            Command::Sync(sync_args) => {
                assert_eq!(sync_args.feed.events, Some(PathBuf::from("events.jsonl")));
                assert_eq!(
                    sync_args.engine_url.as_deref(),
                    Some("http://engine:9443/admin")
                );
                assert!(sync_args.dry_run);
                assert_eq!(sync_args.format, "table");
            }
            _ => panic!("Expected Sync command"),
        }
    }

    #[test]
    fn test_query_args() {
        let args = Args::parse_from([
            "artifact-sync",
            "--log-level",
            "warn",
            "query",
            "sequences",
            "-e",
            "events.jsonl",
            "-t",
            "t1",
            "-n",
            "PetStore",
            "-V",
            "v1",
        ]);
        assert_eq!(args.log_level.as_deref(), Some("warn"));
        match args.command {
            Command::Query(query_args) => {
                assert_eq!(query_args.target, QueryTarget::Sequences);
                assert_eq!(query_args.tenant, "t1");
                assert_eq!(query_args.name, "PetStore");
                assert_eq!(query_args.version, "v1");
            }
            _ => panic!("Expected Query command"),
        }
    }

    #[test]
    fn test_config_init_default_path() {
        let args = Args::parse_from(["artifact-sync", "config", "init"]);
        match args.command {
            Command::Config(ConfigArgs {
                action: ConfigAction::Init { path, force },
            }) => {
                assert_eq!(path, PathBuf::from("artifact-sync.yaml"));
                assert!(!force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }
}
