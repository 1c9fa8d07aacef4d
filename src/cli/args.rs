//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// circlet - run CircleCI-style pipelines locally
///
/// Parses `.circleci/config.yml`, resolves cache keys and executes
/// workflows as a dependency graph of shell jobs.
#[derive(Parser, Debug)]
#[command(name = "circlet")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "CIRCLET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip local .circlet.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a workflow (or a single job)
    Run(RunArgs),

    /// Parse and validate the pipeline document
    Validate(DocumentArgs),

    /// Show the execution plan of a workflow
    Plan(PlanArgs),

    /// Render cache keys with the current context
    Keys(KeysArgs),

    /// Manage the local cache store
    Cache(CacheArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Pipeline document selection shared by every document command
#[derive(Parser, Debug, Default)]
pub struct DocumentArgs {
    /// Pipeline document (default: pipeline.file from config)
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Workflow to run (required when several are defined)
    pub workflow: Option<String>,

    /// Run a single job, ignoring workflows
    #[arg(short, long, conflicts_with = "workflow")]
    pub job: Option<String>,

    #[command(flatten)]
    pub document: DocumentArgs,

    /// Maximum concurrently running jobs
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Stop launching jobs after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Print the plan without executing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip restore_cache and save_cache steps
    #[arg(long)]
    pub no_cache: bool,

    /// Additional environment variables (KEY=VALUE)
    #[arg(short, long, value_parser = parse_env_var)]
    pub env: Vec<(String, String)>,

    /// Branch used for `{{ .Branch }}` and CIRCLE_BRANCH
    #[arg(long)]
    pub branch: Option<String>,
}

/// Arguments for the plan command
#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Workflow to plan (required when several are defined)
    pub workflow: Option<String>,

    #[command(flatten)]
    pub document: DocumentArgs,

    /// Output format
    #[arg(long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the keys command
#[derive(Parser, Debug)]
pub struct KeysArgs {
    /// Only render keys of this job
    #[arg(short, long)]
    pub job: Option<String>,

    #[command(flatten)]
    pub document: DocumentArgs,

    /// Branch used for `{{ .Branch }}`
    #[arg(long)]
    pub branch: Option<String>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., executor.workers)
        key: String,
        /// Value to set
        value: String,
        /// Write to project-local .circlet.toml instead of global config
        #[arg(long)]
        local: bool,
    },
}

/// Output format for listing commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List stored cache entries
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Remove entries older than N days
    Gc {
        /// Age threshold in days (default: cache.gc_days from config)
        #[arg(long)]
        days: Option<u32>,

        /// Dry run - show what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove every entry
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Parse environment variable in KEY=VALUE format
fn parse_env_var(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE format: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}
