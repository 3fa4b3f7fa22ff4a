use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum ProxyCmd {
    /// Start the proxy with an empty model list (models are registered on demand)
    Start,
    /// Stop the proxy
    Stop,
    /// Show proxy status
    Status,
    /// Check proxy health (exit 1 when unhealthy)
    Health,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum DbCmd {
    /// Export secrets and start the database container (docker compose up -d)
    Start,
    /// Stop the database container (docker compose down)
    Stop,
    /// Show database container health
    Status,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum ProfilesCmd {
    /// List available profiles
    List,
    /// Show a profile's tier models and resolved model set
    Show { name: String },
    /// Copy the shipped profiles.yaml into the config dir (never overwrites)
    Install,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum ModelsCmd {
    /// List available model definitions
    List,
    /// Show a model definition
    Show { name: String },
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum SecretsCmd {
    /// Create the secrets template
    Init {
        /// Fill in a random database password
        #[arg(long)]
        generate: bool,
        /// Overwrite an existing secrets file
        #[arg(long)]
        force: bool,
    },
    /// Write secrets to the compose .env file
    Export,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Command {
    /// Register a directory token with a profile and ensure its models
    Enter {
        token: String,
        profile: String,
        /// Directory associated with the token (default: current directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Release a directory token (unknown tokens are ignored)
    Leave { token: String },
    /// Delete models whose lease expired
    Janitor {
        /// Print nothing
        #[arg(long, short = 'q')]
        quiet: bool,
        /// Ignore the once-per-minute rate limit
        #[arg(long, short = 'f')]
        force: bool,
    },
    /// Show proxy status, active tokens, refcounts and leases
    Status,
    /// Configure direnv files binding a directory to a profile
    #[command(name = "set-folder")]
    SetFolder {
        profile: String,
        /// Target directory (default: current directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Print the client environment for a profile
    Env {
        profile: String,
        /// Emit `export KEY="value"` lines
        #[arg(long)]
        export: bool,
    },
    /// Run a command (default: claude) with a profile's environment
    With {
        profile: String,
        /// Command and arguments (after --)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        cmd: Vec<String>,
    },
    /// Proxy lifecycle
    Proxy {
        #[command(subcommand)]
        cmd: ProxyCmd,
    },
    /// Database container lifecycle
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },
    /// Profile catalog
    Profiles {
        #[command(subcommand)]
        cmd: ProfilesCmd,
    },
    /// Model definitions
    Models {
        #[command(subcommand)]
        cmd: ModelsCmd,
    },
    /// Secrets file management
    Secrets {
        #[command(subcommand)]
        cmd: SecretsCmd,
    },
    /// Copy shipped models.yaml and profiles.yaml into the config dir
    Install {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
    /// Run diagnostics to check environment and configuration
    Doctor,
}

#[derive(Parser, Debug)]
#[command(
    name = "run-claude",
    version,
    about = "Directory-aware launcher for a local LiteLLM proxy with leased model registration.",
    after_long_help = "Examples:\n  run-claude set-folder fast\n  run-claude enter \"$AGENT_SHIM_TOKEN\" fast\n  run-claude leave \"$AGENT_SHIM_TOKEN\"\n  run-claude janitor --quiet\n  run-claude with fast -- claude --help\n"
)]
pub(crate) struct Cli {
    /// Enable debug logging (overridden by RUN_CLAUDE_LOG)
    #[arg(long, short = 'd', global = true)]
    pub(crate) debug: bool,

    /// Colorize output: auto|always|never
    #[arg(long = "color", value_enum, global = true)]
    pub(crate) color: Option<run_claude::ColorMode>,

    #[command(subcommand)]
    pub(crate) command: Command,
}
