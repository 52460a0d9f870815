//! Clap derive structures for the `depsync` CLI.
//!
//! Defines the command tree, global flags, and shared value enums.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use depsync_core::SliceKind;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// depsync -- inspect and edit notebook dependencies through the daemon
#[derive(Debug, Parser)]
#[command(
    name = "depsync",
    version,
    about = "Inspect and edit notebook dependencies through the depsync daemon",
    long_about = "Talks to a running depsync daemon over WebSocket.\n\n\
        Every edit is sent to the daemon, which owns the notebook document;\n\
        the printed state is what the daemon broadcast back.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file to use instead of the platform default
    #[arg(long, env = "DEPSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Daemon WebSocket URL (overrides config)
    #[arg(long, short = 'u', env = "DEPSYNC_URL", global = true)]
    pub url: Option<String>,

    /// Per-call timeout in seconds (overrides config)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "DEPSYNC_OUTPUT",
        default_value = "text",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

/// Package manager whose manifest a command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Manager {
    Uv,
    Conda,
}

impl From<Manager> for SliceKind {
    fn from(manager: Manager) -> Self {
        match manager {
            Manager::Uv => Self::Uv,
            Manager::Conda => Self::Conda,
        }
    }
}

// ── Command Tree ─────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the dependencies of every manifest
    #[command(alias = "ls")]
    Show,

    /// Add a package to a manifest
    Add(PackageArgs),

    /// Remove a package from a manifest
    #[command(alias = "rm")]
    Remove(PackageArgs),

    /// Replace a manifest wholesale
    Set(SetArgs),

    /// Re-fetch the current state from the daemon
    Refresh,

    /// Print the state every time the daemon broadcasts a change
    Watch,

    /// Manage the CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct PackageArgs {
    /// Manifest to edit
    #[arg(value_enum)]
    pub manager: Manager,

    /// Package specifier, e.g. `numpy` or `pandas>=2`
    pub package: String,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    #[command(subcommand)]
    pub target: SetTarget,
}

#[derive(Debug, Subcommand)]
pub enum SetTarget {
    /// Replace the uv manifest
    Uv {
        /// Full dependency list; omit to clear it
        dependencies: Vec<String>,

        /// Python version constraint, e.g. `>=3.10`
        #[arg(long)]
        requires_python: Option<String>,
    },

    /// Replace the conda manifest
    Conda {
        /// Full dependency list; omit to clear it
        dependencies: Vec<String>,

        /// Channel to search (repeatable, in priority order)
        #[arg(long = "channel", short = 'c')]
        channels: Vec<String>,

        /// Python version to pin
        #[arg(long)]
        python: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,

    /// Print the config file location
    Path,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
