//! Clap derive structures for the `gardenly` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// gardenly -- mirror Gardena smart devices into a local state tree
#[derive(Debug, Parser)]
#[command(
    name = "gardenly",
    version,
    about = "Bridge Gardena smart garden devices into a local state tree",
    long_about = "Polls the Gardena smart cloud, mirrors the configured datapoints\n\
        into a hierarchical state tree, and turns local trigger writes\n\
        back into device commands.",
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
    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "GARDENLY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll and dispatch commands until interrupted
    #[command(
        long_about = "Poll and dispatch commands until interrupted.\n\n\
            The state tree lives in this process only. Commands reach the\n\
            cloud through lines on stdin:\n\n  \
            ADDRESS=VALUE   write a value, e.g. L1.D1.mow.trigger=true\n  \
            poll            run an extra poll now\n\n\
            On unix, SIGUSR1 also runs an extra poll. For a single command\n\
            without a running bridge use: gardenly trigger"
    )]
    Run,

    /// Log in and report the account id
    Check,

    /// List locations of the account
    #[command(alias = "loc")]
    Locations,

    /// List devices of a location
    #[command(alias = "dev")]
    Devices(DevicesArgs),

    /// Generate a datapoint descriptor from live devices
    Discover(DiscoverArgs),

    /// Run one poll and print the resulting tree
    Sync,

    /// Fire a command trigger or write a smart property
    Trigger(TriggerArgs),

    /// Show and manage the configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct DevicesArgs {
    /// Location id
    pub location: String,
}

#[derive(Debug, Args)]
pub struct DiscoverArgs {
    /// Only this location (default: all)
    #[arg(long, short = 'l')]
    pub location: Option<String>,

    /// Write the descriptor to a file instead of stdout
    #[arg(long, short = 'w')]
    pub write: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct TriggerArgs {
    /// Tree address, e.g. `datapoints.L1.D1.mow.trigger`
    pub address: String,

    /// Command parameter (repeatable): `name=value`, value as JSON or text
    #[arg(long = "param", short = 'p', value_name = "NAME=VALUE")]
    pub params: Vec<String>,

    /// Value to write instead of `true` (smart properties)
    #[arg(long)]
    pub value: Option<String>,

    /// Seconds to wait for the cloud to accept the command
    #[arg(long, default_value = "30")]
    pub timeout: u64,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration (password masked)
    Show,
    /// Print the config file path
    Path,
    /// Store the account password in the system keyring
    SetPassword,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
