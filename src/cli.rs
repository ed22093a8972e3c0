use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use declarative::TargetState;
use std::path::PathBuf;

use crate::resource::ResourceKind;

#[derive(Parser)]
#[command(name = "hmcctl")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative reconciliation of HMC resources", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Console inventory snapshot (JSON)
    #[arg(long, global = true, value_name = "FILE", env = "HMCCTL_INVENTORY")]
    pub inventory: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Bring a resource to a target state
    Apply(ApplyArgs),

    /// Show the current properties of a resource
    Facts(TargetArgs),

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Which resource to act on.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Resource type
    #[arg(value_enum)]
    pub kind: ResourceKind,

    /// Resource name (the partition name for crypto attachments)
    #[arg(long)]
    pub name: String,

    /// CPC holding the resource
    #[arg(long)]
    pub cpc: Option<String>,

    /// Partition holding the resource (NICs, HBAs, crypto attachments)
    #[arg(long)]
    pub partition: Option<String>,

    /// Report attached storage groups in partition results
    #[arg(long)]
    pub expand_storage_groups: bool,

    /// Report attached crypto adapters in partition results
    #[arg(long)]
    pub expand_crypto_adapters: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Target state (absent, present, set, active, stopped, facts)
    #[arg(long, short = 's')]
    pub state: TargetState,

    /// Desired properties file (TOML or JSON)
    #[arg(long, value_name = "FILE")]
    pub props: Option<PathBuf>,

    /// Set a single property; the value is parsed as JSON, else taken as a string
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Show what would change without changing anything
    #[arg(long)]
    pub check: bool,

    /// Status wait timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show configuration and inventory locations
    Show,
}
