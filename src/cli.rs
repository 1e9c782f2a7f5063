use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "confctl")]
#[command(version)]
#[command(about = "Apply declarative machine configuration documents", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Bring the system into the state a document describes
    Apply(ApplyArgs),

    /// Report whether the system is in the described state
    Test(FileArgs),

    /// Check a document's structure and dependencies without touching the system
    Validate(FileArgs),

    /// Print the units of a document
    Show(FileArgs),

    /// Print a unit's current settings
    Get(UnitArgs),

    /// Print every instance of a unit's resource on the system
    Export(UnitArgs),

    /// Inspect recorded applies
    #[command(subcommand)]
    History(HistoryCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct FileArgs {
    /// Configuration document (YAML)
    pub file: PathBuf,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Configuration document (YAML)
    pub file: PathBuf,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Units processed at once (overrides config)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Validate only; create no processors
    #[arg(long)]
    pub check_only: bool,

    /// Do not record this apply in history
    #[arg(long)]
    pub no_history: bool,
}

#[derive(Args)]
pub struct UnitArgs {
    /// Configuration document (YAML)
    pub file: PathBuf,

    /// Unit identifier
    pub identifier: String,
}

#[derive(Subcommand)]
pub enum HistoryCommand {
    /// List recorded applies, newest first
    List,

    /// Show the unit results of a recorded apply
    Show {
        /// Set instance id (a unique prefix is enough)
        id: String,
    },

    /// Forget a recorded apply
    Remove {
        /// Set instance id (a unique prefix is enough)
        id: String,
    },
}
