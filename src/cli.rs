use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "clusterform")]
#[command(version)]
#[command(about = "Converge a Galera/XtraDB cluster node to its declared state", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Host configuration file (.toml or .json)
    #[arg(short, long, global = true, env = "CLUSTERFORM_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Converge the host to the declared state
    Apply(ApplyArgs),

    /// Show the order resources would be applied in, without touching the host
    Plan,

    /// Show what apply would change, with content diffs for files
    Diff,

    /// Show resolved component parameters and where each value came from
    Params {
        /// Only this component instance (e.g. percona::node or percona::db[app])
        component: Option<String>,
    },

    /// Check the configuration: parameters, resources and the dependency graph
    Validate,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Apply
// ============================================================================

#[derive(Args)]
pub struct ApplyArgs {
    /// Only show what would change
    #[arg(long)]
    pub dry_run: bool,

    /// Parallel jobs (defaults to [run] jobs in the config, then 4)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}
