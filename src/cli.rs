use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keel")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Plan and apply an EKS + Traefik + ACM stack in dependency order", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file [default: $KEEL_CONFIG or ./keel.toml]
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory holding per-stack state files [default: $KEEL_STATE_DIR or ~/.local/state/keel]
    #[arg(long, global = true, value_name = "PATH")]
    pub state_dir: Option<PathBuf>,

    /// Stack name, overrides `[stack].name`
    #[arg(short, long, global = true, value_name = "NAME")]
    pub stack: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change
    Plan,

    /// Create, update and replace resources until they match the configuration
    Apply(ApplyArgs),

    /// Delete every resource tracked in state, dependents first
    Destroy(ApplyArgs),

    /// List tracked resources and whether they match the configuration
    Status,

    /// Print the stack outputs recorded in state
    Outputs {
        /// Print as a JSON object
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ApplyArgs {
    /// Don't ask for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Maximum number of provider operations in flight
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    pub jobs: Option<u16>,
}
