//! CLI command definitions
//!
//! Defines the clap commands for the kubestage CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::scenarios::Scenario;

/// Options shared by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Configuration file (default: platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding per-scenario working directories
    #[arg(long, global = true)]
    pub stages_dir: Option<PathBuf>,

    /// Log at debug level
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Mirror logs to a file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run scenarios, resuming from saved stage values where stages are skipped
    Run {
        /// Scenarios to run
        #[arg(value_enum, required_unless_present = "all")]
        scenarios: Vec<Scenario>,

        /// Run every scenario
        #[arg(long, conflicts_with = "scenarios")]
        all: bool,

        /// Skip a stage by name; can be given multiple times.
        /// SKIP_<stage> environment variables are honoured as well
        #[arg(long = "skip", value_name = "STAGE")]
        skip: Vec<String>,

        /// Repository holding the modules under test
        #[arg(long)]
        repo_root: Option<PathBuf>,
    },

    /// List the available scenarios
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the stages of a scenario and what a previous run saved
    Show {
        #[arg(value_enum)]
        scenario: Scenario,
    },

    /// Remove the working directories of scenarios
    Clean {
        #[arg(value_enum, required_unless_present = "all")]
        scenarios: Vec<Scenario>,

        /// Clean every scenario
        #[arg(long, conflicts_with = "scenarios")]
        all: bool,
    },
}
