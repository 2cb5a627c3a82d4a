//! kubestage - staged, resumable integration tests for Kubernetes modules
//!
//! Runs the bundled scenarios against a cluster through terraform, kubectl,
//! helm and kubergrunt. Any stage can be skipped with `SKIP_<stage>` or
//! `--skip <stage>` to resume from the values a previous run saved.

use clap::Parser;
use kubestage::commands::{Commands, GlobalArgs};
use kubestage::{cli, common::logging};

#[derive(Parser)]
#[command(name = "kubestage", about = "Staged integration tests for Kubernetes modules")]
#[command(version, long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    logging::init_cli(cli.global.verbose, cli.global.log_file.as_deref());

    if let Err(e) = cli::dispatch(cli.command, &cli.global).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
