//! upd - application self-updater CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use upd_cli::cmd;
use upd_cli::ui::Output;
use upd_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let dir = cli.install_dir.as_deref();
    let dry_run = cli.dry_run;

    let result = match cli.command {
        Commands::Check { force } => cmd::check::check(dir, force).await,
        Commands::Status { json } => cmd::status::status(dir, json),
        Commands::Channels => cmd::channels::channels(dir),
        Commands::Use { channel } => cmd::use_channel::use_channel(dir, &channel, dry_run).await,
        Commands::Apply {
            in_process,
            relaunch,
        } => cmd::apply::apply(dir, in_process, relaunch, dry_run).await,
        Commands::Recover => cmd::recover::recover(dir, dry_run),
        Commands::Clean { helper } => cmd::clean::clean(dir, helper, dry_run),
    };

    // Drain the UI before anyhow prints to stderr.
    Output::new().wait_async().await;
    result
}
