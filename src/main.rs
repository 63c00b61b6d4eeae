//! autoblockip - Synology AutoBlock deny-list filler
//!
//! Fills the DSM AutoBlock database from IP block-lists.

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use autoblockip::cli::Cli;
use autoblockip::commands::fill;
use autoblockip::report::render;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Dry runs always show details
    let log_level = if cli.verbose || cli.dry_run {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .without_time()
        // Report goes to stdout
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let format = cli.report_format()?;
    let config = cli.to_config()?;

    let outcome = fill::run(&config, cli.dry_run).await?;
    if !cli.quiet {
        print!("{}", render(&outcome.summary, outcome.elapsed_seconds, format));
    }

    if outcome.is_failure() {
        anyhow::bail!(
            "{}",
            outcome
                .summary
                .failure
                .as_deref()
                .unwrap_or("No database access, nothing was written")
        );
    }
    Ok(())
}
