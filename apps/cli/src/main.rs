//! bylawdb CLI: archive municipal bylaws and extract ADU requirements.
//!
//! Registers jurisdictions, runs scrape jobs inline or through the
//! in-process worker pool, and inspects the archive.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
