//! exposecast CLI: real-estate exposé in, CRM audience and marketing email out.
//!
//! Serves the upload/progress HTTP surface or runs a single exposé through
//! the pipeline from the terminal.

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
