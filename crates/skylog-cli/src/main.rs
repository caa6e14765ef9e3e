//! Binary crate for the `skylog` command-line tool.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - Loading and validating configuration
//! - Driving the ingestion pipeline and report builder

use clap::Parser;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    skylog_core::init()?;

    let cmd = cli::Cli::parse();
    cmd.run().await
}
