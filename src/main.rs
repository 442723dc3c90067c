mod adapters;
mod cli;
mod config;
mod detect;
mod document;
mod engine;
mod error;
mod graph;
mod ids;
mod model;
mod parser;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    info!("Starting cigraph");
    cli.execute().await?;

    Ok(())
}
