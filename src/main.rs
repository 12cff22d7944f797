mod cli;
mod engine;
mod errors;
mod lists;
mod logging;
mod model;
mod modules;
mod orchestrator;
mod output;
mod render;
mod session;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run(cli::Cli::parse()).await
}
