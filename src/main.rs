//! ctxpack CLI: pack a directory into one markdown, JSON or YAML document.

use anyhow::Result;
use clap::Parser;
use ctxpack::engine::arg_parser::Cli;
use ctxpack::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
