//! # Registry Scripts CLI
//!
//! Binary entry point for the `registry-scripts` command-line tool. It parses
//! arguments with `clap` and hands off to the matching command; all real work
//! lives in the `registry_scripts` library.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli.execute()
}
