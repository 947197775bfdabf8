//! # Run Command Implementation
//!
//! Runs download, install and test back to back in one process. Results are
//! handed from stage to stage in memory; each stage's results file is still
//! written so the individual commands can pick up from any point.

use anyhow::{Context as _, Result};
use clap::Args;

use registry_scripts::defaults::{
    DOWNLOAD_RESULTS_FILE, INSTALL_RESULTS_FILE, TEST_RESULTS_FILE,
};
use registry_scripts::stages::{download, write_results, RunSummary, StageOptions};

use super::install::{install_summary, run_install, InstallFlags};
use super::test::run_tests;
use super::{discover_overrides, finish, Context, StageArgs};

/// Download, install and test packages
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub stage: StageArgs,

    #[command(flatten)]
    pub install: InstallFlags,
}

/// Execute the `run` command.
pub fn execute(args: RunArgs, ctx: &Context) -> Result<()> {
    let out = ctx.output(args.stage.quiet);
    let config = args.stage.config()?;
    let temp_dir = config.temp_dir().to_path_buf();
    let index = discover_overrides(&config)?;
    let records = index.records(&args.stage.package);

    let progress = out.progress_bar(records.len(), "download");
    let opts = StageOptions::new(args.stage.concurrency(&config))
        .with_signal(&ctx.signal)
        .with_progress(&progress);
    let downloads = download::validate_all(&config, &records, opts)
        .context("Failed to validate packages")?;
    progress.finish_and_clear();
    write_results(&temp_dir, DOWNLOAD_RESULTS_FILE, &downloads)?;

    let installs = run_install(&config, &args.stage, args.install, &downloads, ctx)?;
    write_results(&temp_dir, INSTALL_RESULTS_FILE, &installs)?;

    let tests = run_tests(&config, &args.stage, &installs, ctx)?;
    write_results(&temp_dir, TEST_RESULTS_FILE, &tests)?;

    if !out.quiet {
        let installed = install_summary(&installs);
        println!(
            "Installed {} packages ({} failed, {} skipped)",
            installed.passed, installed.failed, installed.skipped
        );
    }
    finish(&out, "run", &RunSummary::from_tests(&tests), args.stage.force)
}
