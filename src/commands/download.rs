//! # Download Command Implementation
//!
//! Validates packages before anything is installed: each one must not be
//! skip-listed, must have an override directory and must be pinned in the
//! reference test manifest. Results are written to
//! `<temp dir>/download-results.json` for the `install` command.
//!
//! This command only reads the workspace.

use anyhow::{Context as _, Result};
use clap::Args;

use registry_scripts::defaults::DOWNLOAD_RESULTS_FILE;
use registry_scripts::stages::{download, write_results, RunSummary, StageOptions};

use super::{discover_overrides, finish, Context, StageArgs};

/// Validate packages and record which ones can be installed
#[derive(Args, Debug)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub stage: StageArgs,
}

/// Execute the `download` command.
pub fn execute(args: DownloadArgs, ctx: &Context) -> Result<()> {
    let out = ctx.output(args.stage.quiet);
    let config = args.stage.config()?;
    let index = discover_overrides(&config)?;
    let records = index.records(&args.stage.package);

    let progress = out.progress_bar(records.len(), "download");
    let opts = StageOptions::new(args.stage.concurrency(&config))
        .with_signal(&ctx.signal)
        .with_progress(&progress);
    let results = download::validate_all(&config, &records, opts)
        .context("Failed to validate packages")?;
    progress.finish_and_clear();

    let path = write_results(config.temp_dir(), DOWNLOAD_RESULTS_FILE, &results)?;
    log::info!("Wrote {}", path.display());

    let summary = RunSummary::from_reasons(
        results
            .iter()
            .map(|r| (r.package.original_name.as_str(), r.reason.as_deref())),
    );
    finish(&out, "download", &summary, args.stage.force)
}
