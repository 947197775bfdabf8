//! # Install Command Implementation
//!
//! Installs every package the `download` command marked ready, each in its
//! own working directory under the temp dir, and overlays its override.
//! Working directories whose cache marker still matches are reused.
//!
//! Reads `download-results.json` and writes `install-results.json`.

use anyhow::{anyhow, Context as _, Result};
use clap::Args;
use log::info;

use registry_scripts::config::Config;
use registry_scripts::defaults::{DOWNLOAD_RESULTS_FILE, INSTALL_RESULTS_FILE};
use registry_scripts::git::{GitSourceFetcher, NoSourceFetcher, SourceFetcher};
use registry_scripts::package_manager::CliPackageManager;
use registry_scripts::stages::install::Installer;
use registry_scripts::stages::{
    read_results, write_results, DownloadResult, InstallResult, RunSummary, StageOptions,
};

use super::{discover_overrides, finish, Context, StageArgs};

/// Install packages and overlay their overrides
#[derive(Args, Debug)]
pub struct InstallArgs {
    #[command(flatten)]
    pub stage: StageArgs,

    #[command(flatten)]
    pub install: InstallFlags,
}

/// Install behavior shared with the `run` command.
#[derive(Args, Debug, Clone, Copy)]
pub struct InstallFlags {
    /// Ignore cached working directories and reinstall everything.
    #[arg(long)]
    pub fresh: bool,

    /// Never clone upstream repositories for packages published without tests.
    #[arg(long)]
    pub no_sources: bool,
}

/// Execute the `install` command.
pub fn execute(args: InstallArgs, ctx: &Context) -> Result<()> {
    let config = args.stage.config()?;
    let downloads: Vec<DownloadResult> = read_results(config.temp_dir(), DOWNLOAD_RESULTS_FILE)?
        .ok_or_else(|| {
            anyhow!(
                "No {} in {}; run the download command first",
                DOWNLOAD_RESULTS_FILE,
                config.temp_dir().display()
            )
        })?;
    let downloads: Vec<DownloadResult> = downloads
        .into_iter()
        .filter(|d| args.stage.selects(&d.package.original_name))
        .collect();

    let results = run_install(&config, &args.stage, args.install, &downloads, ctx)?;
    let path = write_results(config.temp_dir(), INSTALL_RESULTS_FILE, &results)?;
    info!("Wrote {}", path.display());

    let out = ctx.output(args.stage.quiet);
    finish(&out, "install", &install_summary(&results), args.stage.force)
}

/// Runs the install stage with the real package manager.
pub fn run_install(
    config: &Config,
    stage: &StageArgs,
    flags: InstallFlags,
    downloads: &[DownloadResult],
    ctx: &Context,
) -> Result<Vec<InstallResult>> {
    let out = ctx.output(stage.quiet);
    let index = discover_overrides(config)?;
    let package_manager = CliPackageManager::new(config.package_manager());
    let sources: &dyn SourceFetcher = if flags.no_sources {
        &NoSourceFetcher
    } else {
        &GitSourceFetcher
    };

    let installer = Installer::new(config, &package_manager, sources, &index)
        .with_fresh_installs(flags.fresh);

    let ready = downloads.iter().filter(|d| d.downloaded).count();
    let progress = out.progress_bar(ready, "install");
    let opts = StageOptions::new(stage.concurrency(config))
        .with_signal(&ctx.signal)
        .with_progress(&progress);
    let results = installer
        .install_all(downloads, opts)
        .context("Failed to install packages")?;
    progress.finish_and_clear();
    Ok(results)
}

pub fn install_summary(results: &[InstallResult]) -> RunSummary {
    RunSummary::from_reasons(
        results
            .iter()
            .map(|r| (r.package.original_name.as_str(), r.reason.as_deref())),
    )
}
