//! # Test Command Implementation
//!
//! Runs the test script of every package the `install` command installed and
//! writes `test-results.json`. Packages that failed earlier stages are
//! reported without being run.

use anyhow::{anyhow, Context as _, Result};
use clap::Args;
use log::info;

use registry_scripts::config::Config;
use registry_scripts::defaults::{INSTALL_RESULTS_FILE, TEST_RESULTS_FILE};
use registry_scripts::package_manager::CliPackageManager;
use registry_scripts::stages::test::Tester;
use registry_scripts::stages::{
    read_results, write_results, InstallResult, RunSummary, StageOptions, TestResult,
};

use super::{finish, Context, StageArgs};

/// Run the test suites of installed packages
#[derive(Args, Debug)]
pub struct TestArgs {
    #[command(flatten)]
    pub stage: StageArgs,
}

/// Execute the `test` command.
pub fn execute(args: TestArgs, ctx: &Context) -> Result<()> {
    let config = args.stage.config()?;
    let installs: Vec<InstallResult> = read_results(config.temp_dir(), INSTALL_RESULTS_FILE)?
        .ok_or_else(|| {
            anyhow!(
                "No {} in {}; run the install command first",
                INSTALL_RESULTS_FILE,
                config.temp_dir().display()
            )
        })?;
    let installs: Vec<InstallResult> = installs
        .into_iter()
        .filter(|r| args.stage.selects(&r.package.original_name))
        .collect();

    let results = run_tests(&config, &args.stage, &installs, ctx)?;
    let path = write_results(config.temp_dir(), TEST_RESULTS_FILE, &results)?;
    info!("Wrote {}", path.display());

    let out = ctx.output(args.stage.quiet);
    finish(&out, "test", &RunSummary::from_tests(&results), args.stage.force)
}

/// Runs the test stage with the real package manager.
pub fn run_tests(
    config: &Config,
    stage: &StageArgs,
    installs: &[InstallResult],
    ctx: &Context,
) -> Result<Vec<TestResult>> {
    let out = ctx.output(stage.quiet);
    let package_manager = CliPackageManager::new(config.package_manager());
    let tester = Tester::new(config, &package_manager);

    let ready = installs.iter().filter(|r| r.installed).count();
    let progress = out.progress_bar(ready, "test");
    let opts = StageOptions::new(stage.concurrency(config))
        .with_signal(&ctx.signal)
        .with_progress(&progress);
    let results = tester
        .test_all(installs, opts)
        .context("Failed to run tests")?;
    progress.finish_and_clear();
    Ok(results)
}
