//! # CLI Command Implementations
//!
//! One module per subcommand. Each defines an `Args` struct derived with
//! `clap` and an `execute` function that calls into the `registry_scripts`
//! library.
//!
//! The pipeline commands (`download`, `install`, `test`, `run`) share
//! [`StageArgs`] and the same exit policy: any critical per-package failure
//! makes the command exit with status 1 unless `--force` is given.

pub mod bump;
pub mod cache;
pub mod download;
pub mod install;
pub mod manifest;
pub mod publish;
pub mod run;
pub mod test;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::builder::RangedU64ValueParser;
use clap::Args;

use registry_scripts::config::Config;
use registry_scripts::output::{print_summary, OutputConfig};
use registry_scripts::registry::OverrideIndex;
use registry_scripts::runner::AbortSignal;
use registry_scripts::stages::RunSummary;

/// State shared by every command.
pub struct Context {
    pub color: String,
    pub signal: AbortSignal,
}

impl Context {
    pub fn new(color: &str, signal: AbortSignal) -> Self {
        Self {
            color: color.to_string(),
            signal,
        }
    }

    pub fn output(&self, quiet: bool) -> OutputConfig {
        OutputConfig::from_env_and_flag(&self.color).with_quiet(quiet)
    }
}

/// Flags shared by the pipeline commands.
#[derive(Args, Debug, Clone)]
pub struct StageArgs {
    /// Only process this package (original npm name). Repeatable.
    #[arg(long, value_name = "NAME")]
    pub package: Vec<String>,

    /// Maximum number of packages processed at once.
    ///
    /// Defaults to 20 when `CI` is set and 3 otherwise.
    #[arg(
        long,
        value_name = "N",
        env = "REGISTRY_CONCURRENCY",
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub concurrency: Option<usize>,

    /// Directory for working directories and stage results.
    ///
    /// Defaults to the system cache directory
    /// (`~/.cache/socket-registry` on Linux).
    #[arg(long, value_name = "DIR", env = "REGISTRY_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Exit with status 0 even when packages fail.
    #[arg(long)]
    pub force: bool,

    /// Do not print progress or the summary.
    #[arg(long)]
    pub quiet: bool,
}

impl StageArgs {
    /// Configuration for the current directory with these flags applied.
    pub fn config(&self) -> Result<Config> {
        let mut config = Config::from_env()?;
        if let Some(temp_dir) = &self.temp_dir {
            config = config.with_temp_dir(temp_dir);
        }
        Ok(config)
    }

    pub fn concurrency(&self, config: &Config) -> usize {
        self.concurrency
            .unwrap_or_else(|| config.default_concurrency())
    }

    /// Whether a result for `name` passes the `--package` filter.
    pub fn selects(&self, name: &str) -> bool {
        self.package.is_empty() || self.package.iter().any(|p| p == name)
    }
}

/// Override index for the configured workspace.
pub fn discover_overrides(config: &Config) -> Result<OverrideIndex> {
    Ok(OverrideIndex::discover(&config.npm_packages_path())?)
}

/// Prints the summary and applies the exit policy.
pub fn finish(out: &OutputConfig, title: &str, summary: &RunSummary, force: bool) -> Result<()> {
    print_summary(out, title, summary);
    if summary.has_failures() && !force {
        let total = summary.passed + summary.failed + summary.skipped;
        bail!("{} of {} packages failed", summary.failed, total);
    }
    Ok(())
}
