//! # Manifest Command Implementation
//!
//! Generates `manifest.json` at the workspace root from the override
//! packages and registry metadata. With `--check` nothing is written; the
//! command fails if the file on disk is out of date.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context as _, Result};
use clap::builder::RangedU64ValueParser;
use clap::Args;

use registry_scripts::config::Config;
use registry_scripts::manifest::{generate, PackageManagerRegistry};
use registry_scripts::output::emoji;
use registry_scripts::package_manager::CliPackageManager;
use registry_scripts::stages::StageOptions;

use super::{discover_overrides, Context};

/// Generate the registry manifest
#[derive(Args, Debug)]
pub struct ManifestArgs {
    /// Where to write the manifest. Defaults to `manifest.json` at the
    /// workspace root.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Fail if the manifest on disk differs from a freshly generated one.
    #[arg(long)]
    pub check: bool,

    /// Maximum number of registry lookups at once.
    #[arg(
        long,
        value_name = "N",
        env = "REGISTRY_CONCURRENCY",
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub concurrency: Option<usize>,

    /// Do not print progress.
    #[arg(long)]
    pub quiet: bool,
}

/// Execute the `manifest` command.
pub fn execute(args: ManifestArgs, ctx: &Context) -> Result<()> {
    let out = ctx.output(args.quiet);
    let config = Config::from_env()?;
    let path = args
        .output
        .clone()
        .unwrap_or_else(|| config.manifest_json_path());

    let package_manager = CliPackageManager::new(config.package_manager());
    let registry = PackageManagerRegistry::new(&package_manager);
    let concurrency = args
        .concurrency
        .unwrap_or_else(|| config.default_concurrency());

    let total = discover_overrides(&config)?.len();
    let progress = out.progress_bar(total, "manifest");
    let opts = StageOptions::new(concurrency)
        .with_signal(&ctx.signal)
        .with_progress(&progress);
    let manifest = generate(&config, &registry, opts).context("Failed to generate manifest")?;
    progress.finish_and_clear();
    let content = manifest.to_json_string()?;

    if args.check {
        let current = fs::read_to_string(&path).unwrap_or_default();
        if current != content {
            bail!("{} is out of date; run the manifest command", path.display());
        }
        if !out.quiet {
            println!("{} {} is up to date", emoji(&out, "✅", "[OK]"), path.display());
        }
        return Ok(());
    }

    manifest
        .write(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    if !out.quiet {
        println!(
            "{} Wrote {} entries to {}",
            emoji(&out, "📝", "[WRITE]"),
            manifest.len(),
            path.display()
        );
    }
    Ok(())
}
