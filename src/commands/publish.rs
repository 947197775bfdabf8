//! # Publish Command Implementation
//!
//! Publishes override packages whose local version is ahead of the
//! registry. The plan is printed first; `--dry-run` passes the flag through
//! to the package manager so nothing is uploaded.

use anyhow::{bail, Context as _, Result};
use clap::Args;

use registry_scripts::config::Config;
use registry_scripts::manifest::PackageManagerRegistry;
use registry_scripts::output::emoji;
use registry_scripts::package_manager::CliPackageManager;
use registry_scripts::registry::OverridePackage;
use registry_scripts::retry::RetryPolicy;
use registry_scripts::version::{plan_publish, publish_planned, PublishAction};

use super::{discover_overrides, Context};

/// Publish override packages that are ahead of the registry
#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Only consider this package (original npm name). Repeatable.
    #[arg(long, value_name = "NAME")]
    pub package: Vec<String>,

    /// Run the package manager's publish in dry-run mode.
    #[arg(long)]
    pub dry_run: bool,

    /// Exit with status 0 even when a publish fails.
    #[arg(long)]
    pub force: bool,

    /// Do not print the plan.
    #[arg(long)]
    pub quiet: bool,
}

/// Execute the `publish` command.
pub fn execute(args: PublishArgs, ctx: &Context) -> Result<()> {
    let out = ctx.output(args.quiet);
    let config = Config::from_env()?;
    let index = discover_overrides(&config)?;
    let packages: Vec<&OverridePackage> = index
        .iter()
        .filter(|p| args.package.is_empty() || args.package.contains(&p.original_name))
        .collect();

    let package_manager = CliPackageManager::new(config.package_manager());
    let registry = PackageManagerRegistry::new(&package_manager);
    let plans = plan_publish(&packages, &registry).context("Failed to plan publish")?;

    if !out.quiet {
        for plan in &plans {
            let marker = match plan.action {
                PublishAction::Publish => emoji(&out, "🚀", "[PUBLISH]"),
                PublishAction::UpToDate => emoji(&out, "✅", "[OK]"),
                PublishAction::Behind => emoji(&out, "⚠️", "[WARN]"),
            };
            let published = plan
                .published
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unpublished".to_string());
            println!(
                "{} {} {} (registry: {}): {}",
                marker, plan.package, plan.local, published, plan.action
            );
        }
    }

    let outcomes = publish_planned(&plans, &package_manager, &RetryPolicy::default(), args.dry_run);
    let mut failed = 0;
    for (package, outcome) in &outcomes {
        if let Err(e) = outcome {
            failed += 1;
            log::error!("{}: {}", package, e);
        }
    }

    if failed > 0 && !args.force {
        bail!("{} of {} publishes failed", failed, outcomes.len());
    }
    Ok(())
}
