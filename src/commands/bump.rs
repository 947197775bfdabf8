//! # Bump Command Implementation
//!
//! Increments the `version` of override packages in place. Without
//! `--package` every override is bumped.

use anyhow::{bail, Context as _, Result};
use clap::{Args, ValueEnum};

use registry_scripts::config::Config;
use registry_scripts::output::emoji;
use registry_scripts::version::{bump_package, BumpLevel};

use super::{discover_overrides, Context};

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum Level {
    Patch,
    Minor,
    Major,
}

impl From<Level> for BumpLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Patch => BumpLevel::Patch,
            Level::Minor => BumpLevel::Minor,
            Level::Major => BumpLevel::Major,
        }
    }
}

/// Bump override package versions
#[derive(Args, Debug)]
pub struct BumpArgs {
    /// Which part of the version to increment.
    #[arg(value_enum, default_value = "patch")]
    pub level: Level,

    /// Only bump this package (original npm name). Repeatable.
    #[arg(long, value_name = "NAME")]
    pub package: Vec<String>,

    /// Do not print the changed versions.
    #[arg(long)]
    pub quiet: bool,
}

/// Execute the `bump` command.
pub fn execute(args: BumpArgs, ctx: &Context) -> Result<()> {
    let out = ctx.output(args.quiet);
    let config = Config::from_env()?;
    let index = discover_overrides(&config)?;

    for name in &args.package {
        if !index.contains(name) {
            bail!("No override package named '{}'", name);
        }
    }

    let level = BumpLevel::from(args.level);
    for package in index
        .iter()
        .filter(|p| args.package.is_empty() || args.package.contains(&p.original_name))
    {
        let change = bump_package(&package.directory, level)
            .with_context(|| format!("Failed to bump {}", package.override_name))?;
        if !out.quiet {
            println!(
                "{} {}: {} -> {}",
                emoji(&out, "🔖", "[BUMP]"),
                change.package,
                change.from,
                change.to
            );
        }
    }
    Ok(())
}
