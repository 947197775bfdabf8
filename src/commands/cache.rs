//! # Cache Command Implementation
//!
//! Manages the per-package working directories the install stage leaves in
//! the temp dir.
//!
//! ## Subcommands
//!
//! - **`list`**: Show every working directory with its marker data
//! - **`clean`**: Remove working directories (`--all`, or `--invalid` for
//!   ones a new install would not reuse)

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use serde_json::json;

use registry_scripts::cache::{list_entries, CacheEntry};
use registry_scripts::config::Config;
use registry_scripts::hash::hash_override_dir;
use registry_scripts::output::{emoji, OutputConfig};
use registry_scripts::registry::OverrideIndex;

use super::{discover_overrides, Context};

/// Inspect or clean install working directories
#[derive(Args, Debug)]
pub struct CacheArgs {
    /// Directory holding the working directories.
    ///
    /// Defaults to the system cache directory
    /// (`~/.cache/socket-registry` on Linux).
    #[arg(long, value_name = "DIR", env = "REGISTRY_TEMP_DIR", global = true)]
    pub temp_dir: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: CacheSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum CacheSubcommand {
    /// List working directories
    List(ListArgs),
    /// Remove working directories
    Clean(CleanArgs),
}

/// Arguments for the cache list command
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the cache clean command
#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Delete every working directory
    #[arg(long)]
    pub all: bool,

    /// Delete working directories that would not be reused: no marker, an
    /// outdated override hash, or no override anymore
    #[arg(long)]
    pub invalid: bool,

    /// Show what would be deleted without deleting anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(long)]
    pub yes: bool,
}

/// Why a working directory would not be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Staleness {
    NoMarker,
    NoOverride,
    OverrideChanged,
}

impl Staleness {
    fn describe(&self) -> &'static str {
        match self {
            Staleness::NoMarker => "incomplete install",
            Staleness::NoOverride => "no override",
            Staleness::OverrideChanged => "override changed",
        }
    }
}

/// Execute the `cache` command.
pub fn execute(args: CacheArgs, ctx: &Context) -> Result<()> {
    let mut config = Config::from_env()?;
    if let Some(temp_dir) = &args.temp_dir {
        config = config.with_temp_dir(temp_dir);
    }
    let out = ctx.output(false);

    match args.command {
        CacheSubcommand::List(list_args) => execute_list(&config, &out, list_args),
        CacheSubcommand::Clean(clean_args) => execute_clean(&config, &out, clean_args),
    }
}

fn execute_list(config: &Config, out: &OutputConfig, args: ListArgs) -> Result<()> {
    let entries = list_entries(config.temp_dir())?;
    let index = discover_overrides(config)?;

    if args.json {
        let values: Vec<_> = entries
            .iter()
            .map(|e| {
                json!({
                    "package": e.package,
                    "path": e.path,
                    "size": e.size,
                    "marker": e.marker,
                    "stale": staleness(e, &index).map(|s| s.describe()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No working directories in {}", config.temp_dir().display());
        return Ok(());
    }

    println!(
        "{} Working directories in {}:\n",
        emoji(out, "📦", "[CACHE]"),
        config.temp_dir().display()
    );
    println!("{:<32} {:<14} {:<25} {:>10}", "PACKAGE", "SPECIFIER", "INSTALLED", "SIZE");
    println!("{}", "-".repeat(84));
    for entry in &entries {
        let (specifier, installed) = match &entry.marker {
            Some(marker) => (
                marker.version_specifier.clone(),
                marker.installed_at.format("%Y-%m-%d %H:%M UTC").to_string(),
            ),
            None => ("-".to_string(), "(incomplete)".to_string()),
        };
        println!(
            "{:<32} {:<14} {:<25} {:>10}{}",
            entry.package,
            specifier,
            installed,
            format_size(entry.size),
            staleness(entry, &index)
                .map(|s| format!("  [{}]", s.describe()))
                .unwrap_or_default()
        );
    }
    let total: u64 = entries.iter().map(|e| e.size).sum();
    println!("\nTotal: {} working directories ({})", entries.len(), format_size(total));
    Ok(())
}

fn execute_clean(config: &Config, out: &OutputConfig, args: CleanArgs) -> Result<()> {
    if !args.all && !args.invalid {
        bail!("Specify what to clean: --all or --invalid");
    }

    let entries = list_entries(config.temp_dir())?;
    let index = discover_overrides(config)?;
    let doomed: Vec<&CacheEntry> = entries
        .iter()
        .filter(|e| args.all || staleness(e, &index).is_some())
        .collect();

    if doomed.is_empty() {
        println!("Nothing to clean.");
        return Ok(());
    }

    println!("Working directories to be deleted:\n");
    for entry in &doomed {
        println!("  {} ({})", entry.package, format_size(entry.size));
    }
    let total: u64 = doomed.iter().map(|e| e.size).sum();
    println!("\nTotal: {} entries ({})", doomed.len(), format_size(total));

    if args.dry_run {
        println!("\n{} Dry run mode - no changes were made.", emoji(out, "🔎", "[DRY RUN]"));
        return Ok(());
    }

    if !args.yes {
        print!("\nDelete these working directories? (y/N): ");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !matches!(input.trim().to_lowercase().as_str(), "y" | "yes") {
            println!("Clean cancelled.");
            return Ok(());
        }
    }

    let mut failed = 0;
    for entry in &doomed {
        if let Err(e) = fs::remove_dir_all(&entry.path) {
            failed += 1;
            eprintln!(
                "  {} Failed to delete {}: {}",
                emoji(out, "❌", "[ERR]"),
                entry.path.display(),
                e
            );
        }
    }
    println!(
        "\n{} Deleted {} working directories.",
        emoji(out, "✅", "[OK]"),
        doomed.len() - failed
    );
    if failed > 0 {
        bail!("Failed to delete {} working directories", failed);
    }
    Ok(())
}

fn staleness(entry: &CacheEntry, index: &OverrideIndex) -> Option<Staleness> {
    let Some(marker) = &entry.marker else {
        return Some(Staleness::NoMarker);
    };
    let Some(package) = index.get(&entry.package) else {
        return Some(Staleness::NoOverride);
    };
    match hash_override_dir(&package.directory) {
        Ok(hash) if hash == marker.override_hash => None,
        _ => Some(Staleness::OverrideChanged),
    }
}

/// Human-readable byte count.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
