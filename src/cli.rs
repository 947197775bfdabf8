//! CLI argument parsing and command dispatch

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::debug;

use registry_scripts::runner::AbortSignal;

use crate::commands::{self, Context};

/// Registry Scripts - Install, test and publish npm package overrides
#[derive(Parser, Debug)]
#[command(name = "registry-scripts")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check which packages have an override and a pinned version
    Download(commands::download::DownloadArgs),

    /// Install original packages and overlay their overrides
    Install(commands::install::InstallArgs),

    /// Run the test suites of installed packages
    Test(commands::test::TestArgs),

    /// Run download, install and test in one go
    Run(commands::run::RunArgs),

    /// Generate the registry manifest.json
    Manifest(commands::manifest::ManifestArgs),

    /// Bump override package versions
    Bump(commands::bump::BumpArgs),

    /// Publish override packages that are ahead of the registry
    Publish(commands::publish::PublishArgs),

    /// Inspect or clean install working directories
    Cache(commands::cache::CacheArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        init_logging(&self.log_level);

        let signal = AbortSignal::new();
        register_abort(&signal);
        let ctx = Context::new(&self.color, signal);

        match self.command {
            Commands::Download(args) => commands::download::execute(args, &ctx),
            Commands::Install(args) => commands::install::execute(args, &ctx),
            Commands::Test(args) => commands::test::execute(args, &ctx),
            Commands::Run(args) => commands::run::execute(args, &ctx),
            Commands::Manifest(args) => commands::manifest::execute(args, &ctx),
            Commands::Bump(args) => commands::bump::execute(args, &ctx),
            Commands::Publish(args) => commands::publish::execute(args, &ctx),
            Commands::Cache(args) => commands::cache::execute(args, &ctx),
        }
    }
}

/// `RUST_LOG` wins over `--log-level` when set.
fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    // A logger may already be installed when embedded in tests.
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .try_init();
}

/// Raise `signal` on SIGINT/SIGTERM so no new packages are dispatched.
#[cfg(unix)]
fn register_abort(signal: &AbortSignal) {
    use signal_hook::consts::signal::{SIGINT, SIGTERM};

    for sig in [SIGINT, SIGTERM] {
        if let Err(e) = signal_hook::flag::register(sig, signal.flag()) {
            debug!("Could not register handler for signal {}: {}", sig, e);
        }
    }
}

#[cfg(not(unix))]
fn register_abort(_signal: &AbortSignal) {
    debug!("Abort on Ctrl-C is not supported on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_stage_flags() {
        let cli = Cli::try_parse_from([
            "registry-scripts",
            "install",
            "--package",
            "is-regex",
            "--package",
            "is-string",
            "--concurrency",
            "4",
            "--force",
        ])
        .unwrap();
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.stage.package, vec!["is-regex", "is-string"]);
                assert_eq!(args.stage.concurrency, Some(4));
                assert!(args.stage.force);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        assert!(Cli::try_parse_from(["registry-scripts", "test", "--concurrency", "0"]).is_err());
    }
}
