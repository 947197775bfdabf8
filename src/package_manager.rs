//! # Package Manager Abstraction
//!
//! All registry and install work is delegated to an external package manager
//! (npm or pnpm). The [`PackageManager`] trait is the seam between the
//! pipeline and that binary: [`CliPackageManager`] shells out to the real
//! tool, while tests substitute an implementation that records calls and
//! fakes the filesystem effects.
//!
//! Implementations do not retry. Retrying transient failures is the caller's
//! decision (see [`crate::retry`]).

use std::fmt;
use std::path::Path;
use std::process::Command;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// Maximum characters of stderr kept in an [`Error::PackageManager`].
const STDERR_LIMIT: usize = 4_000;

/// Which package manager binary to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerKind {
    Npm,
    Pnpm,
}

impl PackageManagerKind {
    pub fn program(&self) -> &'static str {
        match self {
            PackageManagerKind::Npm => "npm",
            PackageManagerKind::Pnpm => "pnpm",
        }
    }

    /// Detects the manager from `npm_config_user_agent` (`"pnpm/9.1.0 ..."`).
    pub fn from_user_agent(user_agent: Option<&str>) -> Option<Self> {
        let agent = user_agent?.split('/').next()?;
        match agent {
            "pnpm" => Some(PackageManagerKind::Pnpm),
            "npm" => Some(PackageManagerKind::Npm),
            _ => None,
        }
    }

    /// Detects the manager from the lockfile present in `root`.
    pub fn from_lockfile(root: &Path) -> Option<Self> {
        if root.join("pnpm-lock.yaml").is_file() {
            Some(PackageManagerKind::Pnpm)
        } else if root.join("package-lock.json").is_file() {
            Some(PackageManagerKind::Npm)
        } else {
            None
        }
    }

    fn install_args(&self) -> Vec<&'static str> {
        match self {
            PackageManagerKind::Npm => vec!["install", "--no-audit", "--no-fund"],
            PackageManagerKind::Pnpm => vec!["install", "--no-frozen-lockfile"],
        }
    }

    fn add_args(&self, dev: bool) -> Vec<&'static str> {
        match (self, dev) {
            (PackageManagerKind::Npm, false) => vec!["install", "--no-audit", "--no-fund"],
            (PackageManagerKind::Npm, true) => {
                vec!["install", "--no-audit", "--no-fund", "--save-dev"]
            }
            (PackageManagerKind::Pnpm, false) => vec!["add"],
            (PackageManagerKind::Pnpm, true) => vec!["add", "--save-dev"],
        }
    }

    fn publish_args(&self, dry_run: bool) -> Vec<&'static str> {
        let mut args = vec!["publish", "--access", "public"];
        if *self == PackageManagerKind::Pnpm {
            args.push("--no-git-checks");
        }
        if dry_run {
            args.push("--dry-run");
        }
        args
    }
}

impl fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// Captured result of a subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Operations the pipeline needs from a package manager.
pub trait PackageManager: Send + Sync {
    /// Name shown in logs and errors.
    fn name(&self) -> &str;

    /// Installs everything declared in `dir/package.json`.
    fn install(&self, dir: &Path) -> Result<()>;

    /// Adds `specs` (`name@range`) to `dir/package.json` and installs them.
    fn add(&self, dir: &Path, specs: &[String], dev: bool) -> Result<()>;

    /// Runs a `package.json` script. A failing script is not an error; only
    /// a failure to spawn is.
    fn run_script(&self, dir: &Path, script: &str) -> Result<CommandOutput>;

    /// Registry metadata for `spec` (`name` or `name@range`).
    fn view(&self, spec: &str) -> Result<JsonValue>;

    /// Publishes the package in `dir`.
    fn publish(&self, dir: &Path, dry_run: bool) -> Result<()>;
}

/// [`PackageManager`] backed by the real `npm`/`pnpm` binary.
#[derive(Debug, Clone, Copy)]
pub struct CliPackageManager {
    kind: PackageManagerKind,
}

impl CliPackageManager {
    pub fn new(kind: PackageManagerKind) -> Self {
        Self { kind }
    }

    fn run(&self, cwd: &Path, args: &[&str]) -> Result<CommandOutput> {
        let program = self.kind.program();
        debug!("{} {} (in {})", program, args.join(" "), cwd.display());

        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .output()
            .map_err(|e| Error::Spawn {
                program: program.to_string(),
                message: e.to_string(),
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn run_checked(&self, cwd: &Path, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(cwd, args)?;
        if output.success {
            return Ok(output);
        }
        Err(Error::PackageManager {
            program: self.kind.program().to_string(),
            command: args.first().copied().unwrap_or_default().to_string(),
            cwd: cwd.to_path_buf(),
            stderr: tail_chars(output.stderr.trim(), STDERR_LIMIT),
        })
    }
}

impl PackageManager for CliPackageManager {
    fn name(&self) -> &str {
        self.kind.program()
    }

    fn install(&self, dir: &Path) -> Result<()> {
        self.run_checked(dir, &self.kind.install_args())?;
        Ok(())
    }

    fn add(&self, dir: &Path, specs: &[String], dev: bool) -> Result<()> {
        if specs.is_empty() {
            return Ok(());
        }
        let mut args = self.kind.add_args(dev);
        args.extend(specs.iter().map(String::as_str));
        self.run_checked(dir, &args)?;
        Ok(())
    }

    fn run_script(&self, dir: &Path, script: &str) -> Result<CommandOutput> {
        self.run(dir, &["run", script])
    }

    fn view(&self, spec: &str) -> Result<JsonValue> {
        let cwd = std::env::temp_dir();
        let output = self.run_checked(&cwd, &["view", spec, "--json"])?;
        let value: JsonValue =
            serde_json::from_str(output.stdout.trim()).map_err(|e| Error::Registry {
                package: spec.to_string(),
                message: format!("unreadable view output: {}", e),
            })?;
        Ok(latest_view_entry(value))
    }

    fn publish(&self, dir: &Path, dry_run: bool) -> Result<()> {
        self.run_checked(dir, &self.kind.publish_args(dry_run))?;
        Ok(())
    }
}

/// `view` with a range returns an array with one entry per matching
/// version, oldest first. Keep the newest.
pub fn latest_view_entry(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Array(mut entries) => entries.pop().unwrap_or(JsonValue::Null),
        other => other,
    }
}

/// Last `limit` characters of `text`, respecting char boundaries.
pub fn tail_chars(text: &str, limit: usize) -> String {
    let count = text.chars().count();
    if count <= limit {
        return text.to_string();
    }
    text.chars().skip(count - limit).collect()
}
