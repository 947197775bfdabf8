//! # Configuration Resolution
//!
//! [`Config`] is built once by the binary and handed to every stage by
//! reference. It holds two kinds of settings:
//!
//! - **Environment settings** ([`EnvSettings`]): read eagerly when the
//!   `Config` is created, so later changes to the process environment have
//!   no effect on a run.
//! - **Derived paths**: the workspace root and everything below it, the
//!   temp/cache directory and the detected package manager. Each is computed
//!   on first access and memoized. [`Config::invalidate`] drops the memoized
//!   values so the next access recomputes them.
//!
//! ## Root discovery
//!
//! The workspace root is the closest ancestor of the start directory that
//! contains `pnpm-workspace.yaml`. When no ancestor has one, the root falls
//! back to this crate's own directory instead of failing.

use std::collections::{BTreeSet, HashMap};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::debug;

use crate::defaults::{
    default_temp_dir, skip_tests_by_ecosystem, CI_CONCURRENCY, LOCAL_CONCURRENCY, WORKSPACE_MARKER,
};
use crate::error::Result;
use crate::package_manager::PackageManagerKind;
use crate::registry::Ecosystem;

/// Settings taken from environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSettings {
    /// `CI` is set to anything other than `""`, `0` or `false`.
    pub ci: bool,
    /// `REGISTRY_TEMP_DIR`
    pub temp_dir: Option<PathBuf>,
    /// `REGISTRY_CONCURRENCY`, ignored unless it parses to a positive number.
    pub concurrency: Option<usize>,
    /// `npm_config_user_agent`, set by npm and pnpm for scripts they run.
    pub user_agent: Option<String>,
}

impl EnvSettings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads settings through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let ci = lookup("CI").is_some_and(|v| !matches!(v.as_str(), "" | "0" | "false"));
        let temp_dir = lookup("REGISTRY_TEMP_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let concurrency = lookup("REGISTRY_CONCURRENCY")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0);
        let user_agent = lookup("npm_config_user_agent").filter(|v| !v.is_empty());

        Self {
            ci,
            temp_dir,
            concurrency,
            user_agent,
        }
    }
}

/// Process-wide configuration, passed by reference to every component.
#[derive(Debug)]
pub struct Config {
    start_dir: PathBuf,
    env: EnvSettings,
    root_override: Option<PathBuf>,
    temp_dir_override: Option<PathBuf>,
    skip_sets: HashMap<Ecosystem, BTreeSet<String>>,
    root: OnceLock<PathBuf>,
    temp_dir: OnceLock<PathBuf>,
    package_manager: OnceLock<PackageManagerKind>,
}

impl Config {
    /// Creates a configuration that discovers the root from `start_dir`.
    pub fn new(start_dir: impl Into<PathBuf>, env: EnvSettings) -> Self {
        Self {
            start_dir: start_dir.into(),
            env,
            root_override: None,
            temp_dir_override: None,
            skip_sets: skip_tests_by_ecosystem(),
            root: OnceLock::new(),
            temp_dir: OnceLock::new(),
            package_manager: OnceLock::new(),
        }
    }

    /// Creates a configuration from the current directory and environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(env::current_dir()?, EnvSettings::from_env()))
    }

    /// Uses `root` as the workspace root instead of discovering it.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root_override = Some(root.into());
        self.root = OnceLock::new();
        self
    }

    /// Uses `temp_dir` instead of the environment or platform default.
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir_override = Some(temp_dir.into());
        self.temp_dir = OnceLock::new();
        self
    }

    /// Replaces the skip set for one ecosystem.
    pub fn with_skip_set<I, S>(mut self, ecosystem: Ecosystem, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_sets
            .insert(ecosystem, names.into_iter().map(Into::into).collect());
        self
    }

    /// Drops every memoized path so the next access recomputes it.
    pub fn invalidate(&mut self) {
        self.root.take();
        self.temp_dir.take();
        self.package_manager.take();
    }

    pub fn env(&self) -> &EnvSettings {
        &self.env
    }

    pub fn is_ci(&self) -> bool {
        self.env.ci
    }

    /// Workspace root.
    pub fn root_path(&self) -> &Path {
        self.root.get_or_init(|| {
            let root = self
                .root_override
                .clone()
                .or_else(|| find_workspace_root(&self.start_dir))
                .unwrap_or_else(fallback_root);
            debug!("Resolved workspace root: {}", root.display());
            root
        })
    }

    /// Directory holding one subdirectory per npm override package.
    pub fn npm_packages_path(&self) -> PathBuf {
        self.root_path().join("packages").join("npm")
    }

    /// Directory of the reference test project.
    pub fn test_npm_path(&self) -> PathBuf {
        self.root_path().join("test").join("npm")
    }

    /// Reference manifest whose `devDependencies` pin the original packages.
    pub fn test_npm_package_json_path(&self) -> PathBuf {
        self.test_npm_path().join("package.json")
    }

    /// Registry manifest written by the `manifest` command.
    pub fn manifest_json_path(&self) -> PathBuf {
        self.root_path().join("manifest.json")
    }

    /// Temp/cache directory holding working directories and stage results.
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.get_or_init(|| {
            self.temp_dir_override
                .clone()
                .or_else(|| self.env.temp_dir.clone())
                .unwrap_or_else(default_temp_dir)
        })
    }

    /// Concurrency used when a command does not pass `--concurrency`.
    pub fn default_concurrency(&self) -> usize {
        self.env.concurrency.unwrap_or(if self.env.ci {
            CI_CONCURRENCY
        } else {
            LOCAL_CONCURRENCY
        })
    }

    /// Package manager used for installs, scripts and registry queries.
    pub fn package_manager(&self) -> PackageManagerKind {
        *self.package_manager.get_or_init(|| {
            PackageManagerKind::from_user_agent(self.env.user_agent.as_deref())
                .or_else(|| PackageManagerKind::from_lockfile(self.root_path()))
                .unwrap_or(PackageManagerKind::Npm)
        })
    }

    /// Packages whose tests are skipped for `ecosystem`.
    pub fn skip_set(&self, ecosystem: Ecosystem) -> Option<&BTreeSet<String>> {
        self.skip_sets.get(&ecosystem)
    }

    pub fn is_skipped(&self, ecosystem: Ecosystem, name: &str) -> bool {
        self.skip_set(ecosystem)
            .is_some_and(|set| set.contains(name))
    }
}

/// Closest ancestor of `start` (inclusive) that contains the workspace marker.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(WORKSPACE_MARKER).is_file())
        .map(Path::to_path_buf)
}

fn fallback_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}
