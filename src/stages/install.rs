//! # Install Stage
//!
//! Builds an isolated working directory per package and leaves it ready for
//! the test stage.
//!
//! ## Per-package flow
//!
//! ```text
//! Pending ──► Cached ─────────────────────────────────────────────► Done
//!    │
//!    └──► Installing ──► Overlaying ──► DependencyResolving ──► Done
//!              │              │                 │
//!              └──────────────┴─────────────────┴──► Failed
//! ```
//!
//! - **Cached**: the marker matches the current version specifier and
//!   override hash. Override files are re-applied (cheap, and keeps the
//!   sandbox honest) but the package manager is not invoked.
//! - **Installing**: the working directory is recreated with a one-line
//!   manifest depending on the original package, and the package manager
//!   installs it. Transient registry failures are retried with backoff.
//! - **Overlaying**: override files and manifest fields are applied onto
//!   `node_modules/<package>`.
//! - **DependencyResolving**: dependencies the override introduced are
//!   added, upstream sources are fetched when the package ships no tests,
//!   dev dependencies are installed, and overrides are applied to nested
//!   copies of other overridden packages.
//!
//! Every failure is confined to its package and reported as the `reason` of
//! its [`InstallResult`].

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde_json::{json, Map};

use super::{
    DownloadResult, InstallResult, PackageFailure, StageOptions, REASON_ABORTED,
};
use crate::cache::{installed_package_dir, working_dir_for, CacheMarker};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::git::SourceFetcher;
use crate::hash::hash_override_dir;
use crate::overlay::{apply_nested_overlays, apply_overlay};
use crate::package_json::{read_package_json, EditablePackageJson};
use crate::package_manager::PackageManager;
use crate::registry::{dir_name_for, OverrideIndex, PackageRecord};
use crate::retry::RetryPolicy;
use crate::runner::run_bounded;

/// Checkout directory for upstream sources, relative to the working dir.
pub const SOURCE_DIR_NAME: &str = "source";

/// Where a package is in its install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Pending,
    Cached,
    Installing,
    Overlaying,
    DependencyResolving,
    Done,
    Failed,
}

/// A finished install.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Installed {
    test_dir: PathBuf,
    cached: bool,
}

/// Runs the install stage.
pub struct Installer<'a> {
    config: &'a Config,
    package_manager: &'a dyn PackageManager,
    sources: &'a dyn SourceFetcher,
    index: &'a OverrideIndex,
    retry: RetryPolicy,
    fresh: bool,
}

impl<'a> Installer<'a> {
    pub fn new(
        config: &'a Config,
        package_manager: &'a dyn PackageManager,
        sources: &'a dyn SourceFetcher,
        index: &'a OverrideIndex,
    ) -> Self {
        Self {
            config,
            package_manager,
            sources,
            index,
            retry: RetryPolicy::default(),
            fresh: false,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Ignore existing markers and reinstall everything.
    pub fn with_fresh_installs(mut self, fresh: bool) -> Self {
        self.fresh = fresh;
        self
    }

    /// Installs every package that passed the download stage.
    ///
    /// Packages that failed earlier are carried over with their original
    /// reason and never dispatched.
    pub fn install_all(
        &self,
        downloads: &[DownloadResult],
        opts: StageOptions<'_>,
    ) -> Result<Vec<InstallResult>> {
        fs::create_dir_all(self.config.temp_dir())?;

        let ready: Vec<&PackageRecord> = downloads
            .iter()
            .filter(|d| d.downloaded)
            .map(|d| &d.package)
            .collect();

        let report = run_bounded(&ready, opts.concurrency, opts.signal, |record| {
            let result = self.install_one(record);
            opts.tick(&record.original_name);
            result
        })?;

        let mut results = report.results;
        let started: HashSet<String> = results
            .iter()
            .map(|r| r.package.original_name.clone())
            .collect();

        for download in downloads {
            if !download.downloaded {
                let reason = download.reason.clone().unwrap_or_default();
                results.push(InstallResult::failed(download.package.clone(), reason));
            } else if !started.contains(&download.package.original_name) {
                results.push(InstallResult::failed(
                    download.package.clone(),
                    REASON_ABORTED,
                ));
            }
        }
        results.sort_by(|a, b| a.package.original_name.cmp(&b.package.original_name));

        let installed = results.iter().filter(|r| r.installed).count();
        let cached = results.iter().filter(|r| r.cached).count();
        info!(
            "Installed {} of {} packages ({} from cache)",
            installed,
            results.len(),
            cached
        );
        Ok(results)
    }

    /// Installs one package. Never fails: errors become the result's reason.
    pub fn install_one(&self, record: &PackageRecord) -> InstallResult {
        match self.try_install(record) {
            Ok(installed) => {
                self.transition(record, InstallState::Done);
                InstallResult::installed(record.clone(), installed.test_dir, installed.cached)
            }
            Err(failure) => {
                self.transition(record, InstallState::Failed);
                warn!("{}: {}", record.original_name, failure);
                InstallResult::failed(record.clone(), failure.reason)
            }
        }
    }

    fn transition(&self, record: &PackageRecord, state: InstallState) {
        debug!("{}: {:?}", record.original_name, state);
    }

    fn try_install(&self, record: &PackageRecord) -> std::result::Result<Installed, PackageFailure> {
        self.transition(record, InstallState::Pending);

        let working_dir = working_dir_for(self.config.temp_dir(), &record.original_name);
        let package_dir = installed_package_dir(&working_dir, &record.original_name);
        let override_hash = hash_override_dir(&record.override_directory)?;

        if !self.fresh {
            if let Some(installed) =
                self.try_cached(record, &working_dir, &package_dir, &override_hash)?
            {
                return Ok(installed);
            }
        }

        self.transition(record, InstallState::Installing);
        self.install_original(record, &working_dir)?;
        if !package_dir.join("package.json").is_file() {
            return Err(PackageFailure::new(format!(
                "{} did not install {}",
                self.package_manager.name(),
                record.original_name
            )));
        }

        self.transition(record, InstallState::Overlaying);
        let summary = apply_overlay(&record.override_directory, &package_dir)?;

        self.transition(record, InstallState::DependencyResolving);
        if !summary.new_dependencies.is_empty() {
            let specs: Vec<String> = summary
                .new_dependencies
                .iter()
                .map(|(name, range)| format!("{}@{}", name, range))
                .collect();
            self.retry.run(&format!("add {}", specs.join(" ")), |_| {
                self.package_manager.add(&working_dir, &specs, false)
            })?;
        }

        let source_dir = self.prepare_sources(record, &working_dir, &package_dir);
        let test_dir = source_dir.clone().unwrap_or_else(|| package_dir.clone());
        self.install_dev_dependencies(record, &test_dir)?;
        apply_nested_overlays(&working_dir, self.index, &package_dir)?;

        CacheMarker::new(&record.version_specifier, override_hash)
            .with_source_directory(source_dir.map(|_| SOURCE_DIR_NAME.to_string()))
            .write(&working_dir)?;

        Ok(Installed {
            test_dir,
            cached: false,
        })
    }

    /// Reuses a valid cached working directory.
    fn try_cached(
        &self,
        record: &PackageRecord,
        working_dir: &Path,
        package_dir: &Path,
        override_hash: &str,
    ) -> Result<Option<Installed>> {
        let marker = match CacheMarker::read(working_dir) {
            Ok(Some(marker)) => marker,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!("{}: {}; reinstalling", record.original_name, e);
                return Ok(None);
            }
        };

        let validity = marker.validate(
            working_dir,
            package_dir,
            &record.version_specifier,
            override_hash,
        );
        if !validity.is_valid() {
            debug!(
                "{}: cache invalid ({:?}); reinstalling",
                record.original_name, validity
            );
            return Ok(None);
        }

        self.transition(record, InstallState::Cached);
        apply_overlay(&record.override_directory, package_dir)?;
        let source_dir = marker.source_path(working_dir);
        if let Some(source) = &source_dir {
            apply_overlay(&record.override_directory, source)?;
        }
        apply_nested_overlays(working_dir, self.index, package_dir)?;

        Ok(Some(Installed {
            test_dir: source_dir.unwrap_or_else(|| package_dir.to_path_buf()),
            cached: true,
        }))
    }

    /// Recreates `working_dir` and installs the original package into it.
    fn install_original(&self, record: &PackageRecord, working_dir: &Path) -> Result<()> {
        if working_dir.exists() {
            fs::remove_dir_all(working_dir)?;
        }
        fs::create_dir_all(working_dir)?;

        let mut dependencies = Map::new();
        dependencies.insert(
            record.original_name.clone(),
            json!(record.version_specifier),
        );
        let mut manifest = Map::new();
        manifest.insert(
            "name".to_string(),
            json!(format!("socket-test-{}", dir_name_for(&record.original_name))),
        );
        manifest.insert("private".to_string(), json!(true));
        manifest.insert("dependencies".to_string(), dependencies.into());
        EditablePackageJson::create(&working_dir.join("package.json"), manifest).save()?;

        self.retry
            .run(&format!("install {}", record.original_name), |_| {
                self.package_manager.install(working_dir)
            })
    }

    /// Fetches upstream sources when the published package has no test
    /// script. Returns the checkout directory, overlaid, or `None` to test
    /// the installed package as-is.
    fn prepare_sources(
        &self,
        record: &PackageRecord,
        working_dir: &Path,
        package_dir: &Path,
    ) -> Option<PathBuf> {
        let manifest = read_package_json(&package_dir.join("package.json")).ok()?;
        if manifest.test_script().is_some() {
            return None;
        }
        let repository = manifest.repository_url()?;
        let version = manifest.version.as_deref()?;

        let source_dir = working_dir.join(SOURCE_DIR_NAME);
        let fetched = self
            .sources
            .fetch(repository, version, &source_dir)
            .and_then(|()| {
                if source_dir.join("package.json").is_file() {
                    Ok(())
                } else {
                    Err(Error::ManifestInvalid {
                        path: source_dir.join("package.json"),
                        message: "upstream checkout has no package.json".to_string(),
                    })
                }
            })
            .and_then(|()| apply_overlay(&record.override_directory, &source_dir));

        match fetched {
            Ok(_) => Some(source_dir),
            Err(e) => {
                warn!(
                    "{}: could not use upstream sources: {}",
                    record.original_name, e
                );
                if source_dir.exists() {
                    if let Err(e) = fs::remove_dir_all(&source_dir) {
                        warn!("{}: {}", source_dir.display(), e);
                    }
                }
                None
            }
        }
    }

    fn install_dev_dependencies(&self, record: &PackageRecord, test_dir: &Path) -> Result<()> {
        let manifest = read_package_json(&test_dir.join("package.json"))?;
        if manifest.dev_dependencies.is_empty() {
            return Ok(());
        }
        self.retry.run(
            &format!("install devDependencies of {}", record.original_name),
            |_| self.package_manager.install(test_dir),
        )
    }
}
