//! # Versioning and Publishing
//!
//! Bumps override package versions and decides which overrides need to be
//! published.
//!
//! ## Publish planning
//!
//! For each override the local `package.json` version is compared with the
//! newest version the registry knows about:
//!
//! - **Publish**: the local version is newer, or the package was never
//!   published.
//! - **UpToDate**: the versions are equal.
//! - **Behind**: the registry has a newer version than the local tree. This
//!   usually means someone published from another branch; it is reported
//!   and never published over.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, info, warn};
use semver::Version;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::manifest::RegistryClient;
use crate::package_json::{read_package_json, EditablePackageJson, FieldUpdate};
use crate::package_manager::PackageManager;
use crate::registry::OverridePackage;
use crate::retry::RetryPolicy;

/// Which part of the version to increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BumpLevel {
    Patch,
    Minor,
    Major,
}

impl BumpLevel {
    /// The next version. Pre-release and build metadata are dropped.
    pub fn apply(&self, current: &Version) -> Version {
        match self {
            BumpLevel::Patch if !current.pre.is_empty() => {
                Version::new(current.major, current.minor, current.patch)
            }
            BumpLevel::Patch => Version::new(current.major, current.minor, current.patch + 1),
            BumpLevel::Minor => Version::new(current.major, current.minor + 1, 0),
            BumpLevel::Major => Version::new(current.major + 1, 0, 0),
        }
    }
}

impl FromStr for BumpLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "patch" => Ok(BumpLevel::Patch),
            "minor" => Ok(BumpLevel::Minor),
            "major" => Ok(BumpLevel::Major),
            other => Err(Error::Config {
                message: format!("unknown bump level '{}'", other),
                hint: Some("use patch, minor or major".to_string()),
            }),
        }
    }
}

/// A version written by [`bump_package`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionChange {
    pub package: String,
    pub from: Version,
    pub to: Version,
}

fn local_version(manifest_path: &Path, version: Option<&str>) -> Result<Version> {
    let version = version.ok_or_else(|| Error::ManifestInvalid {
        path: manifest_path.to_path_buf(),
        message: "missing \"version\"".to_string(),
    })?;
    Ok(Version::parse(version)?)
}

/// Bumps the `version` in `package_dir/package.json`, keeping everything
/// else in the file as it was.
pub fn bump_package(package_dir: &Path, level: BumpLevel) -> Result<VersionChange> {
    let path = package_dir.join("package.json");
    let mut manifest = EditablePackageJson::load(&path)?;
    let current = manifest.to_package_json()?;

    let from = local_version(&path, current.version.as_deref())?;
    let to = level.apply(&from);
    manifest.update([("version", FieldUpdate::Set(JsonValue::String(to.to_string())))]);
    manifest.save()?;

    let package = current
        .name
        .unwrap_or_else(|| package_dir.display().to_string());
    debug!("{}: {} -> {}", package, from, to);
    Ok(VersionChange { package, from, to })
}

/// What to do with one override at publish time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishAction {
    Publish,
    UpToDate,
    Behind,
}

impl fmt::Display for PublishAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishAction::Publish => f.write_str("publish"),
            PublishAction::UpToDate => f.write_str("up to date"),
            PublishAction::Behind => f.write_str("behind registry"),
        }
    }
}

/// Publish decision for one override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPlan {
    pub package: String,
    pub directory: PathBuf,
    pub local: Version,
    pub published: Option<Version>,
    pub action: PublishAction,
}

/// Compares a local version with the registry's.
pub fn publish_action(local: &Version, published: Option<&Version>) -> PublishAction {
    match published.map(|p| local.cmp(p)) {
        None | Some(Ordering::Greater) => PublishAction::Publish,
        Some(Ordering::Equal) => PublishAction::UpToDate,
        Some(Ordering::Less) => PublishAction::Behind,
    }
}

/// Plans a publish for each override.
///
/// A registry answer of "not found" means the package was never published.
/// Any other registry error is returned, since guessing would risk
/// republishing.
pub fn plan_publish(
    packages: &[&OverridePackage],
    client: &dyn RegistryClient,
) -> Result<Vec<PublishPlan>> {
    let mut plans = Vec::with_capacity(packages.len());
    for package in packages {
        let path = package.directory.join("package.json");
        let manifest = read_package_json(&path)?;
        let local = local_version(&path, manifest.version.as_deref())?;

        let published = match client.metadata(&package.override_name) {
            Ok(metadata) => metadata
                .version
                .as_deref()
                .map(Version::parse)
                .transpose()?,
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let action = publish_action(&local, published.as_ref());
        if action == PublishAction::Behind {
            warn!(
                "{}: local {} is behind published {}",
                package.override_name,
                local,
                published.as_ref().map(Version::to_string).unwrap_or_default()
            );
        }
        plans.push(PublishPlan {
            package: package.override_name.clone(),
            directory: package.directory.clone(),
            local,
            published,
            action,
        });
    }
    plans.sort_by(|a, b| a.package.cmp(&b.package));
    Ok(plans)
}

/// Publishes every plan marked [`PublishAction::Publish`]. Returns the
/// per-package outcome; one failed publish does not stop the others.
pub fn publish_planned(
    plans: &[PublishPlan],
    package_manager: &dyn PackageManager,
    retry: &RetryPolicy,
    dry_run: bool,
) -> Vec<(String, Result<()>)> {
    plans
        .iter()
        .filter(|plan| plan.action == PublishAction::Publish)
        .map(|plan| {
            info!("Publishing {}@{}", plan.package, plan.local);
            let outcome = retry.run(&format!("publish {}", plan.package), |_| {
                package_manager.publish(&plan.directory, dry_run)
            });
            (plan.package.clone(), outcome)
        })
        .collect()
}
