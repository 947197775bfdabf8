//! # Registry Manifest
//!
//! `manifest.json` describes every override package the registry publishes.
//! Each entry combines two sources:
//!
//! - **Local**: the override's `package.json` (`version`, `license`,
//!   `engines`) and its `socket` object (`categories`, `interop`,
//!   `skipTests`).
//! - **Registry**: metadata for the published override, fetched through a
//!   [`RegistryClient`]. It supplies the concrete version when the local one
//!   is missing or `latest`, fills in `license`/`engines` the override does
//!   not declare, and reports deprecation.
//!
//! Entries are keyed by package URL in a `BTreeMap`, so the rendered file is
//! sorted and byte-identical for identical inputs.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::package_json::{read_package_json, report_issues};
use crate::package_manager::PackageManager;
use crate::purl::PackageUrl;
use crate::registry::{OverrideIndex, OverridePackage};
use crate::runner::run_bounded;
use crate::stages::StageOptions;

/// Registry metadata used for manifest entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryMetadata {
    pub version: Option<String>,
    pub license: Option<String>,
    pub engines: BTreeMap<String, String>,
    pub deprecated: Option<String>,
}

impl RegistryMetadata {
    /// Reads the fields of a `view --json` document.
    pub fn from_view(value: &JsonValue) -> Self {
        let text = |key: &str| value.get(key).and_then(JsonValue::as_str).map(str::to_string);
        let engines = value
            .get("engines")
            .and_then(JsonValue::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            version: text("version"),
            license: text("license"),
            engines,
            deprecated: text("deprecated"),
        }
    }
}

/// Source of published package metadata. Allows mocking in tests.
pub trait RegistryClient: Send + Sync {
    /// Metadata for `spec` (`name` or `name@version`).
    fn metadata(&self, spec: &str) -> Result<RegistryMetadata>;
}

/// [`RegistryClient`] that asks the package manager (`<pm> view --json`).
pub struct PackageManagerRegistry<'a> {
    package_manager: &'a dyn PackageManager,
}

impl<'a> PackageManagerRegistry<'a> {
    pub fn new(package_manager: &'a dyn PackageManager) -> Self {
        Self { package_manager }
    }
}

impl RegistryClient for PackageManagerRegistry<'_> {
    fn metadata(&self, spec: &str) -> Result<RegistryMetadata> {
        let value = self.package_manager.view(spec)?;
        Ok(RegistryMetadata::from_view(&value))
    }
}

/// One manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub purl: String,
    /// Original package name.
    pub name: String,
    /// Published override name.
    pub package: String,
    pub version: String,
    pub license: String,
    #[serde(default)]
    pub engines: BTreeMap<String, String>,
    #[serde(default)]
    pub interop: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_tests: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<String>,
}

/// The generated manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistryManifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl RegistryManifest {
    pub fn insert(&mut self, entry: ManifestEntry) {
        self.entries.insert(entry.purl.clone(), entry);
    }

    pub fn get(&self, purl: &str) -> Option<&ManifestEntry> {
        self.entries.get(purl)
    }

    /// Entries in purl order.
    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pretty JSON with a trailing newline, keys in purl order.
    pub fn to_json_string(&self) -> Result<String> {
        let mut content = serde_json::to_string_pretty(self)?;
        content.push('\n');
        Ok(content)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| Error::ManifestParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// Builds the manifest for every override under the configured packages
/// directory.
///
/// Packages whose version cannot be resolved, or whose manifest cannot be
/// read, are left out with a warning. Only failing to scan the packages
/// directory is fatal.
pub fn generate(
    config: &Config,
    client: &dyn RegistryClient,
    opts: StageOptions<'_>,
) -> Result<RegistryManifest> {
    let index = OverrideIndex::discover(&config.npm_packages_path())?;
    let packages: Vec<&OverridePackage> = index.iter().collect();

    let report = run_bounded(&packages, opts.concurrency, opts.signal, |package| {
        let entry = build_entry(package, client);
        opts.tick(&package.original_name);
        (package.original_name.clone(), entry)
    })?;

    let not_started = report.not_started;
    let mut manifest = RegistryManifest::default();
    for (name, entry) in report.results {
        match entry {
            Ok(entry) => manifest.insert(entry),
            Err(e) => warn!("{}: left out of manifest: {}", name, e),
        }
    }
    if not_started > 0 {
        warn!("{} packages were not processed", not_started);
    }

    info!("Generated manifest with {} entries", manifest.len());
    Ok(manifest)
}

/// Combines local and registry metadata for one override.
pub fn build_entry(package: &OverridePackage, client: &dyn RegistryClient) -> Result<ManifestEntry> {
    let manifest_path = package.directory.join("package.json");
    let local = read_package_json(&manifest_path)?;
    report_issues(&manifest_path, &local);
    let socket = local.socket.clone().unwrap_or_default();

    let local_version = local
        .version
        .clone()
        .filter(|v| !v.is_empty() && v != "latest");
    let spec = match &local_version {
        Some(version) => format!("{}@{}", package.override_name, version),
        None => package.override_name.clone(),
    };

    let registry = match client.metadata(&spec) {
        Ok(metadata) => metadata,
        Err(e) if local_version.is_some() => {
            debug!("{}: no registry metadata: {}", spec, e);
            RegistryMetadata::default()
        }
        Err(e) => return Err(e),
    };

    let version = local_version
        .or_else(|| registry.version.clone())
        .ok_or_else(|| Error::Registry {
            package: package.override_name.clone(),
            message: "no version to publish".to_string(),
        })?;

    let engines = if local.engines.is_empty() {
        registry.engines
    } else {
        local.engines
    };

    Ok(ManifestEntry {
        purl: PackageUrl::npm(&package.override_name, &version).to_string(),
        name: package.original_name.clone(),
        package: package.override_name.clone(),
        version,
        license: local
            .license
            .or(registry.license)
            .unwrap_or_else(|| "UNKNOWN".to_string()),
        engines,
        interop: socket.interop.unwrap_or_default(),
        categories: socket.categories,
        skip_tests: socket.skip_tests,
        deprecated: registry.deprecated,
    })
}
