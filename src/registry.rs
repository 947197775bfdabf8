//! # Override Discovery
//!
//! Every override package lives in its own directory under
//! `packages/npm/`. The directory name is the original package name, with
//! scoped names flattened (`@scope/name` is stored as `scope__name`).
//!
//! [`OverrideIndex`] scans that directory once and answers "is there an
//! override for this package, and where?". It is the source of
//! [`PackageRecord`]s for the pipeline and of the nested-overlay lookups in
//! the install stage.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::package_json::{read_package_json, report_issues};

/// Scope prefix used for published override packages.
pub const OVERRIDE_SCOPE: &str = "@socketregistry";

/// Package ecosystems the registry carries overrides for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Npm,
}

impl Ecosystem {
    /// Lowercase name, also the package-URL type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::Npm => "npm",
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One override/original pair to push through the pipeline.
///
/// An empty `version_specifier` means "not resolved yet"; the download stage
/// fills it from the reference manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRecord {
    pub original_name: String,
    pub override_name: String,
    pub override_directory: PathBuf,
    pub version_specifier: String,
}

impl PackageRecord {
    pub fn new(
        original_name: impl Into<String>,
        override_name: impl Into<String>,
        override_directory: impl Into<PathBuf>,
        version_specifier: impl Into<String>,
    ) -> Self {
        Self {
            original_name: original_name.into(),
            override_name: override_name.into(),
            override_directory: override_directory.into(),
            version_specifier: version_specifier.into(),
        }
    }

    /// Returns a copy of this record with the given specifier.
    pub fn with_version_specifier(&self, version_specifier: impl Into<String>) -> Self {
        Self {
            version_specifier: version_specifier.into(),
            ..self.clone()
        }
    }
}

/// Converts an original package name to its override directory name.
pub fn dir_name_for(original_name: &str) -> String {
    match original_name.strip_prefix('@') {
        Some(scoped) => scoped.replacen('/', "__", 1),
        None => original_name.to_string(),
    }
}

/// Converts an override directory name back to the original package name.
pub fn original_name_from_dir(dir_name: &str) -> String {
    match dir_name.split_once("__") {
        Some((scope, name)) => format!("@{}/{}", scope, name),
        None => dir_name.to_string(),
    }
}

/// Name an override is published under when its manifest does not say.
pub fn default_override_name(original_name: &str) -> String {
    format!("{}/{}", OVERRIDE_SCOPE, dir_name_for(original_name))
}

/// A discovered override directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverridePackage {
    pub original_name: String,
    pub override_name: String,
    pub directory: PathBuf,
}

/// All override packages found under the packages directory, keyed by
/// original package name.
#[derive(Debug, Clone, Default)]
pub struct OverrideIndex {
    packages_path: PathBuf,
    entries: BTreeMap<String, OverridePackage>,
}

impl OverrideIndex {
    /// Scans `packages_path` for override directories.
    ///
    /// A missing packages directory yields an empty index. Directories
    /// without a `package.json` are ignored; a `package.json` that cannot be
    /// parsed falls back to the conventional override name with a warning.
    pub fn discover(packages_path: &Path) -> Result<Self> {
        let mut entries = BTreeMap::new();

        if packages_path.is_dir() {
            for entry in fs::read_dir(packages_path)? {
                let entry = entry?;
                let directory = entry.path();
                if !directory.is_dir() {
                    continue;
                }
                let manifest_path = directory.join("package.json");
                if !manifest_path.is_file() {
                    continue;
                }

                let dir_name = entry.file_name().to_string_lossy().into_owned();
                let original_name = original_name_from_dir(&dir_name);
                let override_name = match read_package_json(&manifest_path) {
                    Ok(manifest) => {
                        report_issues(&manifest_path, &manifest);
                        manifest
                            .name
                            .filter(|name| !name.is_empty())
                            .unwrap_or_else(|| default_override_name(&original_name))
                    }
                    Err(e) => {
                        warn!("{}", e);
                        default_override_name(&original_name)
                    }
                };

                entries.insert(
                    original_name.clone(),
                    OverridePackage {
                        original_name,
                        override_name,
                        directory,
                    },
                );
            }
        }

        debug!(
            "Discovered {} override packages in {}",
            entries.len(),
            packages_path.display()
        );

        Ok(Self {
            packages_path: packages_path.to_path_buf(),
            entries,
        })
    }

    /// Builds an index from explicit entries.
    pub fn from_packages(
        packages_path: impl Into<PathBuf>,
        packages: impl IntoIterator<Item = OverridePackage>,
    ) -> Self {
        Self {
            packages_path: packages_path.into(),
            entries: packages
                .into_iter()
                .map(|p| (p.original_name.clone(), p))
                .collect(),
        }
    }

    pub fn get(&self, original_name: &str) -> Option<&OverridePackage> {
        self.entries.get(original_name)
    }

    pub fn contains(&self, original_name: &str) -> bool {
        self.entries.contains_key(original_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OverridePackage> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds unresolved records for the requested packages, or for every
    /// known override when `names` is empty.
    ///
    /// Unknown names still get a record pointing at the directory the
    /// override would live in, so validation can report them.
    pub fn records(&self, names: &[String]) -> Vec<PackageRecord> {
        if names.is_empty() {
            return self
                .iter()
                .map(|p| PackageRecord::new(&p.original_name, &p.override_name, &p.directory, ""))
                .collect();
        }

        names
            .iter()
            .map(|name| match self.get(name) {
                Some(p) => PackageRecord::new(&p.original_name, &p.override_name, &p.directory, ""),
                None => PackageRecord::new(
                    name,
                    default_override_name(name),
                    self.packages_path.join(dir_name_for(name)),
                    "",
                ),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_override(root: &Path, dir: &str, manifest: &str) {
        let path = root.join(dir);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("package.json"), manifest).unwrap();
    }

    #[test]
    fn test_scoped_name_round_trip() {
        assert_eq!(dir_name_for("@hyrious/bun.lockb"), "hyrious__bun.lockb");
        assert_eq!(original_name_from_dir("hyrious__bun.lockb"), "@hyrious/bun.lockb");
        assert_eq!(dir_name_for("is-regex"), "is-regex");
        assert_eq!(original_name_from_dir("is-regex"), "is-regex");
    }

    #[test]
    fn test_default_override_name() {
        assert_eq!(default_override_name("is-regex"), "@socketregistry/is-regex");
        assert_eq!(
            default_override_name("@hyrious/bun.lockb"),
            "@socketregistry/hyrious__bun.lockb"
        );
    }

    #[test]
    fn test_discover_reads_override_names() {
        let temp = TempDir::new().unwrap();
        write_override(temp.path(), "is-regex", r#"{"name":"@socketregistry/is-regex"}"#);
        write_override(temp.path(), "hyrious__bun.lockb", r#"{"version":"1.0.0"}"#);
        fs::create_dir_all(temp.path().join("no-manifest")).unwrap();

        let index = OverrideIndex::discover(temp.path()).unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(
            index.get("is-regex").unwrap().override_name,
            "@socketregistry/is-regex"
        );
        assert_eq!(
            index.get("@hyrious/bun.lockb").unwrap().override_name,
            "@socketregistry/hyrious__bun.lockb"
        );
        assert!(!index.contains("no-manifest"));
    }

    #[test]
    fn test_discover_falls_back_on_blank_or_unparsable_name() {
        let temp = TempDir::new().unwrap();
        write_override(temp.path(), "is-regex", r#"{"name":"","version":"1.0.0"}"#);
        write_override(temp.path(), "date", "{ not json");

        let index = OverrideIndex::discover(temp.path()).unwrap();

        assert_eq!(
            index.get("is-regex").unwrap().override_name,
            "@socketregistry/is-regex"
        );
        assert_eq!(index.get("date").unwrap().override_name, "@socketregistry/date");
    }

    #[test]
    fn test_discover_missing_directory_is_empty() {
        let temp = TempDir::new().unwrap();
        let index = OverrideIndex::discover(&temp.path().join("absent")).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_records_for_unknown_name_point_at_expected_directory() {
        let temp = TempDir::new().unwrap();
        write_override(temp.path(), "is-regex", r#"{"name":"@socketregistry/is-regex"}"#);
        let index = OverrideIndex::discover(temp.path()).unwrap();

        let records = index.records(&["is-regex".to_string(), "left-pad".to_string()]);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].override_directory, temp.path().join("is-regex"));
        assert_eq!(records[1].override_directory, temp.path().join("left-pad"));
        assert!(records.iter().all(|r| r.version_specifier.is_empty()));
    }

    #[test]
    fn test_records_default_to_all_overrides() {
        let temp = TempDir::new().unwrap();
        write_override(temp.path(), "a", r#"{"name":"@socketregistry/a"}"#);
        write_override(temp.path(), "b", r#"{"name":"@socketregistry/b"}"#);
        let index = OverrideIndex::discover(temp.path()).unwrap();

        let names: Vec<_> = index
            .records(&[])
            .into_iter()
            .map(|r| r.original_name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = PackageRecord::new("a", "@socketregistry/a", "/x/a", "1.0.0");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["originalName"], "a");
        assert_eq!(json["versionSpecifier"], "1.0.0");
    }
}
