//! # Overlay
//!
//! Applying an override on top of an installed package has two halves:
//!
//! 1. **Files**: everything in the override directory is copied over the
//!    installed package, except the override's own `package.json`,
//!    `.DS_Store` files and any `node_modules` directory.
//! 2. **Manifest fields**: `exports`, `main`, `module`, `types` and
//!    `dependencies` from the override manifest replace the installed
//!    manifest's values wholesale.
//!
//! `exports` in particular is never deep-merged. Conditional exports
//! (`{"import": ..., "require": ...}`) and subpath exports
//! (`{".": ..., "./foo": ...}`) cannot be combined key by key without
//! producing a map node rejects, so the override's value wins as a whole.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde_json::{Map, Value as JsonValue};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::hash::is_overlay_excluded;
use crate::package_json::{EditablePackageJson, FieldUpdate};
use crate::registry::OverrideIndex;

/// Manifest fields copied from the override onto the installed package.
pub const MERGED_FIELDS: &[&str] = &["exports", "main", "module", "types", "dependencies"];

/// What an overlay changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlaySummary {
    pub files_copied: usize,
    pub fields_replaced: Vec<String>,
    /// Dependencies declared by the override that the original package did
    /// not have, as `name -> range`.
    pub new_dependencies: BTreeMap<String, String>,
}

/// Copies override files onto `target_dir`. Returns the number of files
/// written.
pub fn copy_override_files(override_dir: &Path, target_dir: &Path) -> Result<usize> {
    let walker = WalkDir::new(override_dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| !is_overlay_excluded(&entry.file_name().to_string_lossy()));

    let mut copied = 0;
    for entry in walker {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(override_dir)
            .unwrap_or(entry.path());
        if relative == Path::new("package.json") {
            continue;
        }

        let destination = target_dir.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &destination)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Replaces [`MERGED_FIELDS`] present in `override_manifest` on `target`.
/// Returns the names of the fields that were set.
pub fn merge_manifest_fields(
    target: &mut EditablePackageJson,
    override_manifest: &Map<String, JsonValue>,
) -> Vec<String> {
    let updates: Vec<(String, FieldUpdate)> = MERGED_FIELDS
        .iter()
        .filter_map(|field| {
            override_manifest
                .get(*field)
                .map(|value| (field.to_string(), FieldUpdate::Set(value.clone())))
        })
        .collect();
    let fields = updates.iter().map(|(name, _)| name.clone()).collect();
    target.update(updates);
    fields
}

/// Overlays `override_dir` onto the installed package in `package_dir`.
pub fn apply_overlay(override_dir: &Path, package_dir: &Path) -> Result<OverlaySummary> {
    let installed_path = package_dir.join("package.json");
    let mut installed = EditablePackageJson::load(&installed_path)?;
    let original_dependencies = string_map(installed.get("dependencies"));

    let override_manifest = EditablePackageJson::load(&override_dir.join("package.json"))?;
    let override_dependencies = string_map(override_manifest.get("dependencies"));

    let new_dependencies = override_dependencies
        .into_iter()
        .filter(|(name, _)| !original_dependencies.contains_key(name))
        .collect();

    let fields_replaced = merge_manifest_fields(&mut installed, override_manifest.content());
    installed.save()?;

    let files_copied = copy_override_files(override_dir, package_dir).map_err(|e| Error::Overlay {
        package: package_dir.display().to_string(),
        message: e.to_string(),
    })?;

    debug!(
        "Overlaid {} files and fields {:?} onto {}",
        files_copied,
        fields_replaced,
        package_dir.display()
    );

    Ok(OverlaySummary {
        files_copied,
        fields_replaced,
        new_dependencies,
    })
}

/// Applies overrides to every package under `working_dir/node_modules` that
/// has one, except `skip` (the package the working directory was built
/// for). Returns the package directories that were overlaid.
pub fn apply_nested_overlays(
    working_dir: &Path,
    index: &OverrideIndex,
    skip: &Path,
) -> Result<Vec<PathBuf>> {
    let node_modules = working_dir.join("node_modules");
    if !node_modules.is_dir() {
        return Ok(Vec::new());
    }

    let mut candidates = Vec::new();
    for entry in WalkDir::new(&node_modules)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".bin")
    {
        let entry = entry?;
        if !entry.file_type().is_dir() || entry.path() == skip || !is_package_root(entry.path()) {
            continue;
        }
        candidates.push(entry.into_path());
    }

    let mut overlaid = Vec::new();
    for package_dir in candidates {
        let manifest_path = package_dir.join("package.json");
        let Ok(text) = fs::read_to_string(&manifest_path) else {
            continue;
        };
        let name = serde_json::from_str::<JsonValue>(&text)
            .ok()
            .and_then(|v| v.get("name").and_then(JsonValue::as_str).map(str::to_string));
        let Some(override_package) = name.as_deref().and_then(|n| index.get(n)) else {
            continue;
        };

        debug!(
            "Applying nested override {} at {}",
            override_package.original_name,
            package_dir.display()
        );
        apply_overlay(&override_package.directory, &package_dir)?;
        overlaid.push(package_dir);
    }
    Ok(overlaid)
}

/// `node_modules/<name>` or `node_modules/@scope/<name>`.
fn is_package_root(dir: &Path) -> bool {
    let Some(parent) = dir.parent() else {
        return false;
    };
    if parent.file_name().is_some_and(|n| n == "node_modules") {
        return !dir
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with('@'));
    }
    parent
        .file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with('@'))
        && parent
            .parent()
            .and_then(Path::file_name)
            .is_some_and(|n| n == "node_modules")
}

fn string_map(value: Option<&JsonValue>) -> BTreeMap<String, String> {
    value
        .and_then(JsonValue::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::OverridePackage;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_json(path: &Path, value: JsonValue) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
    }

    fn override_dir(root: &Path) -> PathBuf {
        let dir = root.join("override");
        write_json(
            &dir.join("package.json"),
            json!({
                "name": "@socketregistry/is-regex",
                "version": "1.0.7",
                "exports": { ".": "./index.js" },
                "main": "./index.js",
                "dependencies": { "call-bind": "^1.0.7", "@socketregistry/tiny": "^1.0.0" }
            }),
        );
        fs::write(dir.join("index.js"), "module.exports = require('./lib')\n").unwrap();
        fs::create_dir_all(dir.join("lib")).unwrap();
        fs::write(dir.join("lib/index.js"), "module.exports = () => true\n").unwrap();
        fs::write(dir.join(".DS_Store"), "junk").unwrap();
        fs::create_dir_all(dir.join("node_modules/dep")).unwrap();
        fs::write(dir.join("node_modules/dep/index.js"), "x").unwrap();
        dir
    }

    fn installed_dir(root: &Path) -> PathBuf {
        let dir = root.join("work/node_modules/is-regex");
        write_json(
            &dir.join("package.json"),
            json!({
                "name": "is-regex",
                "version": "1.1.4",
                "exports": {
                    ".": { "import": "./index.mjs", "require": "./index.js" },
                    "./package.json": "./package.json"
                },
                "scripts": { "test": "tape test" },
                "dependencies": { "call-bind": "^1.0.2", "has-tostringtag": "^1.0.0" }
            }),
        );
        fs::write(dir.join("index.js"), "original\n").unwrap();
        dir
    }

    #[test]
    fn test_copy_excludes_manifest_and_junk() {
        let temp = TempDir::new().unwrap();
        let source = override_dir(temp.path());
        let target = temp.path().join("target");

        let copied = copy_override_files(&source, &target).unwrap();

        assert_eq!(copied, 2);
        assert!(target.join("index.js").is_file());
        assert!(target.join("lib/index.js").is_file());
        assert!(!target.join("package.json").exists());
        assert!(!target.join(".DS_Store").exists());
        assert!(!target.join("node_modules").exists());
    }

    #[test]
    fn test_exports_are_replaced_not_merged() {
        let temp = TempDir::new().unwrap();
        let source = override_dir(temp.path());
        let package = installed_dir(temp.path());

        let summary = apply_overlay(&source, &package).unwrap();

        let merged: JsonValue =
            serde_json::from_str(&fs::read_to_string(package.join("package.json")).unwrap())
                .unwrap();
        assert_eq!(merged["exports"], json!({ ".": "./index.js" }));
        assert_eq!(merged["main"], "./index.js");
        assert_eq!(
            merged["dependencies"],
            json!({ "call-bind": "^1.0.7", "@socketregistry/tiny": "^1.0.0" })
        );
        // Fields outside the merge list are untouched.
        assert_eq!(merged["name"], "is-regex");
        assert_eq!(merged["scripts"]["test"], "tape test");
        assert_eq!(
            fs::read_to_string(package.join("index.js")).unwrap(),
            "module.exports = require('./lib')\n"
        );
        assert_eq!(
            summary.fields_replaced,
            vec!["exports", "main", "dependencies"]
        );
    }

    #[test]
    fn test_new_dependencies_are_reported() {
        let temp = TempDir::new().unwrap();
        let source = override_dir(temp.path());
        let package = installed_dir(temp.path());

        let summary = apply_overlay(&source, &package).unwrap();
        assert_eq!(
            summary.new_dependencies,
            BTreeMap::from([("@socketregistry/tiny".to_string(), "^1.0.0".to_string())])
        );
    }

    #[test]
    fn test_missing_installed_manifest_is_error() {
        let temp = TempDir::new().unwrap();
        let source = override_dir(temp.path());
        let empty = temp.path().join("empty");
        fs::create_dir_all(&empty).unwrap();
        assert!(apply_overlay(&source, &empty).is_err());
    }

    #[test]
    fn test_nested_overlays() {
        let temp = TempDir::new().unwrap();
        let source = override_dir(temp.path());
        let work = temp.path().join("work");
        let root_pkg = installed_dir(temp.path());

        // A transitive copy of is-regex nested under another dependency, and
        // a scoped package without an override.
        let nested = work.join("node_modules/foo/node_modules/is-regex");
        write_json(
            &nested.join("package.json"),
            json!({ "name": "is-regex", "version": "1.0.0" }),
        );
        write_json(
            &work.join("node_modules/@scope/bar/package.json"),
            json!({ "name": "@scope/bar" }),
        );
        write_json(
            &work.join("node_modules/foo/package.json"),
            json!({ "name": "foo" }),
        );

        let index = OverrideIndex::from_packages(
            temp.path(),
            [OverridePackage {
                original_name: "is-regex".to_string(),
                override_name: "@socketregistry/is-regex".to_string(),
                directory: source,
            }],
        );

        let overlaid = apply_nested_overlays(&work, &index, &root_pkg).unwrap();
        assert_eq!(overlaid, vec![nested.clone()]);
        assert!(nested.join("lib/index.js").is_file());
        // The root package is handled by the caller and left alone here.
        assert!(!root_pkg.join("lib").exists());
    }

    #[test]
    fn test_is_package_root() {
        assert!(is_package_root(Path::new("/w/node_modules/foo")));
        assert!(is_package_root(Path::new("/w/node_modules/@s/foo")));
        assert!(!is_package_root(Path::new("/w/node_modules/@s")));
        assert!(!is_package_root(Path::new("/w/node_modules/foo/lib")));
    }
}
