//! Shared test utilities for integration and E2E tests.
//!
//! This module provides a workspace fixture, a fake package manager and a
//! few helpers to reduce duplication across test files.
//!
//! ## Usage
//!
//! Add `mod common;` to your test file, then use the helpers:
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     let fixture = TestFixture::new()
//!         .with_override("is-regex", r#"{"name":"@socketregistry/is-regex"}"#)
//!         .with_reference(&[("is-regex", "1.1.4")]);
//!     // ... test code
//! }
//! ```

#![allow(dead_code)]

use assert_fs::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use registry_scripts::config::{Config, EnvSettings};
use registry_scripts::error::{Error, Result};
use registry_scripts::package_manager::{CommandOutput, PackageManager};
use serde_json::{json, Value as JsonValue};

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use assert_fs::TempDir;
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::{FakePackageManager, TestFixture};
}

/// A temporary workspace laid out like the override registry:
///
/// ```text
/// pnpm-workspace.yaml
/// packages/npm/<override dirs>
/// test/npm/package.json        (reference devDependencies)
/// tmp/                          (temp dir for working directories)
/// ```
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

impl TestFixture {
    /// Creates an empty workspace with its marker file.
    pub fn new() -> Self {
        let temp_dir = assert_fs::TempDir::new().unwrap();
        temp_dir
            .child("pnpm-workspace.yaml")
            .write_str("packages:\n  - packages/npm/*\n")
            .unwrap();
        Self { temp_dir }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Temp dir passed to the commands with `--temp-dir`.
    pub fn temp_path(&self) -> PathBuf {
        self.path().join("tmp")
    }

    /// Adds an override package directory (`@scope/name` is stored as
    /// `scope__name`).
    pub fn with_override(self, original_name: &str, manifest: &str) -> Self {
        let dir = self.override_dir(original_name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("package.json"), manifest).unwrap();
        self
    }

    /// Adds a file to an existing override package.
    pub fn with_override_file(self, original_name: &str, relative: &str, content: &str) -> Self {
        let path = self.override_dir(original_name).join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
        self
    }

    /// Writes the reference manifest pinning `(name, version)` pairs.
    pub fn with_reference(self, pins: &[(&str, &str)]) -> Self {
        let dev_dependencies: serde_json::Map<String, JsonValue> = pins
            .iter()
            .map(|(name, version)| (name.to_string(), json!(version)))
            .collect();
        self.temp_dir
            .child("test/npm/package.json")
            .write_str(
                &serde_json::to_string_pretty(&json!({
                    "name": "test-npm",
                    "private": true,
                    "devDependencies": dev_dependencies
                }))
                .unwrap(),
            )
            .unwrap();
        self
    }

    pub fn override_dir(&self, original_name: &str) -> PathBuf {
        self.path()
            .join("packages/npm")
            .join(registry_scripts::registry::dir_name_for(original_name))
    }

    /// A library `Config` rooted at this workspace, skipping `skip`.
    pub fn config(&self, skip: &[&str]) -> Config {
        Config::new(self.path(), EnvSettings::default())
            .with_root(self.path())
            .with_temp_dir(self.temp_path())
            .with_skip_set(
                registry_scripts::registry::Ecosystem::Npm,
                skip.iter().copied(),
            )
    }
}

/// Package manager stand-in that "installs" canned packages into
/// `node_modules` and records every call.
///
/// Installed packages get a manifest with conditional `exports`, a `test`
/// script and no dependencies. `run_script` succeeds unless the package
/// name is listed in `failing_tests`.
#[derive(Default)]
pub struct FakePackageManager {
    calls: Mutex<Vec<String>>,
    pub failing_tests: Vec<String>,
}

impl FakePackageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fake whose test script fails for the packages in `names`.
    pub fn with_failing_tests(names: &[&str]) -> Self {
        Self {
            failing_tests: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose text mentions `needle`.
    pub fn calls_mentioning(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }

    pub fn install_calls(&self) -> usize {
        self.calls().iter().filter(|c| c.starts_with("install ")).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl PackageManager for FakePackageManager {
    fn name(&self) -> &str {
        "fake"
    }

    fn install(&self, dir: &Path) -> Result<()> {
        self.record(format!("install {}", dir.display()));
        let manifest: JsonValue =
            serde_json::from_str(&fs::read_to_string(dir.join("package.json"))?)?;
        let Some(deps) = manifest["dependencies"].as_object() else {
            return Ok(());
        };
        for (name, version) in deps {
            let mut pkg = dir.join("node_modules");
            for part in name.split('/') {
                pkg.push(part);
            }
            if pkg.join("package.json").exists() {
                continue;
            }
            fs::create_dir_all(&pkg)?;
            fs::write(
                pkg.join("package.json"),
                serde_json::to_string_pretty(&json!({
                    "name": name,
                    "version": version,
                    "main": "./index.js",
                    "exports": {
                        ".": { "import": "./index.mjs", "require": "./index.js" },
                        "./package.json": "./package.json"
                    },
                    "scripts": { "test": "node test.js" }
                }))?,
            )?;
            fs::write(pkg.join("index.js"), "module.exports = 'original'\n")?;
        }
        Ok(())
    }

    fn add(&self, dir: &Path, specs: &[String], _dev: bool) -> Result<()> {
        self.record(format!("add {} {}", dir.display(), specs.join(" ")));
        Ok(())
    }

    fn run_script(&self, dir: &Path, script: &str) -> Result<CommandOutput> {
        self.record(format!("run {} {}", script, dir.display()));
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let success = !self.failing_tests.contains(&name);
        Ok(CommandOutput {
            success,
            code: Some(if success { 0 } else { 1 }),
            stdout: String::new(),
            stderr: if success {
                String::new()
            } else {
                "AssertionError: not ok".to_string()
            },
        })
    }

    fn view(&self, spec: &str) -> Result<JsonValue> {
        self.record(format!("view {}", spec));
        Err(Error::Registry {
            package: spec.to_string(),
            message: "offline".to_string(),
        })
    }

    fn publish(&self, dir: &Path, _dry_run: bool) -> Result<()> {
        self.record(format!("publish {}", dir.display()));
        Ok(())
    }
}
