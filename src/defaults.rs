//! Default values for registry-scripts configuration.
//!
//! This module provides centralized default values used across commands,
//! ensuring consistency and avoiding duplication.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use crate::registry::Ecosystem;

/// File name that marks a workspace root.
pub const WORKSPACE_MARKER: &str = "pnpm-workspace.yaml";

/// Per-package marker written once an install completes.
pub const INSTALL_MARKER: &str = ".socket-install-complete";

/// Results written by the download stage and read by the install stage.
pub const DOWNLOAD_RESULTS_FILE: &str = "download-results.json";

/// Results written by the install stage and read by the test stage.
pub const INSTALL_RESULTS_FILE: &str = "install-results.json";

/// Results written by the test stage.
pub const TEST_RESULTS_FILE: &str = "test-results.json";

/// Concurrency used on developer machines.
pub const LOCAL_CONCURRENCY: usize = 3;

/// Concurrency used when `CI` is set.
pub const CI_CONCURRENCY: usize = 20;

/// Attempts made for a registry install before giving up.
pub const INSTALL_ATTEMPTS: u32 = 3;

/// Delay before the first install retry; doubles on every further attempt.
pub const INSTALL_BASE_DELAY: Duration = Duration::from_secs(1);

/// Number of trailing lines kept from failing test output.
pub const OUTPUT_TAIL_LINES: usize = 20;

/// Maximum characters kept from each failing output stream.
pub const OUTPUT_TAIL_CHARS: usize = 2_000;

/// Returns the default temp/cache directory for working directories and
/// stage results.
///
/// Uses the platform cache directory (`~/.cache/socket-registry` on Linux)
/// and falls back to `.socket-registry-cache` in the current directory if
/// the platform cache directory cannot be determined.
///
/// This can be overridden by the `--temp-dir` CLI flag or the
/// `REGISTRY_TEMP_DIR` environment variable.
pub fn default_temp_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".socket-registry-cache"))
        .join("socket-registry")
}

/// Packages whose upstream test suites cannot run in a sandbox, keyed by
/// ecosystem.
///
/// These are reported as `"Skipped"` by the download stage without touching
/// the filesystem.
pub fn skip_tests_by_ecosystem() -> HashMap<Ecosystem, BTreeSet<String>> {
    let npm = [
        // Tests require a browser environment.
        "date",
        // Tests hit the network.
        "@hyrious/bun.lockb",
        // Test suite depends on a global install of the package.
        "npm",
        // Tests rely on engine internals that differ across Node versions.
        "array-buffer-byte-length",
        "is-boolean-object",
    ]
    .into_iter()
    .map(str::to_string)
    .collect();

    HashMap::from([(Ecosystem::Npm, npm)])
}
