//! # Pipeline Stages
//!
//! The pipeline runs three stages in a fixed order, each fanning out over
//! its packages through [`crate::runner::run_bounded`]:
//!
//! 1. **Download** ([`download`]): read-only validation that a package has
//!    an override and a pinned version.
//! 2. **Install** ([`install`]): sandboxed install of the original package,
//!    overlay, dependency resolution and caching.
//! 3. **Test** ([`test`]): run the package's test script in its sandbox.
//!
//! Stages communicate only through the records defined here. Between
//! separate processes they are persisted as JSON arrays in the temp dir
//! (`download-results.json`, `install-results.json`).
//!
//! ## Failures
//!
//! A stage function returns `Err(Error)` only for problems that invalidate
//! the whole run. Anything that goes wrong for one package becomes a
//! [`PackageFailure`] and ends up as the `reason` of that package's record.

pub mod download;
pub mod install;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::registry::PackageRecord;
use crate::runner::AbortSignal;

pub const REASON_SKIPPED: &str = "Skipped";
pub const REASON_NO_OVERRIDE: &str = "No override";
pub const REASON_NOT_IN_DEV_DEPENDENCIES: &str = "Not in devDependencies";
pub const REASON_ABORTED: &str = "Aborted";
pub const REASON_NO_TEST_SCRIPT: &str = "No test script";

/// Expected, per-package failure. Never aborts sibling work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFailure {
    pub reason: String,
}

impl PackageFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<Error> for PackageFailure {
    fn from(error: Error) -> Self {
        Self::new(error.to_string())
    }
}

impl fmt::Display for PackageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Whether a failure reason should fail the run. Skip-listed packages are
/// expected and do not.
pub fn is_critical(reason: Option<&str>) -> bool {
    reason.is_some_and(|r| r != REASON_SKIPPED)
}

/// Knobs shared by every stage entry point.
#[derive(Debug, Clone, Copy)]
pub struct StageOptions<'a> {
    pub concurrency: usize,
    pub signal: Option<&'a AbortSignal>,
    pub progress: Option<&'a ProgressBar>,
}

impl<'a> StageOptions<'a> {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            signal: None,
            progress: None,
        }
    }

    pub fn with_signal(mut self, signal: &'a AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_progress(mut self, progress: &'a ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub(crate) fn tick(&self, message: &str) {
        if let Some(progress) = self.progress {
            progress.set_message(message.to_string());
            progress.inc(1);
        }
    }
}

/// Per-package result of the download/validate stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResult {
    pub package: PackageRecord,
    pub downloaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DownloadResult {
    pub fn ok(package: PackageRecord) -> Self {
        Self {
            package,
            downloaded: true,
            reason: None,
        }
    }

    pub fn failed(package: PackageRecord, reason: impl Into<String>) -> Self {
        Self {
            package,
            downloaded: false,
            reason: Some(reason.into()),
        }
    }
}

/// Per-package result of the install stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallResult {
    pub package: PackageRecord,
    pub installed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub cached: bool,
}

impl InstallResult {
    pub fn installed(package: PackageRecord, working_directory: PathBuf, cached: bool) -> Self {
        Self {
            package,
            installed: true,
            working_directory: Some(working_directory),
            reason: None,
            cached,
        }
    }

    pub fn failed(package: PackageRecord, reason: impl Into<String>) -> Self {
        Self {
            package,
            installed: false,
            working_directory: None,
            reason: Some(reason.into()),
            cached: false,
        }
    }
}

/// How a package's test run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestOutcome {
    Passed,
    Failed,
    Skipped,
    NoTestScript,
}

/// Per-package result of the test stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub package: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub outcome: TestOutcome,
}

impl TestResult {
    pub fn passed(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            passed: true,
            reason: None,
            outcome: TestOutcome::Passed,
        }
    }

    pub fn failed(package: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            passed: false,
            reason: Some(reason.into()),
            outcome: TestOutcome::Failed,
        }
    }

    /// Skipped packages count as passed: nothing went wrong.
    pub fn skipped(package: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            passed: true,
            reason: Some(reason.into()),
            outcome: TestOutcome::Skipped,
        }
    }

    pub fn no_test_script(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            passed: true,
            reason: Some(REASON_NO_TEST_SCRIPT.to_string()),
            outcome: TestOutcome::NoTestScript,
        }
    }
}

/// Counts for the end-of-run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// `(package, reason)` for every failure, sorted by package.
    pub failures: Vec<(String, String)>,
}

impl RunSummary {
    pub fn from_tests(results: &[TestResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.outcome {
                TestOutcome::Passed => summary.passed += 1,
                TestOutcome::Skipped | TestOutcome::NoTestScript => summary.skipped += 1,
                TestOutcome::Failed => {
                    summary.failed += 1;
                    summary.failures.push((
                        result.package.clone(),
                        result.reason.clone().unwrap_or_default(),
                    ));
                }
            }
        }
        summary.failures.sort();
        summary
    }

    /// Summary for stages without a pass/skip distinction beyond `reason`.
    pub fn from_reasons<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        let mut summary = Self::default();
        for (package, reason) in results {
            match reason {
                None => summary.passed += 1,
                Some(REASON_SKIPPED) => summary.skipped += 1,
                Some(reason) => {
                    summary.failed += 1;
                    summary
                        .failures
                        .push((package.to_string(), reason.to_string()));
                }
            }
        }
        summary.failures.sort();
        summary
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Writes `results` as a pretty JSON array to `temp_dir/file_name`.
pub fn write_results<T: Serialize>(temp_dir: &Path, file_name: &str, results: &[T]) -> Result<PathBuf> {
    fs::create_dir_all(temp_dir)?;
    let path = temp_dir.join(file_name);
    let mut content = serde_json::to_string_pretty(results)?;
    content.push('\n');
    fs::write(&path, content)?;
    Ok(path)
}

/// Reads a results file written by [`write_results`]. `Ok(None)` when the
/// file does not exist.
pub fn read_results<T: DeserializeOwned>(temp_dir: &Path, file_name: &str) -> Result<Option<Vec<T>>> {
    let path = temp_dir.join(file_name);
    if !path.is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| Error::ManifestParse {
            path,
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::INSTALL_RESULTS_FILE;
    use tempfile::TempDir;

    fn record(name: &str) -> PackageRecord {
        PackageRecord::new(name, format!("@socketregistry/{}", name), "/o", "1.0.0")
    }

    #[test]
    fn test_failure_from_error() {
        let failure: PackageFailure = Error::Cache {
            message: "stale".to_string(),
        }
        .into();
        assert_eq!(failure.reason, "Cache operation error: stale");
    }

    #[test]
    fn test_is_critical() {
        assert!(!is_critical(None));
        assert!(!is_critical(Some(REASON_SKIPPED)));
        assert!(is_critical(Some(REASON_NO_OVERRIDE)));
    }

    #[test]
    fn test_results_round_trip() {
        let temp = TempDir::new().unwrap();
        let results = vec![
            InstallResult::installed(record("a"), PathBuf::from("/t/a"), true),
            InstallResult::failed(record("b"), "npm install failed"),
        ];
        let path = write_results(temp.path(), INSTALL_RESULTS_FILE, &results).unwrap();

        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("\"workingDirectory\": \"/t/a\""));
        assert!(text.contains("\"cached\": true"));

        let loaded: Vec<InstallResult> = read_results(temp.path(), INSTALL_RESULTS_FILE)
            .unwrap()
            .unwrap();
        assert_eq!(loaded, results);
    }

    #[test]
    fn test_read_missing_results() {
        let temp = TempDir::new().unwrap();
        let loaded: Option<Vec<TestResult>> = read_results(temp.path(), "nope.json").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_read_corrupt_results_is_fatal() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(INSTALL_RESULTS_FILE), "{").unwrap();
        let loaded: Result<Option<Vec<InstallResult>>> =
            read_results(temp.path(), INSTALL_RESULTS_FILE);
        assert!(matches!(loaded, Err(Error::ManifestParse { .. })));
    }

    #[test]
    fn test_summary_from_tests() {
        let results = vec![
            TestResult::passed("a"),
            TestResult::failed("c", "boom"),
            TestResult::skipped("b", REASON_SKIPPED),
            TestResult::no_test_script("d"),
            TestResult::failed("a2", "bang"),
        ];
        let summary = RunSummary::from_tests(&results);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.skipped, 2);
        assert_eq!(
            summary.failures,
            vec![
                ("a2".to_string(), "bang".to_string()),
                ("c".to_string(), "boom".to_string())
            ]
        );
        assert!(summary.has_failures());
    }

    #[test]
    fn test_summary_from_reasons() {
        let summary = RunSummary::from_reasons([
            ("a", None),
            ("b", Some(REASON_SKIPPED)),
            ("c", Some(REASON_NO_OVERRIDE)),
        ]);
        assert_eq!((summary.passed, summary.skipped, summary.failed), (1, 1, 1));
    }

    #[test]
    fn test_outcome_serializes_kebab_case() {
        let json = serde_json::to_value(TestResult::no_test_script("x")).unwrap();
        assert_eq!(json["outcome"], "no-test-script");
    }
}
