//! # Error Handling
//!
//! This module defines the fatal error type for the `registry-scripts`
//! library. It uses `thiserror` to build a single `Error` enum covering every
//! failure that can abort a run or a single pipeline step.
//!
//! ## Fatal versus per-package failures
//!
//! Two kinds of failure flow through the pipeline:
//!
//! - **`Error`**: returned with `?` from library functions. When it escapes a
//!   stage entry point (for example the reference manifest cannot be parsed)
//!   the whole run stops with a non-zero exit code.
//! - **`PackageFailure`** (see [`crate::stages`]): an expected, per-package
//!   outcome such as a missing override or a failed install. Stage workers
//!   convert any `Error` raised while handling one package into a
//!   `PackageFailure`, so sibling packages keep running.
//!
//! [`Error::is_transient`] separates network-flavoured package manager
//! failures, which the install stage retries, from everything else.

use std::path::PathBuf;

use thiserror::Error;

/// Substrings in package manager output that indicate a flaky registry or
/// network rather than a real install problem.
const TRANSIENT_MARKERS: &[&str] = &[
    "ETIMEDOUT",
    "ECONNRESET",
    "ECONNREFUSED",
    "EAI_AGAIN",
    "ENOTFOUND",
    "socket hang up",
    "network timeout",
    "ERR_SOCKET_TIMEOUT",
    "503 Service Unavailable",
    "502 Bad Gateway",
    "429 Too Many Requests",
];

/// Main error type for registry-scripts operations
#[derive(Error, Debug)]
pub enum Error {
    /// A `package.json` (or other JSON document) could not be parsed.
    #[error("Failed to parse {}: {message}", path.display())]
    ManifestParse { path: PathBuf, message: String },

    /// A manifest was readable but lacked something the caller requires.
    #[error("Invalid manifest {}: {message}", path.display())]
    ManifestInvalid { path: PathBuf, message: String },

    /// A package manager invocation exited unsuccessfully.
    ///
    /// `stderr` holds the (possibly truncated) error output so callers can
    /// classify the failure.
    #[error("{program} {command} failed in {}: {stderr}", cwd.display())]
    PackageManager {
        program: String,
        command: String,
        cwd: PathBuf,
        stderr: String,
    },

    /// A package manager or git binary could not be spawned at all.
    #[error("Failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    /// An error occurred while executing a Git command.
    #[error("Git command failed for {url}: {command} - {stderr}")]
    GitCommand {
        command: String,
        url: String,
        stderr: String,
    },

    /// The install cache marker was missing, unreadable, or stale.
    #[error("Cache operation error: {message}")]
    Cache { message: String },

    /// An overlay step failed for a package.
    #[error("Overlay error for {package}: {message}")]
    Overlay { package: String, message: String },

    /// The registry returned metadata the caller could not use.
    #[error("Registry error for {package}: {message}")]
    Registry { package: String, message: String },

    /// The bounded task runner could not be set up.
    #[error("Task runner error: {message}")]
    Runner { message: String },

    /// A required configuration input (path, environment value) is unusable.
    #[error("Configuration error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    Config {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A directory walk failed.
    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// A JSON serialization or deserialization error without file context.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A semantic versioning parsing error, wrapped from `semver::Error`.
    #[error("Semver parsing error: {0}")]
    Semver(#[from] semver::Error),
}

impl Error {
    /// Whether retrying the failed operation has a reasonable chance of
    /// succeeding.
    ///
    /// Only package manager failures whose output mentions a network or
    /// registry availability problem qualify.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::PackageManager { stderr, .. } => {
                TRANSIENT_MARKERS.iter().any(|marker| stderr.contains(marker))
            }
            _ => false,
        }
    }

    /// Whether a registry lookup failed because the package does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::PackageManager { stderr, .. } => {
                stderr.contains("E404") || stderr.contains("404 Not Found")
            }
            _ => false,
        }
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
