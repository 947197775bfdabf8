//! # Registry Scripts Library
//!
//! Build, test and release tooling for a registry of npm package overrides:
//! drop-in replacements for public packages, kept under `packages/npm/` in
//! the workspace. The library drives the pipeline that proves each override
//! works against the test suite of the package it replaces, and produces the
//! registry manifest describing every override.
//!
//! ## Quick Example
//!
//! ```no_run
//! use registry_scripts::config::Config;
//! use registry_scripts::registry::OverrideIndex;
//! use registry_scripts::stages::{download, StageOptions};
//!
//! let config = Config::from_env()?;
//! let index = OverrideIndex::discover(&config.npm_packages_path())?;
//! let records = index.records(&["is-regex".to_string()]);
//!
//! let results = download::validate_all(&config, &records, StageOptions::new(3))?;
//! for result in &results {
//!     println!("{}: {:?}", result.package.original_name, result.reason);
//! }
//! # Ok::<(), registry_scripts::error::Error>(())
//! ```
//!
//! ## Pipeline
//!
//! 1. **Download** (`stages::download`): check that each package has an
//!    override directory and a pinned version, and is not skip-listed.
//! 2. **Install** (`stages::install`): install the original package into its
//!    own working directory, overlay the override, resolve dependencies and
//!    cache the result keyed by a content hash of the override.
//! 3. **Test** (`stages::test`): run the package's test script there.
//!
//! Every stage fans out through the bounded task runner (`runner`). Stages
//! exchange plain serializable records, so they can run in one process or as
//! separate commands chained through JSON files in the temp directory.
//!
//! ## Other modules
//!
//! - **Configuration (`config`, `defaults`)**: workspace paths, temp
//!   directory, concurrency and package manager detection.
//! - **Manifests (`package_json`)**: typed reads and order-preserving edits
//!   of `package.json`.
//! - **Registry manifest (`manifest`, `purl`)**: `manifest.json` generation.
//! - **Releases (`version`)**: version bumps and publish planning.

pub mod cache;
pub mod config;
pub mod defaults;
pub mod error;
pub mod git;
pub mod hash;
pub mod manifest;
pub mod output;
pub mod overlay;
pub mod package_json;
pub mod package_manager;
pub mod purl;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod stages;
pub mod version;
