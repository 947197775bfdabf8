//! On-disk install cache.
//!
//! Each package gets a working directory under the temp dir. When an install
//! finishes, a [`CacheMarker`] is written next to it. A later run reuses the
//! working directory only if the marker still matches the current version
//! specifier and override hash, the installed manifest is still there, and
//! any upstream source checkout the marker references still exists.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::defaults::INSTALL_MARKER;
use crate::error::{Error, Result};
use crate::registry::{dir_name_for, original_name_from_dir};

/// Contents of `.socket-install-complete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMarker {
    pub installed_at: DateTime<Utc>,
    pub version_specifier: String,
    pub override_hash: String,
    /// Upstream source checkout, relative to the working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_directory: Option<String>,
}

/// Why a cached working directory can or cannot be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheValidity {
    Valid,
    NoMarker,
    SpecifierChanged,
    OverrideChanged,
    PackageMissing,
    SourceMissing,
}

impl CacheValidity {
    pub fn is_valid(&self) -> bool {
        *self == CacheValidity::Valid
    }
}

impl CacheMarker {
    pub fn new(version_specifier: impl Into<String>, override_hash: impl Into<String>) -> Self {
        Self {
            installed_at: Utc::now(),
            version_specifier: version_specifier.into(),
            override_hash: override_hash.into(),
            source_directory: None,
        }
    }

    pub fn with_source_directory(mut self, source_directory: Option<String>) -> Self {
        self.source_directory = source_directory;
        self
    }

    pub fn path(working_dir: &Path) -> PathBuf {
        working_dir.join(INSTALL_MARKER)
    }

    /// Reads the marker in `working_dir`; `Ok(None)` if there is none.
    pub fn read(working_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(working_dir);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::Cache {
                message: format!("corrupt marker {}: {}", path.display(), e),
            })
    }

    pub fn write(&self, working_dir: &Path) -> Result<()> {
        let mut content = serde_json::to_string_pretty(self)?;
        content.push('\n');
        fs::write(Self::path(working_dir), content)?;
        Ok(())
    }

    /// Source checkout directory, if the marker references one.
    pub fn source_path(&self, working_dir: &Path) -> Option<PathBuf> {
        self.source_directory.as_ref().map(|dir| working_dir.join(dir))
    }

    /// Checks the marker against current inputs and on-disk state.
    pub fn validate(
        &self,
        working_dir: &Path,
        package_dir: &Path,
        version_specifier: &str,
        override_hash: &str,
    ) -> CacheValidity {
        if self.version_specifier != version_specifier {
            CacheValidity::SpecifierChanged
        } else if self.override_hash != override_hash {
            CacheValidity::OverrideChanged
        } else if !package_dir.join("package.json").is_file() {
            CacheValidity::PackageMissing
        } else if self
            .source_path(working_dir)
            .is_some_and(|source| !source.is_dir())
        {
            CacheValidity::SourceMissing
        } else {
            CacheValidity::Valid
        }
    }
}

/// Working directory used for `original_name` under `temp_dir`.
pub fn working_dir_for(temp_dir: &Path, original_name: &str) -> PathBuf {
    temp_dir.join(dir_name_for(original_name))
}

/// Where the original package lands inside a working directory.
pub fn installed_package_dir(working_dir: &Path, original_name: &str) -> PathBuf {
    let mut dir = working_dir.join("node_modules");
    for part in original_name.split('/') {
        dir.push(part);
    }
    dir
}

/// A working directory found in the temp dir.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub package: String,
    pub path: PathBuf,
    pub marker: Option<CacheMarker>,
    pub size: u64,
}

/// Lists working directories in `temp_dir`, sorted by package name.
///
/// A marker that cannot be parsed is reported as absent.
pub fn list_entries(temp_dir: &Path) -> Result<Vec<CacheEntry>> {
    let mut entries = Vec::new();
    if !temp_dir.is_dir() {
        return Ok(entries);
    }

    for entry in fs::read_dir(temp_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let dir_name = entry.file_name().to_string_lossy().into_owned();
        entries.push(CacheEntry {
            package: original_name_from_dir(&dir_name),
            marker: CacheMarker::read(&path).ok().flatten(),
            size: dir_size(&path),
            path,
        });
    }

    entries.sort_by(|a, b| a.package.cmp(&b.package));
    Ok(entries)
}

fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}
