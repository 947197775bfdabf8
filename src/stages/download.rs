//! Download/validate stage.
//!
//! Read-only checks that decide which packages go on to the install stage.
//! For each record, in order:
//!
//! 1. Skip-listed for the ecosystem → `"Skipped"` (no filesystem access).
//! 2. Override directory missing → `"No override"`.
//! 3. No pinned version in the reference manifest → `"Not in devDependencies"`.
//!
//! A record that already carries a version specifier keeps it; the reference
//! manifest is only consulted for records that need one.

use std::collections::HashSet;

use log::{debug, info};

use super::{
    DownloadResult, StageOptions, REASON_ABORTED, REASON_NOT_IN_DEV_DEPENDENCIES,
    REASON_NO_OVERRIDE, REASON_SKIPPED,
};
use crate::config::Config;
use crate::error::Result;
use crate::package_json::{read_package_json, PackageJson};
use crate::registry::{Ecosystem, PackageRecord};
use crate::runner::run_bounded;

/// Validates every record. Only an unreadable reference manifest is fatal.
pub fn validate_all(
    config: &Config,
    records: &[PackageRecord],
    opts: StageOptions<'_>,
) -> Result<Vec<DownloadResult>> {
    let needs_reference = records.iter().any(|r| {
        r.version_specifier.is_empty() && !config.is_skipped(Ecosystem::Npm, &r.original_name)
    });
    let reference = if needs_reference {
        Some(read_package_json(&config.test_npm_package_json_path())?)
    } else {
        None
    };

    let report = run_bounded(records, opts.concurrency, opts.signal, |record| {
        let result = validate_one(config, record, reference.as_ref());
        opts.tick(&record.original_name);
        result
    })?;

    let mut results = report.results;
    let seen: HashSet<String> = results
        .iter()
        .map(|r| r.package.original_name.clone())
        .collect();
    results.extend(
        records
            .iter()
            .filter(|r| !seen.contains(&r.original_name))
            .map(|r| DownloadResult::failed(r.clone(), REASON_ABORTED)),
    );
    results.sort_by(|a, b| a.package.original_name.cmp(&b.package.original_name));

    let ok = results.iter().filter(|r| r.downloaded).count();
    info!("Validated {} packages ({} ready)", results.len(), ok);
    Ok(results)
}

/// Validates one record against the skip set, the filesystem and the
/// reference manifest.
pub fn validate_one(
    config: &Config,
    record: &PackageRecord,
    reference: Option<&PackageJson>,
) -> DownloadResult {
    if config.is_skipped(Ecosystem::Npm, &record.original_name) {
        debug!("{}: skip-listed", record.original_name);
        return DownloadResult::failed(record.clone(), REASON_SKIPPED);
    }

    if !record.override_directory.is_dir() {
        debug!(
            "{}: no override at {}",
            record.original_name,
            record.override_directory.display()
        );
        return DownloadResult::failed(record.clone(), REASON_NO_OVERRIDE);
    }

    if !record.version_specifier.is_empty() {
        return DownloadResult::ok(record.clone());
    }

    match reference
        .and_then(|manifest| manifest.dev_dependencies.get(&record.original_name))
        .map(|spec| resolve_specifier(spec))
    {
        Some(spec) if !spec.is_empty() => {
            DownloadResult::ok(record.with_version_specifier(spec))
        }
        _ => DownloadResult::failed(record.clone(), REASON_NOT_IN_DEV_DEPENDENCIES),
    }
}

/// Strips an `npm:<name>@` alias prefix, leaving the version range.
pub fn resolve_specifier(spec: &str) -> String {
    match spec.strip_prefix("npm:") {
        Some(alias) => alias
            .rsplit_once('@')
            .filter(|(name, _)| !name.is_empty())
            .map(|(_, range)| range.to_string())
            .unwrap_or_else(|| "latest".to_string()),
        None => spec.trim().to_string(),
    }
}
