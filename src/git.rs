//! Upstream source checkouts.
//!
//! Published npm tarballs usually leave out test suites. When an installed
//! package has no `test` script, the install stage can fetch the package's
//! upstream repository at the matching release tag and run tests there. The
//! checkout is placed inside the package's working directory, so it lives
//! and dies with the cached install.

use std::fs;
use std::path::Path;
use std::process::Command;

use log::debug;
use semver::Version;

use crate::error::{Error, Result};

/// Fetches upstream sources for a package. Allows mocking in tests.
pub trait SourceFetcher: Send + Sync {
    /// Checks out `repository_url` at the release tag for `version` into
    /// `target_dir`.
    fn fetch(&self, repository_url: &str, version: &str, target_dir: &Path) -> Result<()>;
}

/// [`SourceFetcher`] that shells out to the system `git`.
///
/// This uses the system git command, which automatically handles SSH keys,
/// credential helpers and any authentication configured in `~/.gitconfig`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitSourceFetcher;

impl SourceFetcher for GitSourceFetcher {
    fn fetch(&self, repository_url: &str, version: &str, target_dir: &Path) -> Result<()> {
        let url = github_clone_url(repository_url).ok_or_else(|| Error::GitCommand {
            command: "clone".to_string(),
            url: repository_url.to_string(),
            stderr: "not a GitHub repository".to_string(),
        })?;
        let tags = list_tags(&url)?;
        let tag = select_release_tag(&tags, version).ok_or_else(|| Error::GitCommand {
            command: "ls-remote --tags".to_string(),
            url: url.clone(),
            stderr: format!("no tag for version {}", version),
        })?;
        clone_shallow(&url, &tag, target_dir)
    }
}

/// [`SourceFetcher`] that never fetches anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSourceFetcher;

impl SourceFetcher for NoSourceFetcher {
    fn fetch(&self, repository_url: &str, _version: &str, _target_dir: &Path) -> Result<()> {
        Err(Error::GitCommand {
            command: "clone".to_string(),
            url: repository_url.to_string(),
            stderr: "source fetching is disabled".to_string(),
        })
    }
}

/// Clone a repository at a specific ref using shallow clone
pub fn clone_shallow(url: &str, ref_name: &str, target_dir: &Path) -> Result<()> {
    // Remove target directory if it exists (git won't clone into existing non-empty dir)
    if target_dir.exists() {
        fs::remove_dir_all(target_dir)?;
    }
    if let Some(parent) = target_dir.parent() {
        fs::create_dir_all(parent)?;
    }

    debug!("git clone --depth=1 --branch {} {}", ref_name, url);
    let output = Command::new("git")
        .args(["clone", "--depth=1", "--branch", ref_name, url])
        .arg(target_dir)
        .output()
        .map_err(|e| Error::Spawn {
            program: "git".to_string(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(Error::GitCommand {
            command: format!("clone --branch {}", ref_name),
            url: url.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    // The checkout is only used for tests; history is dead weight.
    let git_dir = target_dir.join(".git");
    if git_dir.exists() {
        fs::remove_dir_all(git_dir)?;
    }
    Ok(())
}

/// List all tags from a remote repository
pub fn list_tags(url: &str) -> Result<Vec<String>> {
    let output = Command::new("git")
        .args(["ls-remote", "--tags", url])
        .output()
        .map_err(|e| Error::Spawn {
            program: "git".to_string(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(Error::GitCommand {
            command: "ls-remote --tags".to_string(),
            url: url.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_ls_remote_tags(&stdout))
}

/// Tag names from `git ls-remote --tags` output (`<hash>\trefs/tags/<tag>`),
/// without peeled `^{}` duplicates.
pub fn parse_ls_remote_tags(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .filter_map(|(_, name)| name.strip_prefix("refs/tags/"))
        .filter(|tag| !tag.ends_with("^{}"))
        .map(str::to_string)
        .collect()
}

/// Parse a tag string into a semantic version
pub fn parse_semver_tag(tag: &str) -> Option<Version> {
    Version::parse(tag.strip_prefix('v').unwrap_or(tag)).ok()
}

/// The tag whose version equals `version` (`v1.2.3` or `1.2.3`).
pub fn select_release_tag(tags: &[String], version: &str) -> Option<String> {
    let wanted = Version::parse(version).ok()?;
    tags.iter()
        .find(|tag| parse_semver_tag(tag).as_ref() == Some(&wanted))
        .cloned()
}

/// Normalizes a `package.json` repository URL to an HTTPS GitHub clone URL.
///
/// Accepts `git+https://github.com/o/r.git`, `git://github.com/o/r`,
/// `git@github.com:o/r.git`, `github:o/r` and the bare `o/r` shorthand.
pub fn github_clone_url(repository_url: &str) -> Option<String> {
    let url = repository_url.trim();
    let path = if let Some(rest) = url.strip_prefix("github:") {
        rest
    } else if let Some(rest) = url.strip_prefix("git@github.com:") {
        rest
    } else if let Some(idx) = url.find("github.com/") {
        &url[idx + "github.com/".len()..]
    } else if !url.contains(':') && url.matches('/').count() == 1 {
        url
    } else {
        return None;
    };

    let path = path.split('#').next()?.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let (owner, repo) = path.split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some(format!("https://github.com/{}/{}.git", owner, repo))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_github_clone_url_forms() {
        let expected = Some("https://github.com/inspect-js/is-regex.git".to_string());
        assert_eq!(
            github_clone_url("git+https://github.com/inspect-js/is-regex.git"),
            expected
        );
        assert_eq!(github_clone_url("git://github.com/inspect-js/is-regex"), expected);
        assert_eq!(github_clone_url("git@github.com:inspect-js/is-regex.git"), expected);
        assert_eq!(github_clone_url("github:inspect-js/is-regex"), expected);
        assert_eq!(github_clone_url("inspect-js/is-regex"), expected);
        assert_eq!(
            github_clone_url("https://github.com/inspect-js/is-regex#readme"),
            expected
        );
    }

    #[test]
    fn test_github_clone_url_rejects_other_hosts() {
        assert_eq!(github_clone_url("https://gitlab.com/a/b.git"), None);
        assert_eq!(github_clone_url("https://github.com/only-owner"), None);
        assert_eq!(github_clone_url(""), None);
    }

    #[test]
    fn test_parse_ls_remote_tags() {
        let output = "abc\trefs/tags/v1.0.0\nabd\trefs/tags/v1.0.0^{}\nabe\trefs/tags/1.1.0\nbad line\n";
        assert_eq!(parse_ls_remote_tags(output), vec!["v1.0.0", "1.1.0"]);
    }

    #[test]
    fn test_parse_semver_tag() {
        assert_eq!(
            parse_semver_tag("v1.0.0"),
            Some(Version::parse("1.0.0").unwrap())
        );
        assert_eq!(
            parse_semver_tag("3.0.0-beta.1"),
            Some(Version::parse("3.0.0-beta.1").unwrap())
        );
        // semver requires a patch version
        assert_eq!(parse_semver_tag("v1.0"), None);
        assert_eq!(parse_semver_tag("not-a-version"), None);
    }

    #[test]
    fn test_select_release_tag() {
        let tags = vec![
            "v1.1.3".to_string(),
            "v1.1.4".to_string(),
            "2.0.0".to_string(),
        ];
        assert_eq!(select_release_tag(&tags, "1.1.4"), Some("v1.1.4".to_string()));
        assert_eq!(select_release_tag(&tags, "2.0.0"), Some("2.0.0".to_string()));
        assert_eq!(select_release_tag(&tags, "3.0.0"), None);
        assert_eq!(select_release_tag(&tags, "latest"), None);
    }

    #[test]
    fn test_no_source_fetcher_always_fails() {
        let temp = tempfile::TempDir::new().unwrap();
        assert!(NoSourceFetcher
            .fetch("https://github.com/a/b.git", "1.0.0", temp.path())
            .is_err());
    }
}
