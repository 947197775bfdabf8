//! # Package Manifest Reading and Editing
//!
//! Two views over a `package.json`:
//!
//! - [`PackageJson`]: a typed, read-only record for the fields the pipeline
//!   looks at (name, version, scripts, dependencies, exports, ...).
//! - [`EditablePackageJson`]: the raw JSON object, with shallow
//!   [`update`](EditablePackageJson::update) and [`save`](EditablePackageJson::save).
//!   Key order is preserved so rewritten manifests produce small diffs.
//!
//! ## Example
//!
//! ```no_run
//! use registry_scripts::package_json::{EditablePackageJson, FieldUpdate};
//! use serde_json::json;
//!
//! let mut pkg = EditablePackageJson::load("node_modules/is-regex/package.json".as_ref())?;
//! pkg.update([
//!     ("main", FieldUpdate::Set(json!("./index.js"))),
//!     ("browser", FieldUpdate::Remove),
//! ]);
//! pkg.save()?;
//! # Ok::<(), registry_scripts::error::Error>(())
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{Error, Result};

/// Registry-specific metadata stored under the `socket` key of an override
/// manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_tests: Option<bool>,
}

/// Typed view of the `package.json` fields the pipeline uses.
///
/// Published manifests are not always well-formed: old packages use
/// `"license": {"type": "MIT"}` or `"engines": ["node >= 0.4"]`. Fields with
/// an unexpected shape read as absent instead of failing the whole document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageJson {
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "lenient_license", skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub types: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exports: Option<JsonValue>,
    #[serde(default, deserialize_with = "lenient_string_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub scripts: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "lenient_string_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "lenient_string_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "lenient_string_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub engines: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<JsonValue>,
    #[serde(default, deserialize_with = "lenient_socket", skip_serializing_if = "Option::is_none")]
    pub socket: Option<SocketMetadata>,
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) => Some(s),
        _ => None,
    })
}

/// SPDX string, or the legacy `{"type": ...}` object and arrays of them
/// (joined with `OR`).
fn lenient_license<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    fn license_type(value: &JsonValue) -> Option<String> {
        match value {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Object(obj) => obj.get("type").and_then(JsonValue::as_str).map(str::to_string),
            _ => None,
        }
    }

    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::Array(items) => {
            let types: Vec<String> = items.iter().filter_map(license_type).collect();
            match types.len() {
                0 => None,
                1 => types.into_iter().next(),
                _ => Some(format!("({})", types.join(" OR "))),
            }
        }
        other => license_type(&other),
    })
}

/// String-valued entries of an object. Anything else reads as empty.
fn lenient_string_map<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::Object(obj) => obj
            .into_iter()
            .filter_map(|(key, value)| match value {
                JsonValue::String(s) => Some((key, s)),
                _ => None,
            })
            .collect(),
        _ => BTreeMap::new(),
    })
}

fn lenient_socket<'de, D>(deserializer: D) -> std::result::Result<Option<SocketMetadata>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(serde_json::from_value(JsonValue::deserialize(deserializer)?).ok())
}

/// A problem found in an otherwise parseable manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestIssue {
    MissingName,
    MissingVersion,
}

impl fmt::Display for ManifestIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestIssue::MissingName => f.write_str("missing \"name\""),
            ManifestIssue::MissingVersion => f.write_str("missing \"version\""),
        }
    }
}

impl PackageJson {
    /// The `test` script, if one is declared and non-empty.
    pub fn test_script(&self) -> Option<&str> {
        self.scripts
            .get("test")
            .map(String::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Required fields that are missing. Callers decide whether an issue is
    /// fatal.
    pub fn issues(&self) -> Vec<ManifestIssue> {
        let mut issues = Vec::new();
        if self.name.as_deref().map_or(true, str::is_empty) {
            issues.push(ManifestIssue::MissingName);
        }
        if self.version.as_deref().map_or(true, str::is_empty) {
            issues.push(ManifestIssue::MissingVersion);
        }
        issues
    }

    /// Repository URL from either the string or the `{ "url": ... }` form.
    pub fn repository_url(&self) -> Option<&str> {
        match self.repository.as_ref()? {
            JsonValue::String(url) => Some(url.as_str()),
            JsonValue::Object(obj) => obj.get("url").and_then(JsonValue::as_str),
            _ => None,
        }
    }
}

/// Parses manifest text, attaching `path` to any parse error.
pub fn parse_package_json(content: &str, path: &Path) -> Result<PackageJson> {
    serde_json::from_str(content).map_err(|e| Error::ManifestParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Reads and parses the `package.json` at `path`.
pub fn read_package_json(path: &Path) -> Result<PackageJson> {
    let content = fs::read_to_string(path)?;
    parse_package_json(&content, path)
}

/// Logs a warning for each issue in `manifest` and returns them.
pub fn report_issues(path: &Path, manifest: &PackageJson) -> Vec<ManifestIssue> {
    let issues = manifest.issues();
    for issue in &issues {
        warn!("{}: {}", path.display(), issue);
    }
    issues
}

/// A single field change for [`EditablePackageJson::update`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    /// Set (or replace) the field with this value.
    Set(JsonValue),
    /// Remove the field from the serialized output.
    Remove,
}

impl From<JsonValue> for FieldUpdate {
    fn from(value: JsonValue) -> Self {
        FieldUpdate::Set(value)
    }
}

/// Mutable, order-preserving view of a `package.json` on disk.
#[derive(Debug, Clone)]
pub struct EditablePackageJson {
    path: PathBuf,
    content: Map<String, JsonValue>,
}

impl EditablePackageJson {
    /// Loads the manifest at `path`. The document must be a JSON object.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let value: JsonValue = serde_json::from_str(&text).map_err(|e| Error::ManifestParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        match value {
            JsonValue::Object(content) => Ok(Self {
                path: path.to_path_buf(),
                content,
            }),
            other => Err(Error::ManifestInvalid {
                path: path.to_path_buf(),
                message: format!("expected a JSON object, found {}", json_kind(&other)),
            }),
        }
    }

    /// Starts a new manifest that will be written to `path`.
    pub fn create(path: &Path, content: Map<String, JsonValue>) -> Self {
        Self {
            path: path.to_path_buf(),
            content,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content(&self) -> &Map<String, JsonValue> {
        &self.content
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.content.get(key)
    }

    /// Shallow merge: `Set` replaces the whole field, `Remove` deletes it.
    ///
    /// Existing keys keep their position; new keys are appended.
    pub fn update<K, I>(&mut self, fields: I)
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, FieldUpdate)>,
    {
        for (key, update) in fields {
            let key = key.into();
            match update {
                FieldUpdate::Set(value) => {
                    self.content.insert(key, value);
                }
                FieldUpdate::Remove => {
                    self.content.shift_remove(&key);
                }
            }
        }
    }

    /// Typed view of the current (possibly unsaved) content.
    pub fn to_package_json(&self) -> Result<PackageJson> {
        serde_json::from_value(JsonValue::Object(self.content.clone())).map_err(|e| {
            Error::ManifestParse {
                path: self.path.clone(),
                message: e.to_string(),
            }
        })
    }

    /// Serialized form: two-space indentation and a trailing newline.
    pub fn to_json_string(&self) -> Result<String> {
        let mut text = serde_json::to_string_pretty(&self.content)?;
        text.push('\n');
        Ok(text)
    }

    /// Writes the manifest back to its path.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, self.to_json_string()?)?;
        Ok(())
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("package.json");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_read_typed_fields() {
        let temp = TempDir::new().unwrap();
        let path = write(
            &temp,
            r#"{
  "name": "is-regex",
  "version": "1.1.4",
  "scripts": { "test": "tape test" },
  "devDependencies": { "tape": "^5.0.0" },
  "exports": { ".": "./index.js" },
  "repository": { "type": "git", "url": "git+https://github.com/inspect-js/is-regex.git" },
  "socket": { "categories": ["cleanup"], "interop": ["cjs"] }
}"#,
        );

        let pkg = read_package_json(&path).unwrap();
        assert_eq!(pkg.name.as_deref(), Some("is-regex"));
        assert_eq!(pkg.test_script(), Some("tape test"));
        assert_eq!(pkg.dev_dependencies.get("tape").unwrap(), "^5.0.0");
        assert_eq!(pkg.exports, Some(json!({ ".": "./index.js" })));
        assert_eq!(
            pkg.repository_url(),
            Some("git+https://github.com/inspect-js/is-regex.git")
        );
        let socket = pkg.socket.as_ref().unwrap();
        assert_eq!(socket.categories, Some(vec!["cleanup".to_string()]));
        assert_eq!(socket.skip_tests, None);
        assert!(pkg.issues().is_empty());
    }

    #[test]
    fn test_legacy_field_shapes_read_as_absent_or_normalized() {
        let temp = TempDir::new().unwrap();
        let path = write(
            &temp,
            r#"{
  "name": "isarray",
  "version": "0.0.1",
  "license": { "type": "MIT", "url": "http://opensource.org/licenses/MIT" },
  "engines": ["node >= 0.4"],
  "main": ["index.js"],
  "scripts": { "test": "tap test/*.js", "weird": 1 },
  "devDependencies": { "tap": "*" }
}"#,
        );

        let pkg = read_package_json(&path).unwrap();
        assert_eq!(pkg.license.as_deref(), Some("MIT"));
        assert!(pkg.engines.is_empty());
        assert_eq!(pkg.main, None);
        assert_eq!(pkg.test_script(), Some("tap test/*.js"));
        assert_eq!(pkg.scripts.len(), 1);
        assert_eq!(pkg.dev_dependencies.get("tap").map(String::as_str), Some("*"));
    }

    #[test]
    fn test_license_array_is_joined() {
        let temp = TempDir::new().unwrap();
        let path = write(
            &temp,
            r#"{"name":"x","license":[{"type":"MIT"},{"type":"Apache-2.0"}]}"#,
        );
        let pkg = read_package_json(&path).unwrap();
        assert_eq!(pkg.license.as_deref(), Some("(MIT OR Apache-2.0)"));
    }

    #[test]
    fn test_parse_error_carries_path() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "{ \"name\": ");

        let err = read_package_json(&path).unwrap_err();
        match &err {
            Error::ManifestParse { path: p, .. } => assert_eq!(p, &path),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("package.json"));
    }

    #[test]
    fn test_missing_name_is_reported_not_fatal() {
        let pkg = parse_package_json(r#"{"version":"1.0.0"}"#, Path::new("p.json")).unwrap();
        assert_eq!(pkg.issues(), vec![ManifestIssue::MissingName]);
    }

    #[test]
    fn test_report_issues_returns_every_issue() {
        let path = Path::new("packages/npm/is-regex/package.json");
        let pkg = parse_package_json(r#"{"name":""}"#, path).unwrap();
        assert_eq!(
            report_issues(path, &pkg),
            vec![ManifestIssue::MissingName, ManifestIssue::MissingVersion]
        );

        let complete =
            parse_package_json(r#"{"name":"is-regex","version":"1.1.4"}"#, path).unwrap();
        assert!(report_issues(path, &complete).is_empty());
    }

    #[test]
    fn test_blank_test_script_is_absent() {
        let pkg =
            parse_package_json(r#"{"scripts":{"test":"  "}}"#, Path::new("p.json")).unwrap();
        assert_eq!(pkg.test_script(), None);
    }

    #[test]
    fn test_update_sets_removes_and_keeps_order() {
        let temp = TempDir::new().unwrap();
        let path = write(
            &temp,
            r#"{"name":"a","version":"1.0.0","browser":"./b.js","main":"./old.js"}"#,
        );

        let mut pkg = EditablePackageJson::load(&path).unwrap();
        pkg.update([
            ("main", FieldUpdate::Set(json!("./index.js"))),
            ("browser", FieldUpdate::Remove),
            ("types", FieldUpdate::Set(json!("./index.d.ts"))),
        ]);
        pkg.save().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "{\n  \"name\": \"a\",\n  \"version\": \"1.0.0\",\n  \"main\": \"./index.js\",\n  \"types\": \"./index.d.ts\"\n}\n"
        );
    }

    #[test]
    fn test_update_replaces_objects_wholesale() {
        let temp = TempDir::new().unwrap();
        let path = write(
            &temp,
            r#"{"exports":{".":{"import":"./esm.mjs","require":"./cjs.js"},"./package.json":"./package.json"}}"#,
        );

        let mut pkg = EditablePackageJson::load(&path).unwrap();
        pkg.update([("exports", FieldUpdate::from(json!({ ".": "./index.js" })))]);

        assert_eq!(pkg.get("exports"), Some(&json!({ ".": "./index.js" })));
    }

    #[test]
    fn test_load_rejects_non_object() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "[1, 2]");

        let err = EditablePackageJson::load(&path).unwrap_err();
        assert!(err.to_string().contains("expected a JSON object, found an array"));
    }

    #[test]
    fn test_to_package_json_reflects_unsaved_edits() {
        let mut pkg = EditablePackageJson::create(Path::new("/tmp/never-written.json"), Map::new());
        pkg.update([("name", FieldUpdate::Set(json!("x")))]);
        assert_eq!(pkg.to_package_json().unwrap().name.as_deref(), Some("x"));
    }
}
