//! Package URLs (`pkg:<type>/<namespace>/<name>@<version>`).
//!
//! Only what the registry manifest needs: building the canonical string for
//! an npm package. Each path segment and the version are percent-encoded, so
//! a scope's leading `@` becomes `%40`.

use std::fmt;

use url::form_urlencoded::byte_serialize;

use crate::registry::Ecosystem;

/// A package URL for one published version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageUrl {
    pub ecosystem: Ecosystem,
    pub name: String,
    pub version: String,
}

impl PackageUrl {
    pub fn new(ecosystem: Ecosystem, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            ecosystem,
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn npm(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(Ecosystem::Npm, name, version)
    }
}

/// Percent-encodes one purl segment.
///
/// `byte_serialize` is form encoding: it writes a space as `+` (a literal
/// `+` is already `%2B`) and escapes `~`. Both are mapped back to the purl
/// rules.
fn encode(segment: &str) -> String {
    byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
        .replace("%7E", "~")
}

impl fmt::Display for PackageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path: Vec<String> = self.name.split('/').map(encode).collect();
        write!(
            f,
            "pkg:{}/{}@{}",
            self.ecosystem,
            path.join("/"),
            encode(&self.version)
        )
    }
}
