//! Content hashing of override directories.
//!
//! The install cache is keyed by a BLAKE3 digest over every file an overlay
//! would copy: relative path plus contents, visited in sorted order. Any
//! content change, rename, addition or removal changes the digest.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::Result;

/// Names never copied by an overlay and therefore never hashed.
pub const OVERLAY_EXCLUDED: &[&str] = &["node_modules", ".DS_Store"];

/// Whether `name` (a single path component) is excluded from overlays.
pub fn is_overlay_excluded(name: &str) -> bool {
    OVERLAY_EXCLUDED.contains(&name)
}

/// Hex-encoded BLAKE3 digest of the overlay-relevant contents of `dir`.
pub fn hash_override_dir(dir: &Path) -> Result<String> {
    let mut hasher = blake3::Hasher::new();

    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_overlay_excluded(&entry.file_name().to_string_lossy()));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let relative = relative.to_string_lossy().replace('\\', "/");
        let content = fs::read(entry.path())?;

        // Length prefixes keep ("ab", "c") distinct from ("a", "bc").
        hasher.update(&(relative.len() as u64).to_le_bytes());
        hasher.update(relative.as_bytes());
        hasher.update(&(content.len() as u64).to_le_bytes());
        hasher.update(&content);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("lib")).unwrap();
        fs::write(temp.path().join("package.json"), r#"{"name":"x"}"#).unwrap();
        fs::write(temp.path().join("index.js"), "module.exports = 1\n").unwrap();
        fs::write(temp.path().join("lib/util.js"), "exports.a = 1\n").unwrap();
        temp
    }

    #[test]
    fn test_hash_is_stable() {
        let temp = fixture();
        let first = hash_override_dir(temp.path()).unwrap();
        let second = hash_override_dir(temp.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_hash_changes_with_content() {
        let temp = fixture();
        let before = hash_override_dir(temp.path()).unwrap();
        fs::write(temp.path().join("lib/util.js"), "exports.a = 2\n").unwrap();
        assert_ne!(before, hash_override_dir(temp.path()).unwrap());
    }

    #[test]
    fn test_hash_changes_with_rename() {
        let temp = fixture();
        let before = hash_override_dir(temp.path()).unwrap();
        fs::rename(temp.path().join("index.js"), temp.path().join("main.js")).unwrap();
        assert_ne!(before, hash_override_dir(temp.path()).unwrap());
    }

    #[test]
    fn test_hash_ignores_excluded_entries() {
        let temp = fixture();
        let before = hash_override_dir(temp.path()).unwrap();

        fs::write(temp.path().join(".DS_Store"), "junk").unwrap();
        fs::create_dir_all(temp.path().join("node_modules/dep")).unwrap();
        fs::write(temp.path().join("node_modules/dep/index.js"), "x").unwrap();

        assert_eq!(before, hash_override_dir(temp.path()).unwrap());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_any_content_change_changes_hash(
            original in proptest::collection::vec(any::<u8>(), 0..64),
            edited in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            prop_assume!(original != edited);
            let temp = TempDir::new().unwrap();
            fs::write(temp.path().join("index.js"), &original).unwrap();
            let before = hash_override_dir(temp.path()).unwrap();
            fs::write(temp.path().join("index.js"), &edited).unwrap();
            prop_assert_ne!(before, hash_override_dir(temp.path()).unwrap());
        }
    }
}
