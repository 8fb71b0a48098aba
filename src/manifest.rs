//! Local sync manifest.
//!
//! On-disk record of the fingerprints last successfully synchronized,
//! serialized as `{"last_sync": ISO-8601, "files": {path: fingerprint}}`.
//! The manifest is only ever replaced as a whole after a fully successful
//! refresh; there is no partial update path, so a crash mid-sync leaves the
//! previous manifest intact and the next run re-detects full divergence.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::{DoctorError, Result};

/// Manifest file name within the plugin cache directory.
pub const MANIFEST_FILE: &str = "sha_manifest.json";

/// Fingerprints last successfully synchronized, keyed by tree-relative path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalManifest {
    /// When the last successful sync completed.
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,

    /// Tree-relative path to content fingerprint.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl LocalManifest {
    /// Build a manifest for the given fingerprint map, stamped now.
    pub fn new(files: BTreeMap<String, String>) -> Self {
        Self {
            last_sync: Some(Utc::now()),
            files,
        }
    }

    /// Load the manifest from disk.
    ///
    /// A missing file yields an empty manifest (first run). A malformed file
    /// also yields an empty manifest: an unreadable record cannot be trusted,
    /// and an empty map forces full divergence on the next comparison.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Malformed manifest, treating as empty");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable manifest, treating as empty");
                Self::default()
            }
        }
    }

    /// Persist the manifest atomically: write to a temp file in the same
    /// directory, then rename over the destination.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| DoctorError::Sync(format!("manifest path {} has no parent", path.display())))?;
        fs::create_dir_all(parent)?;

        let content = serde_json::to_string_pretty(self)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(path)
            .map_err(|e| DoctorError::Io(e.error))?;
        Ok(())
    }

    /// True when the remote fingerprint map differs from this manifest:
    /// the path sets differ, or any shared path has a differing fingerprint.
    pub fn diverges_from(&self, remote: &BTreeMap<String, String>) -> bool {
        if self.files.len() != remote.len() {
            return true;
        }
        remote
            .iter()
            .any(|(path, fingerprint)| self.files.get(path) != Some(fingerprint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let manifest = LocalManifest::load(&tmp.path().join("nope.json"));
        assert!(manifest.files.is_empty());
        assert!(manifest.last_sync.is_none());
    }

    #[test]
    fn test_load_malformed_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sha_manifest.json");
        fs::write(&path, "{ not json").unwrap();
        let manifest = LocalManifest::load(&path);
        assert!(manifest.files.is_empty());
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache").join(MANIFEST_FILE);

        let manifest = LocalManifest::new(map(&[
            ("E001/check.json", "abc"),
            ("E001/solution.md", "def"),
        ]));
        manifest.save(&path).unwrap();

        let loaded = LocalManifest::load(&path);
        assert_eq!(loaded.files, manifest.files);
        assert!(loaded.last_sync.is_some());
    }

    #[test]
    fn test_save_replaces_whole_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(MANIFEST_FILE);

        LocalManifest::new(map(&[("old/check.json", "111")]))
            .save(&path)
            .unwrap();
        LocalManifest::new(map(&[("new/check.json", "222")]))
            .save(&path)
            .unwrap();

        let loaded = LocalManifest::load(&path);
        assert_eq!(loaded.files, map(&[("new/check.json", "222")]));
    }

    #[test]
    fn test_wire_format() {
        let json = r#"{
            "last_sync": "2024-05-01T12:00:00Z",
            "files": {"E001/check.json": "abc123"}
        }"#;
        let manifest: LocalManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.files.get("E001/check.json").unwrap(), "abc123");
        assert!(manifest.last_sync.is_some());
    }

    #[test]
    fn test_diverges_identical_maps() {
        let manifest = LocalManifest::new(map(&[("a", "1"), ("b", "2")]));
        assert!(!manifest.diverges_from(&map(&[("a", "1"), ("b", "2")])));
    }

    #[test]
    fn test_diverges_on_fingerprint_change() {
        let manifest = LocalManifest::new(map(&[("a", "1"), ("b", "2")]));
        assert!(manifest.diverges_from(&map(&[("a", "1"), ("b", "CHANGED")])));
    }

    #[test]
    fn test_diverges_on_added_or_removed_path() {
        let manifest = LocalManifest::new(map(&[("a", "1")]));
        assert!(manifest.diverges_from(&map(&[("a", "1"), ("b", "2")])));
        assert!(manifest.diverges_from(&map(&[])));

        let empty = LocalManifest::default();
        assert!(empty.diverges_from(&map(&[("a", "1")])));
        assert!(!empty.diverges_from(&map(&[])));
    }

    #[test]
    fn test_diverges_same_size_different_keys() {
        let manifest = LocalManifest::new(map(&[("a", "1")]));
        assert!(manifest.diverges_from(&map(&[("b", "1")])));
    }

    /// Randomized divergence check against a straightforward oracle.
    #[test]
    fn test_diverges_randomized_property() {
        // Small deterministic xorshift so the test is reproducible.
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        for _ in 0..500 {
            let mut local = BTreeMap::new();
            let mut remote = BTreeMap::new();
            for _ in 0..(next() % 6) {
                let key = format!("E{:03}/check.json", next() % 8);
                local.insert(key, format!("fp{}", next() % 3));
            }
            for _ in 0..(next() % 6) {
                let key = format!("E{:03}/check.json", next() % 8);
                remote.insert(key, format!("fp{}", next() % 3));
            }

            let oracle = local.keys().collect::<std::collections::BTreeSet<_>>()
                != remote.keys().collect::<std::collections::BTreeSet<_>>()
                || remote
                    .iter()
                    .any(|(k, v)| local.get(k).map(|lv| lv != v).unwrap_or(false));

            let manifest = LocalManifest {
                last_sync: None,
                files: local.clone(),
            };
            assert_eq!(
                manifest.diverges_from(&remote),
                oracle,
                "local={local:?} remote={remote:?}"
            );
        }
    }
}
