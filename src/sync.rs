//! Plugin cache synchronization
//!
//! The `SyncCoordinator` keeps the on-disk plugin cache in lockstep with the
//! remote catalog. It is the only component that writes to the cache
//! directory or the manifest. Divergence triggers coarse invalidation: the
//! whole identifier subtree is deleted and re-downloaded, never patched,
//! because a partially-updated cache could silently mix plugin versions. The
//! new manifest is persisted atomically only after every download succeeds,
//! so a mid-download failure leaves the previous manifest on disk and the
//! next attempt re-detects full divergence.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::catalog::{is_valid_identifier, verify_fingerprint, RemoteSource, ENTRY_FILE};
use crate::config::SyncMode;
use crate::error::{DoctorError, Result};
use crate::manifest::{LocalManifest, MANIFEST_FILE};

/// Snapshot of the coordinator's state for status displays.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub mode: SyncMode,
    pub synced: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub file_count: usize,
}

/// Compares remote and local fingerprints and refreshes the plugin cache
/// when they diverge. Exclusive owner of the cache directory and manifest.
pub struct SyncCoordinator {
    source: Arc<dyn RemoteSource>,
    cache_dir: PathBuf,
    mode: SyncMode,
    // Synced state is cached in memory for the process lifetime; a fresh
    // coordinator re-triggers the full check.
    synced: bool,
}

impl SyncCoordinator {
    pub fn new(source: Arc<dyn RemoteSource>, cache_dir: PathBuf, mode: SyncMode) -> Self {
        Self {
            source,
            cache_dir,
            mode,
            synced: false,
        }
    }

    /// Operating mode.
    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Whether a successful sync has happened in this process (offline-trust
    /// mode counts as always synced once checked).
    pub fn is_synced(&self) -> bool {
        self.synced || self.mode == SyncMode::OfflineTrust
    }

    fn manifest_path(&self) -> PathBuf {
        self.cache_dir.join(MANIFEST_FILE)
    }

    /// Ensure the cache matches the remote catalog.
    ///
    /// Offline-trust mode skips all network and fingerprint checks. In
    /// enforced mode any failure (network, catalog format, download,
    /// fingerprint mismatch) is fatal to the call and wrapped as `Sync`;
    /// there is no silent fallback to a stale cache.
    ///
    /// Returns `true` when the cache was actually refreshed, so the caller
    /// can invalidate any loaded plugin handles.
    pub async fn ensure_synced(&mut self, timeout: Duration) -> Result<bool> {
        if self.mode == SyncMode::OfflineTrust {
            debug!("Offline-trust mode, using local cache as-is");
            self.synced = true;
            return Ok(false);
        }

        if self.synced {
            return Ok(false);
        }

        let descriptors = self
            .source
            .fetch_catalog(timeout)
            .await
            .map_err(|e| DoctorError::Sync(format!("catalog check failed: {e}")))?;

        let remote: BTreeMap<String, String> = descriptors
            .iter()
            .map(|d| (d.source_path.clone(), d.fingerprint.clone()))
            .collect();

        let manifest = LocalManifest::load(&self.manifest_path());

        let refreshed = if manifest.diverges_from(&remote) {
            info!(
                remote_files = remote.len(),
                local_files = manifest.files.len(),
                "Plugin cache diverged from remote, refreshing"
            );
            self.refresh(&remote, timeout).await?;
            true
        } else {
            debug!(files = remote.len(), "Plugin cache up to date");
            false
        };

        self.synced = true;
        Ok(refreshed)
    }

    /// Coarse refresh: drop every identifier subtree, download every
    /// remote-listed file, then replace the manifest in one atomic write.
    async fn refresh(&self, remote: &BTreeMap<String, String>, timeout: Duration) -> Result<()> {
        self.clean_identifier_subtrees()?;

        for (rel_path, fingerprint) in remote {
            let bytes = self
                .source
                .fetch_file(rel_path, timeout)
                .await
                .map_err(|e| DoctorError::Sync(format!("download of {rel_path} failed: {e}")))?;

            if !verify_fingerprint(fingerprint, &bytes) {
                return Err(DoctorError::Sync(format!(
                    "downloaded {rel_path} does not match catalog fingerprint"
                )));
            }

            let local_path = self.cache_dir.join(rel_path);
            if let Some(parent) = local_path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| DoctorError::Sync(format!("creating {}: {e}", parent.display())))?;
            }
            fs::write(&local_path, &bytes)
                .map_err(|e| DoctorError::Sync(format!("writing {}: {e}", local_path.display())))?;
            debug!(path = %rel_path, "Downloaded plugin file");
        }

        // Only now that every download succeeded.
        LocalManifest::new(remote.clone())
            .save(&self.manifest_path())
            .map_err(|e| DoctorError::Sync(format!("persisting manifest: {e}")))?;

        info!(files = remote.len(), "Plugin cache refreshed");
        Ok(())
    }

    /// Delete every identifier-shaped subdirectory of the cache, leaving
    /// the manifest and anything else untouched.
    fn clean_identifier_subtrees(&self) -> Result<()> {
        if !self.cache_dir.exists() {
            fs::create_dir_all(&self.cache_dir)?;
            return Ok(());
        }
        for entry in fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if is_valid_identifier(name) {
                fs::remove_dir_all(&path)
                    .map_err(|e| DoctorError::Sync(format!("removing {}: {e}", path.display())))?;
            }
        }
        Ok(())
    }

    /// Identifiers of cached plugins whose subtree contains a valid entry
    /// file, sorted lexicographically for deterministic execution order.
    ///
    /// Fails with `Sync` in enforced mode before a successful
    /// `ensure_synced` call.
    pub fn cached_plugin_identifiers(&self) -> Result<Vec<String>> {
        if self.mode == SyncMode::Enforced && !self.synced {
            return Err(DoctorError::Sync(
                "enforced mode requires ensure_synced() before listing plugins".to_string(),
            ));
        }

        let mut identifiers = Vec::new();
        if self.cache_dir.exists() {
            for entry in fs::read_dir(&self.cache_dir)? {
                let entry = entry?;
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if is_valid_identifier(name) && path.join(ENTRY_FILE).is_file() {
                    identifiers.push(name.to_string());
                }
            }
        }
        identifiers.sort();
        Ok(identifiers)
    }

    /// Status snapshot for the `status` CLI command.
    pub fn sync_status(&self) -> SyncStatus {
        let manifest = LocalManifest::load(&self.manifest_path());
        SyncStatus {
            mode: self.mode,
            synced: self.is_synced(),
            last_sync: manifest.last_sync,
            file_count: manifest.files.len(),
        }
    }

    /// Cache directory this coordinator owns.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}
