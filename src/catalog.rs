//! Remote plugin catalog clients.
//!
//! The sync coordinator talks to the remote repository through the
//! `RemoteSource` trait. Two catalog conventions are supported as adapters:
//!
//! - `GitTreeCatalog`: a recursive git tree listing with per-blob
//!   fingerprints, filtered to `scripts/<IDENTIFIER>/` entries.
//! - `IndexCatalog`: a flat JSON index `{"scripts": [...]}` with optional
//!   sha256 checksums per script.
//!
//! Neither adapter retries; retry policy belongs to the caller.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::RemoteConfig;
use crate::error::{DoctorError, Result};

/// Entry file each plugin directory must contain.
pub const ENTRY_FILE: &str = "check.json";

/// Optional remedy document per plugin directory.
pub const REMEDY_FILE: &str = "solution.md";

/// Remote tree prefix under which plugins live.
const TREE_PREFIX: &str = "scripts/";

/// Immutable description of one plugin file in the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    /// Stable plugin identifier (the directory name).
    pub identifier: String,
    /// Path relative to the plugin tree root, e.g. `E001/check.json`.
    pub source_path: String,
    /// Content fingerprint as reported by the catalog (opaque).
    pub fingerprint: String,
    /// Version label; the tree adapter uses an abbreviated fingerprint.
    pub version: String,
}

/// Authoritative source of plugin descriptors and file contents.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch the full descriptor set. Fails with `Network` on
    /// timeout/DNS/non-2xx and `CatalogFormat` on unparseable data.
    async fn fetch_catalog(&self, timeout: Duration) -> Result<Vec<PluginDescriptor>>;

    /// Download one file by its tree-relative path.
    async fn fetch_file(&self, source_path: &str, timeout: Duration) -> Result<Vec<u8>>;
}

// Identifiers double as cache directory names, so keep them
// filesystem-safe and short.
static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-]{0,63}$").unwrap());

/// True when `name` is acceptable as a plugin identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER_RE.is_match(name)
}

/// Verify downloaded bytes against a catalog fingerprint.
///
/// Only 64-hex fingerprints are treated as sha256 content hashes; anything
/// else (git blob shas, version labels) is opaque and passes unchecked.
pub fn verify_fingerprint(fingerprint: &str, bytes: &[u8]) -> bool {
    if fingerprint.len() != 64 || !fingerprint.chars().all(|c| c.is_ascii_hexdigit()) {
        return true;
    }
    let digest = hex::encode(Sha256::digest(bytes));
    digest.eq_ignore_ascii_case(fingerprint)
}

fn network_err(context: &str, err: reqwest::Error) -> DoctorError {
    if err.is_timeout() {
        DoctorError::Network(format!("{context}: request timed out"))
    } else {
        DoctorError::Network(format!("{context}: {err}"))
    }
}

async fn get_checked(
    client: &Client,
    url: &str,
    timeout: Duration,
    context: &str,
) -> Result<reqwest::Response> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| network_err(context, e))?;

    if !response.status().is_success() {
        return Err(DoctorError::Network(format!(
            "{context}: HTTP {} from {url}",
            response.status()
        )));
    }
    Ok(response)
}

// ---- git tree adapter ----

#[derive(Debug, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    sha: String,
    #[serde(rename = "type")]
    entry_type: String,
}

/// Catalog adapter for a git tree listing API.
pub struct GitTreeCatalog {
    client: Client,
    remote: RemoteConfig,
}

impl GitTreeCatalog {
    pub fn new(remote: RemoteConfig) -> Self {
        Self {
            client: Client::new(),
            remote,
        }
    }
}

/// Convert a tree listing into descriptors, keeping only blobs under
/// `scripts/<IDENTIFIER>/` named `check.json` or `solution.md`.
fn descriptors_from_tree(response: TreeResponse) -> Vec<PluginDescriptor> {
    let mut out = Vec::new();
    for entry in response.tree {
        if entry.entry_type != "blob" {
            continue;
        }
        let Some(rel_path) = entry.path.strip_prefix(TREE_PREFIX) else {
            continue;
        };
        let mut parts = rel_path.splitn(2, '/');
        let (Some(identifier), Some(file_name)) = (parts.next(), parts.next()) else {
            continue;
        };
        if !is_valid_identifier(identifier) {
            continue;
        }
        if file_name != ENTRY_FILE && file_name != REMEDY_FILE {
            continue;
        }
        let version = entry.sha.chars().take(7).collect();
        out.push(PluginDescriptor {
            identifier: identifier.to_string(),
            source_path: rel_path.to_string(),
            fingerprint: entry.sha,
            version,
        });
    }
    out
}

#[async_trait]
impl RemoteSource for GitTreeCatalog {
    async fn fetch_catalog(&self, timeout: Duration) -> Result<Vec<PluginDescriptor>> {
        let url = self.remote.tree_api();
        let response = get_checked(&self.client, &url, timeout, "catalog fetch").await?;
        let tree: TreeResponse = response
            .json()
            .await
            .map_err(|e| DoctorError::CatalogFormat(format!("invalid tree listing: {e}")))?;
        Ok(descriptors_from_tree(tree))
    }

    async fn fetch_file(&self, source_path: &str, timeout: Duration) -> Result<Vec<u8>> {
        let url = format!("{}/{}{}", self.remote.raw_base(), TREE_PREFIX, source_path);
        let response = get_checked(&self.client, &url, timeout, "file download").await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| network_err("file download", e))?;
        Ok(bytes.to_vec())
    }
}

// ---- flat index adapter ----

#[derive(Debug, Deserialize)]
struct IndexResponse {
    scripts: Vec<IndexEntry>,
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    name: String,
    filename: String,
    version: String,
    #[serde(default)]
    sha256: Option<String>,
}

/// Catalog adapter for a flat JSON script index.
///
/// The index carries no remedy documents; those are fetched on demand by
/// the remedy store, not synced.
pub struct IndexCatalog {
    client: Client,
    remote: RemoteConfig,
}

impl IndexCatalog {
    pub fn new(remote: RemoteConfig) -> Self {
        Self {
            client: Client::new(),
            remote,
        }
    }
}

fn descriptors_from_index(response: IndexResponse) -> Result<Vec<PluginDescriptor>> {
    let mut out = Vec::new();
    for entry in response.scripts {
        if !is_valid_identifier(&entry.name) {
            return Err(DoctorError::CatalogFormat(format!(
                "invalid script name '{}' in index",
                entry.name
            )));
        }
        let fingerprint = entry
            .sha256
            .clone()
            .unwrap_or_else(|| entry.version.clone());
        out.push(PluginDescriptor {
            source_path: format!("{}/{}", entry.name, entry.filename),
            identifier: entry.name,
            fingerprint,
            version: entry.version,
        });
    }
    Ok(out)
}

#[async_trait]
impl RemoteSource for IndexCatalog {
    async fn fetch_catalog(&self, timeout: Duration) -> Result<Vec<PluginDescriptor>> {
        let url = self.remote.index_url();
        let response = get_checked(&self.client, &url, timeout, "index fetch").await?;
        let index: IndexResponse = response
            .json()
            .await
            .map_err(|e| DoctorError::CatalogFormat(format!("invalid script index: {e}")))?;
        descriptors_from_index(index)
    }

    async fn fetch_file(&self, source_path: &str, timeout: Duration) -> Result<Vec<u8>> {
        let url = format!("{}/{}{}", self.remote.raw_base(), TREE_PREFIX, source_path);
        let response = get_checked(&self.client, &url, timeout, "file download").await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| network_err("file download", e))?;
        Ok(bytes.to_vec())
    }
}
