//! Remedy document lookup
//!
//! Remedy documents are markdown files keyed by finding code. The store
//! serves them from the synced plugin cache (`<cache>/<IDENTIFIER>/
//! solution.md`) when present, and otherwise fetches them on demand from
//! the remote source; the flat-index catalog flavor never syncs remedy
//! documents, so the remote path is its only source. Content is cached in
//! memory and passed through untouched, rendering is the presentation
//! layer's concern.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::catalog::{RemoteSource, REMEDY_FILE};
use crate::error::{DoctorError, Result};

/// Reads and caches remedy documents by finding code.
pub struct RemedyStore {
    cache_dir: PathBuf,
    source: Option<Arc<dyn RemoteSource>>,
    timeout: Duration,
    loaded: HashMap<String, String>,
}

impl RemedyStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            source: None,
            timeout: Duration::from_secs(30),
            loaded: HashMap::new(),
        }
    }

    /// Enable on-demand remote fetches for codes missing from the local
    /// cache.
    pub fn with_source(mut self, source: Arc<dyn RemoteSource>, timeout: Duration) -> Self {
        self.source = Some(source);
        self.timeout = timeout;
        self
    }

    /// Fetch the remedy document for a finding code: local cache first,
    /// then the remote source when one is configured.
    ///
    /// # Errors
    /// `NotFound` when no remedy document exists for the code locally and
    /// no remote source is configured; remote failures propagate as-is.
    pub async fn fetch(&mut self, code: &str) -> Result<&str> {
        if !self.loaded.contains_key(code) {
            let content = self.read_or_download(code).await?;
            self.loaded.insert(code.to_string(), content);
        }
        Ok(&self.loaded[code])
    }

    async fn read_or_download(&self, code: &str) -> Result<String> {
        let path = self.cache_dir.join(code).join(REMEDY_FILE);
        if path.exists() {
            return Ok(fs::read_to_string(&path)?);
        }

        if let Some(source) = &self.source {
            debug!(code, "Remedy not in local cache, fetching from remote");
            let rel = format!("{code}/{REMEDY_FILE}");
            let bytes = source.fetch_file(&rel, self.timeout).await?;
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }

        Err(DoctorError::NotFound(format!(
            "no remedy document for '{code}' at {}",
            path.display()
        )))
    }

    /// Drop the in-memory cache (after a plugin cache refresh).
    pub fn clear(&mut self) {
        self.loaded.clear();
    }
}
