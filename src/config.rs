//! Configuration for LogDoctor
//!
//! Loaded from `~/.logdoctor/config.json` (or an explicit path). All fields
//! have serde defaults so a missing or empty config file yields a usable
//! configuration pointing at the default plugin repository in enforced mode.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DoctorError, Result};

/// Operating mode for plugin synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Network freshness check is mandatory before any execution.
    /// A network failure is fatal to the run.
    Enforced,
    /// The on-disk cache is treated as authoritative; no network calls.
    /// Used for local plugin development.
    OfflineTrust,
}

impl Default for SyncMode {
    fn default() -> Self {
        SyncMode::Enforced
    }
}

/// Which catalog convention the remote repository follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogFlavor {
    /// Git tree listing API with per-blob fingerprints (default).
    GitTree,
    /// Flat JSON index of scripts with optional sha256 checksums.
    Index,
}

impl Default for CatalogFlavor {
    fn default() -> Self {
        CatalogFlavor::GitTree
    }
}

/// Location of the remote plugin repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Repository owner (user or organization).
    #[serde(default = "default_owner")]
    pub owner: String,

    /// Repository name.
    #[serde(default = "default_repo")]
    pub repo: String,

    /// Branch to sync from.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Explicit index URL for the flat-index catalog flavor. When unset,
    /// `<raw base>/index.json` is used.
    #[serde(default)]
    pub index_url: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            owner: default_owner(),
            repo: default_repo(),
            branch: default_branch(),
            index_url: None,
        }
    }
}

impl RemoteConfig {
    /// Base URL for raw file downloads.
    pub fn raw_base(&self) -> String {
        format!(
            "https://raw.githubusercontent.com/{}/{}/{}",
            self.owner, self.repo, self.branch
        )
    }

    /// Recursive git tree listing endpoint for the configured branch.
    pub fn tree_api(&self) -> String {
        format!(
            "https://api.github.com/repos/{}/{}/git/trees/{}?recursive=1",
            self.owner, self.repo, self.branch
        )
    }

    /// URL of the flat JSON index.
    pub fn index_url(&self) -> String {
        self.index_url
            .clone()
            .unwrap_or_else(|| format!("{}/index.json", self.raw_base()))
    }
}

/// AI log summarization settings (OpenAI-compatible endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Base URL of the chat-completions API.
    #[serde(default = "default_ai_url")]
    pub api_url: String,

    /// API key; the AI analyzer is considered unconfigured when empty.
    #[serde(default)]
    pub api_key: String,

    /// Model identifier.
    #[serde(default = "default_ai_model")]
    pub model: String,

    /// Completion token budget.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_url: default_ai_url(),
            api_key: String::new(),
            model: default_ai_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Top-level LogDoctor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Sync operating mode.
    #[serde(default)]
    pub mode: SyncMode,

    /// Catalog convention of the remote repository.
    #[serde(default)]
    pub catalog: CatalogFlavor,

    /// Remote repository location.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Plugin cache directory. Defaults to `~/.logdoctor/plugins`.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Timeout in seconds for catalog fetches and file downloads.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// AI summarization settings.
    #[serde(default)]
    pub ai: AiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: SyncMode::default(),
            catalog: CatalogFlavor::default(),
            remote: RemoteConfig::default(),
            cache_dir: default_cache_dir(),
            timeout_secs: default_timeout_secs(),
            ai: AiConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default path, falling back to defaults
    /// when the file does not exist.
    pub fn load_default() -> Result<Self> {
        Self::load(&default_config_path())
    }

    /// Load configuration from an explicit path. A missing file yields the
    /// default configuration; a malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| DoctorError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| DoctorError::Config(format!("Invalid config {}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Persist configuration as pretty-printed JSON, creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Plugin cache directory with `~` expanded.
    pub fn cache_dir(&self) -> PathBuf {
        expand_home(&self.cache_dir)
    }
}

/// Default on-disk location of the config file.
pub fn default_config_path() -> PathBuf {
    home_dir().join(".logdoctor").join("config.json")
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Expand a leading `~/` to the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        home_dir().join(rest)
    } else {
        PathBuf::from(path)
    }
}

fn default_owner() -> String {
    "logdoctor".to_string()
}

fn default_repo() -> String {
    "logdoctor-plugins".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_cache_dir() -> String {
    "~/.logdoctor/plugins".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_ai_url() -> String {
    "https://api.deepseek.com".to_string()
}

fn default_ai_model() -> String {
    "deepseek-chat".to_string()
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_temperature() -> f32 {
    0.1
}
