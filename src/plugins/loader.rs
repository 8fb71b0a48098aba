//! Plugin loading and entry-capability resolution
//!
//! A cached plugin is a directory `<cache>/<IDENTIFIER>/` containing a
//! `check.json` entry file. The file's capability is resolved by inspecting
//! its keys, not its name:
//!
//! - `"rules"`: declarative regex rules evaluated in-process against the
//!   input files;
//! - `"command"`: an external program spawned with the input directory as
//!   its final argument, reporting JSON on stdout.
//!
//! Loaded handles live in an explicit map owned by the loader. Reloading an
//! identifier replaces the prior handle, and the sync layer invalidates
//! handles after a cache refresh, so a refresh never requires a process
//! restart. Every load compiles a fresh state; nothing is shared between
//! plugin handles.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crate::catalog::ENTRY_FILE;
use crate::error::{DoctorError, Result};

/// One declarative rule within a rule-capability entry file.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleDef {
    /// Finding code emitted when the rule matches.
    pub code: String,

    /// Finding title.
    pub title: String,

    /// Finding detail template; may be empty.
    #[serde(default)]
    pub detail: String,

    /// Whether a remedy document exists for the code.
    #[serde(default = "default_true", alias = "has_solution")]
    pub has_remedy: bool,

    /// Regex matched against input file contents.
    pub pattern: String,

    /// Restrict the rule to files with this exact name (case-insensitive).
    /// When unset the rule runs against every discovered input file.
    #[serde(default)]
    pub file_name: Option<String>,
}

fn default_true() -> bool {
    true
}

/// A rule with its pattern compiled at load time.
#[derive(Debug)]
pub struct CompiledRule {
    pub def: RuleDef,
    pub pattern: Regex,
}

/// The entry capability a cached plugin exposes.
#[derive(Debug)]
pub enum EntryCapability {
    /// In-process regex rules.
    Rules(Vec<CompiledRule>),

    /// External command, input directory appended as the final argument.
    Command { command: String, timeout_secs: u64 },

    /// The entry file parsed but exposes neither capability. Kept loadable
    /// so the violation is attributed at execution time to the one plugin
    /// that caused it.
    Missing,
}

/// A loaded plugin ready for execution.
#[derive(Debug)]
pub struct PluginHandle {
    pub identifier: String,
    pub dir: PathBuf,
    pub capability: EntryCapability,
}

/// Raw entry file shape before capability resolution.
#[derive(Debug, Deserialize)]
struct EntryFile {
    #[serde(default)]
    rules: Option<Vec<RuleDef>>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Loads cached plugins and owns the identifier-to-handle map.
pub struct PluginLoader {
    cache_dir: PathBuf,
    handles: HashMap<String, PluginHandle>,
}

impl PluginLoader {
    /// Create a loader over the given plugin cache directory.
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            handles: HashMap::new(),
        }
    }

    /// Load (or reload) the plugin with the given identifier.
    ///
    /// Idempotent per identifier: any previously loaded handle is replaced.
    ///
    /// # Errors
    /// - `NotFound` if the entry file does not exist
    /// - `Load` if the entry file is malformed JSON, a rule pattern does not
    ///   compile, or a command contains shell-chaining operators
    pub fn load(&mut self, identifier: &str) -> Result<&PluginHandle> {
        let dir = self.cache_dir.join(identifier);
        let entry_path = dir.join(ENTRY_FILE);

        if !entry_path.exists() {
            return Err(DoctorError::NotFound(format!(
                "no {} for plugin '{}' at {}",
                ENTRY_FILE,
                identifier,
                entry_path.display()
            )));
        }

        let content = fs::read_to_string(&entry_path).map_err(|e| {
            DoctorError::Load(format!("failed to read {}: {}", entry_path.display(), e))
        })?;

        let entry: EntryFile = serde_json::from_str(&content).map_err(|e| {
            DoctorError::Load(format!(
                "malformed entry file for plugin '{identifier}': {e}"
            ))
        })?;

        let capability = resolve_capability(identifier, entry)?;
        if matches!(capability, EntryCapability::Missing) {
            warn!(plugin = %identifier, "Entry file exposes no capability");
        }

        let handle = PluginHandle {
            identifier: identifier.to_string(),
            dir,
            capability,
        };

        info!(plugin = %identifier, "Loaded plugin");
        // Replaces any prior handle for this identifier.
        self.handles.insert(identifier.to_string(), handle);
        Ok(&self.handles[identifier])
    }

    /// Get an already-loaded handle.
    pub fn get(&self, identifier: &str) -> Option<&PluginHandle> {
        self.handles.get(identifier)
    }

    /// Drop the handle for one identifier. Returns whether one existed.
    pub fn invalidate(&mut self, identifier: &str) -> bool {
        self.handles.remove(identifier).is_some()
    }

    /// Drop every loaded handle (used after a cache refresh).
    pub fn invalidate_all(&mut self) {
        self.handles.clear();
    }

    /// Number of currently loaded handles.
    pub fn loaded_count(&self) -> usize {
        self.handles.len()
    }
}

fn resolve_capability(identifier: &str, entry: EntryFile) -> Result<EntryCapability> {
    if let Some(rules) = entry.rules {
        if rules.is_empty() {
            return Err(DoctorError::Load(format!(
                "plugin '{identifier}' declares an empty rule list"
            )));
        }
        let mut compiled = Vec::with_capacity(rules.len());
        for def in rules {
            let pattern = Regex::new(&def.pattern).map_err(|e| {
                DoctorError::Load(format!(
                    "plugin '{identifier}' rule '{}' has an invalid pattern: {e}",
                    def.code
                ))
            })?;
            compiled.push(CompiledRule { def, pattern });
        }
        return Ok(EntryCapability::Rules(compiled));
    }

    if let Some(command) = entry.command {
        validate_command_safety(&command, identifier)?;
        return Ok(EntryCapability::Command {
            command,
            timeout_secs: entry.timeout_secs.unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
        });
    }

    Ok(EntryCapability::Missing)
}

/// Check a command for dangerous shell operators.
///
/// Rejects commands containing `&&`, `||`, `;`, `|`, or backticks so a
/// synced entry file cannot chain arbitrary extra commands.
fn validate_command_safety(command: &str, identifier: &str) -> Result<()> {
    let dangerous_patterns: &[(&str, &str)] = &[
        ("&&", "command chaining (&&)"),
        ("||", "conditional chaining (||)"),
        (";", "command separator (;)"),
        ("`", "backtick execution"),
    ];

    for (pattern, description) in dangerous_patterns {
        if command.contains(pattern) {
            return Err(DoctorError::Load(format!(
                "plugin '{identifier}' command contains dangerous pattern: {description}"
            )));
        }
    }

    // `||` is already caught above; reject any remaining single pipe.
    if command.contains('|') {
        return Err(DoctorError::Load(format!(
            "plugin '{identifier}' command contains dangerous pattern: pipe operator (|)"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_entry(cache: &Path, identifier: &str, content: &str) {
        let dir = cache.join(identifier);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(ENTRY_FILE), content).unwrap();
    }

    const RULE_ENTRY: &str = r#"{
        "rules": [
            {"code": "E001", "title": "Connection refused",
             "pattern": "connection refused", "file_name": "gui.log"}
        ]
    }"#;

    #[test]
    fn test_load_rule_plugin() {
        let tmp = TempDir::new().unwrap();
        write_entry(tmp.path(), "E001", RULE_ENTRY);

        let mut loader = PluginLoader::new(tmp.path().to_path_buf());
        let handle = loader.load("E001").unwrap();

        assert_eq!(handle.identifier, "E001");
        match &handle.capability {
            EntryCapability::Rules(rules) => {
                assert_eq!(rules.len(), 1);
                assert_eq!(rules[0].def.code, "E001");
                assert!(rules[0].pattern.is_match("connection refused by peer"));
            }
            other => panic!("expected rules capability, got {other:?}"),
        }
    }

    #[test]
    fn test_load_command_plugin() {
        let tmp = TempDir::new().unwrap();
        write_entry(
            tmp.path(),
            "probe",
            r#"{"command": "log-probe --json", "timeout_secs": 5}"#,
        );

        let mut loader = PluginLoader::new(tmp.path().to_path_buf());
        let handle = loader.load("probe").unwrap();
        match &handle.capability {
            EntryCapability::Command {
                command,
                timeout_secs,
            } => {
                assert_eq!(command, "log-probe --json");
                assert_eq!(*timeout_secs, 5);
            }
            other => panic!("expected command capability, got {other:?}"),
        }
    }

    #[test]
    fn test_command_timeout_default() {
        let tmp = TempDir::new().unwrap();
        write_entry(tmp.path(), "probe", r#"{"command": "log-probe"}"#);

        let mut loader = PluginLoader::new(tmp.path().to_path_buf());
        let handle = loader.load("probe").unwrap();
        match &handle.capability {
            EntryCapability::Command { timeout_secs, .. } => assert_eq!(*timeout_secs, 30),
            other => panic!("expected command capability, got {other:?}"),
        }
    }

    #[test]
    fn test_load_missing_plugin_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let mut loader = PluginLoader::new(tmp.path().to_path_buf());
        let result = loader.load("ghost");
        assert!(matches!(result, Err(DoctorError::NotFound(_))));
    }

    #[test]
    fn test_load_malformed_json_is_load_error() {
        let tmp = TempDir::new().unwrap();
        write_entry(tmp.path(), "E001", "{ broken");

        let mut loader = PluginLoader::new(tmp.path().to_path_buf());
        let result = loader.load("E001");
        assert!(matches!(result, Err(DoctorError::Load(_))));
    }

    #[test]
    fn test_load_bad_regex_is_load_error() {
        let tmp = TempDir::new().unwrap();
        write_entry(
            tmp.path(),
            "E001",
            r#"{"rules": [{"code": "E001", "title": "t", "pattern": "(unclosed"}]}"#,
        );

        let mut loader = PluginLoader::new(tmp.path().to_path_buf());
        let result = loader.load("E001");
        assert!(matches!(result, Err(DoctorError::Load(_))));
    }

    #[test]
    fn test_load_empty_rules_is_load_error() {
        let tmp = TempDir::new().unwrap();
        write_entry(tmp.path(), "E001", r#"{"rules": []}"#);

        let mut loader = PluginLoader::new(tmp.path().to_path_buf());
        assert!(matches!(loader.load("E001"), Err(DoctorError::Load(_))));
    }

    #[test]
    fn test_load_dangerous_command_is_load_error() {
        let tmp = TempDir::new().unwrap();
        for command in [
            "probe && rm -rf /",
            "probe || fallback",
            "probe; evil",
            "probe `whoami`",
            "cat x | grep y",
        ] {
            write_entry(
                tmp.path(),
                "bad",
                &format!(r#"{{"command": "{command}"}}"#),
            );
            let mut loader = PluginLoader::new(tmp.path().to_path_buf());
            let result = loader.load("bad");
            assert!(
                matches!(result, Err(DoctorError::Load(_))),
                "command should be rejected: {command}"
            );
        }
    }

    #[test]
    fn test_load_no_capability_is_missing() {
        let tmp = TempDir::new().unwrap();
        write_entry(tmp.path(), "empty", r#"{"description": "nothing here"}"#);

        let mut loader = PluginLoader::new(tmp.path().to_path_buf());
        let handle = loader.load("empty").unwrap();
        assert!(matches!(handle.capability, EntryCapability::Missing));
    }

    #[test]
    fn test_reload_replaces_handle() {
        let tmp = TempDir::new().unwrap();
        write_entry(tmp.path(), "E001", RULE_ENTRY);

        let mut loader = PluginLoader::new(tmp.path().to_path_buf());
        loader.load("E001").unwrap();
        assert_eq!(loader.loaded_count(), 1);

        // Cache refresh rewrites the entry file; reload must pick it up.
        write_entry(
            tmp.path(),
            "E001",
            r#"{"rules": [
                {"code": "E001", "title": "t", "pattern": "a"},
                {"code": "E001b", "title": "t2", "pattern": "b"}
            ]}"#,
        );
        let handle = loader.load("E001").unwrap();
        match &handle.capability {
            EntryCapability::Rules(rules) => assert_eq!(rules.len(), 2),
            other => panic!("expected rules capability, got {other:?}"),
        }
        assert_eq!(loader.loaded_count(), 1);
    }

    #[test]
    fn test_invalidate() {
        let tmp = TempDir::new().unwrap();
        write_entry(tmp.path(), "E001", RULE_ENTRY);

        let mut loader = PluginLoader::new(tmp.path().to_path_buf());
        loader.load("E001").unwrap();

        assert!(loader.invalidate("E001"));
        assert!(loader.get("E001").is_none());
        assert!(!loader.invalidate("E001"));
    }

    #[test]
    fn test_invalidate_all() {
        let tmp = TempDir::new().unwrap();
        write_entry(tmp.path(), "E001", RULE_ENTRY);
        write_entry(tmp.path(), "E002", r#"{"command": "true"}"#);

        let mut loader = PluginLoader::new(tmp.path().to_path_buf());
        loader.load("E001").unwrap();
        loader.load("E002").unwrap();
        assert_eq!(loader.loaded_count(), 2);

        loader.invalidate_all();
        assert_eq!(loader.loaded_count(), 0);
    }
}
