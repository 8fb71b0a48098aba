//! Plugin execution
//!
//! Runs a loaded plugin against an input directory and normalizes whatever
//! it produces into a `PluginReport`. A malformed result shape degrades to a
//! single synthetic finding instead of failing, so one bad plugin cannot
//! abort a batch; genuine execution failures (spawn errors, non-zero exit,
//! timeout) surface as `Execution` for the aggregator to skip.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{DoctorError, Result};

use super::loader::{CompiledRule, EntryCapability, PluginHandle};
use super::types::{format_error_finding, normalize_report, Finding, PluginReport};

/// File extensions accepted as analyzable input.
pub const INPUT_EXTENSIONS: &[&str] = &["log", "txt"];

/// Environment variable carrying the input directory for command plugins,
/// in addition to the final positional argument.
const INPUT_DIR_ENV: &str = "LOGDOCTOR_INPUT_DIR";

/// Recursively collect input files with accepted extensions, sorted for
/// deterministic rule evaluation.
pub fn discover_input_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    collect_files(dir, &mut files);
    files.sort();
    files
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        // Never follow symlinks; a cyclic link in a user-supplied bundle
        // must not recurse forever.
        if file_type.is_symlink() {
            continue;
        }
        let path = entry.path();
        if file_type.is_dir() {
            collect_files(&path, out);
        } else if has_input_extension(&path) {
            out.push(path);
        }
    }
}

fn has_input_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| INPUT_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

/// Execute a loaded plugin against `input_dir`.
///
/// # Errors
/// - `ContractViolation` when the entry file exposes no capability
/// - `Execution` when a command plugin fails to spawn, exits non-zero,
///   or exceeds its timeout
pub async fn execute(handle: &PluginHandle, input_dir: &Path) -> Result<PluginReport> {
    match &handle.capability {
        EntryCapability::Rules(rules) => Ok(run_rules(&handle.identifier, rules, input_dir)),
        EntryCapability::Command {
            command,
            timeout_secs,
        } => run_command(handle, command, *timeout_secs, input_dir).await,
        EntryCapability::Missing => Err(DoctorError::ContractViolation(format!(
            "plugin '{}' exposes neither a rule list nor a command",
            handle.identifier
        ))),
    }
}

/// Evaluate rule-capability plugins in-process. Each rule fires at most
/// once, on the first input file whose content matches.
fn run_rules(identifier: &str, rules: &[CompiledRule], input_dir: &Path) -> PluginReport {
    let files = discover_input_files(input_dir);
    let mut findings: Vec<Finding> = Vec::new();

    for rule in rules {
        for file in &files {
            if let Some(required) = &rule.def.file_name {
                let matches_name = file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.eq_ignore_ascii_case(required))
                    .unwrap_or(false);
                if !matches_name {
                    continue;
                }
            }
            let Ok(content) = fs::read_to_string(file) else {
                debug!(file = %file.display(), "Skipping unreadable input file");
                continue;
            };
            if rule.pattern.is_match(&content) {
                findings.push(Finding {
                    code: rule.def.code.clone(),
                    title: rule.def.title.clone(),
                    detail: rule.def.detail.clone(),
                    has_remedy: rule.def.has_remedy,
                });
                break;
            }
        }
    }

    PluginReport {
        success: findings.is_empty(),
        findings,
        summary: String::new(),
        raw_data: serde_json::Map::new(),
    }
}

/// Spawn a command plugin and normalize its stdout.
async fn run_command(
    handle: &PluginHandle,
    command: &str,
    timeout_secs: u64,
    input_dir: &Path,
) -> Result<PluginReport> {
    let mut parts = command.split_whitespace();
    let program = parts.next().ok_or_else(|| {
        DoctorError::Execution(format!("plugin '{}' has an empty command", handle.identifier))
    })?;

    let mut cmd = Command::new(program);
    cmd.args(parts)
        .arg(input_dir)
        .env(INPUT_DIR_ENV, input_dir)
        .current_dir(&handle.dir)
        .kill_on_drop(true);

    let output = timeout(Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| {
            DoctorError::Execution(format!(
                "plugin '{}' timed out after {}s",
                handle.identifier, timeout_secs
            ))
        })?
        .map_err(|e| {
            DoctorError::Execution(format!(
                "plugin '{}' failed to spawn '{}': {}",
                handle.identifier, program, e
            ))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DoctorError::Execution(format!(
            "plugin '{}' exited with {}: {}",
            handle.identifier,
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(PluginReport::healthy(""));
    }

    let normalized = serde_json::from_str::<serde_json::Value>(trimmed)
        .map_err(|e| {
            DoctorError::ResultFormat(format!(
                "plugin '{}' produced invalid JSON: {}",
                handle.identifier, e
            ))
        })
        .and_then(|value| normalize_report(&handle.identifier, value));

    match normalized {
        Ok(report) => Ok(report),
        Err(err @ DoctorError::ResultFormat(_)) => {
            // A bad shape is the plugin's problem, not the batch's.
            warn!(plugin = %handle.identifier, error = %err, "Degrading malformed plugin result");
            Ok(PluginReport::single(
                format_error_finding(&handle.identifier, &err),
                "",
            ))
        }
        Err(err) => Err(err),
    }
}
