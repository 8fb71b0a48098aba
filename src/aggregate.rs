//! Batch analysis and result aggregation
//!
//! `Analyzer::run_all` drives the whole sync-then-execute pipeline within a
//! single task: ensure the cache is fresh, execute every cached plugin in
//! identifier order against the input directory, and merge the per-plugin
//! reports into one deduplicated `AnalysisReport`. Plugins run sequentially
//! because execution order determines dedup precedence and must stay
//! deterministic.
//!
//! Per-plugin failures are logged and skipped, never fatal to the batch.
//! Sync failures in enforced mode escape to the caller.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::Result;
use crate::plugins::runner::{discover_input_files, execute};
use crate::plugins::types::{AnalysisReport, Finding};
use crate::plugins::PluginLoader;
use crate::sync::SyncCoordinator;

/// Diagnostic code: no plugins resolved from the cache.
pub const NO_PLUGINS_CODE: &str = "SYS000";

/// Diagnostic code: no analyzable files under the input directory.
pub const NO_INPUT_CODE: &str = "SYS001";

/// Runs the full plugin set and merges findings.
pub struct Analyzer {
    coordinator: SyncCoordinator,
    loader: PluginLoader,
    timeout: Duration,
}

impl Analyzer {
    /// Build an analyzer over a coordinator; the loader shares the
    /// coordinator's cache directory.
    pub fn new(coordinator: SyncCoordinator, timeout: Duration) -> Self {
        let loader = PluginLoader::new(coordinator.cache_dir().to_path_buf());
        Self {
            coordinator,
            loader,
            timeout,
        }
    }

    /// Access to the owned coordinator (status displays).
    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    /// Ensure sync without running an analysis (the `sync` CLI command).
    pub async fn ensure_synced(&mut self) -> Result<bool> {
        let refreshed = self.coordinator.ensure_synced(self.timeout).await?;
        if refreshed {
            self.loader.invalidate_all();
        }
        Ok(refreshed)
    }

    /// Run every cached plugin against `input_dir` and merge the results.
    ///
    /// Zero plugins or zero input files is a normal empty-result outcome
    /// reported through a single diagnostic finding, not an error. The only
    /// error path is a sync failure in enforced mode.
    pub async fn run_all(&mut self, input_dir: &Path) -> Result<AnalysisReport> {
        let refreshed = self.coordinator.ensure_synced(self.timeout).await?;
        if refreshed {
            self.loader.invalidate_all();
        }

        let identifiers = self.coordinator.cached_plugin_identifiers()?;
        if identifiers.is_empty() {
            return Ok(diagnostic_report(
                NO_PLUGINS_CODE,
                "No analysis plugins available",
                format!(
                    "the plugin cache at {} contains no usable plugins",
                    self.coordinator.cache_dir().display()
                ),
                "no analysis plugins available",
            ));
        }

        let input_files = discover_input_files(input_dir);
        if input_files.is_empty() {
            return Ok(diagnostic_report(
                NO_INPUT_CODE,
                "No input files found",
                format!(
                    "no .log or .txt files found under {}",
                    input_dir.display()
                ),
                "no analyzable input files",
            ));
        }
        info!(
            plugins = identifiers.len(),
            input_files = input_files.len(),
            "Starting analysis batch"
        );

        let mut seen: HashSet<String> = HashSet::new();
        let mut findings: Vec<Finding> = Vec::new();
        let mut summaries: Vec<String> = Vec::new();
        let mut raw_data: Map<String, Value> = Map::new();

        for identifier in &identifiers {
            let handle = match self.loader.load(identifier) {
                Ok(handle) => handle,
                Err(e) => {
                    // A plugin that cannot be used is skipped, not fatal.
                    warn!(plugin = %identifier, error = %e, "Skipping unloadable plugin");
                    continue;
                }
            };

            let report = match execute(handle, input_dir).await {
                Ok(report) => report,
                Err(e) => {
                    warn!(plugin = %identifier, error = %e, "Plugin execution failed, skipping");
                    continue;
                }
            };

            for finding in report.findings {
                if seen.insert(finding.code.clone()) {
                    findings.push(finding);
                }
            }
            if !report.summary.is_empty() {
                summaries.push(format!("{identifier}: {}", report.summary));
            }
            if !report.raw_data.is_empty() {
                raw_data.insert(identifier.clone(), Value::Object(report.raw_data));
            }
        }

        let succeeded = findings.is_empty();
        info!(findings = findings.len(), succeeded, "Analysis batch finished");

        Ok(AnalysisReport {
            succeeded,
            findings,
            summary: summaries.join("; "),
            raw_data,
        })
    }
}

fn diagnostic_report(
    code: &str,
    title: &str,
    detail: String,
    summary: &str,
) -> AnalysisReport {
    AnalysisReport {
        succeeded: false,
        findings: vec![Finding {
            code: code.to_string(),
            title: title.to_string(),
            detail,
            has_remedy: false,
        }],
        summary: summary.to_string(),
        raw_data: Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{PluginDescriptor, RemoteSource, ENTRY_FILE};
    use crate::config::SyncMode;
    use crate::error::DoctorError;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Offline tests never reach the network; this source proves it by
    /// failing loudly if they do.
    struct UnreachableSource;

    #[async_trait]
    impl RemoteSource for UnreachableSource {
        async fn fetch_catalog(&self, _t: Duration) -> Result<Vec<PluginDescriptor>> {
            panic!("offline-trust analyzer must not fetch the catalog");
        }
        async fn fetch_file(&self, _p: &str, _t: Duration) -> Result<Vec<u8>> {
            panic!("offline-trust analyzer must not download files");
        }
    }

    fn offline_analyzer(cache: &Path) -> Analyzer {
        let coordinator = SyncCoordinator::new(
            Arc::new(UnreachableSource),
            cache.to_path_buf(),
            SyncMode::OfflineTrust,
        );
        Analyzer::new(coordinator, Duration::from_secs(5))
    }

    fn write_rule_plugin(cache: &Path, identifier: &str, rules_json: &str) {
        let dir = cache.join(identifier);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(ENTRY_FILE), format!(r#"{{"rules": {rules_json}}}"#)).unwrap();
    }

    fn input_dir(content: &str) -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("gui.log"), content).unwrap();
        tmp
    }

    #[tokio::test]
    async fn test_no_plugins_diagnostic() {
        let cache = TempDir::new().unwrap();
        let input = input_dir("some log content");

        let mut analyzer = offline_analyzer(cache.path());
        let report = analyzer.run_all(input.path()).await.unwrap();

        assert!(!report.succeeded);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].code, NO_PLUGINS_CODE);
    }

    #[tokio::test]
    async fn test_no_input_files_diagnostic() {
        let cache = TempDir::new().unwrap();
        write_rule_plugin(
            cache.path(),
            "E001",
            r#"[{"code": "E001", "title": "t", "pattern": "x"}]"#,
        );
        let input = TempDir::new().unwrap(); // empty

        let mut analyzer = offline_analyzer(cache.path());
        let report = analyzer.run_all(input.path()).await.unwrap();

        assert!(!report.succeeded);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].code, NO_INPUT_CODE);
    }

    #[tokio::test]
    async fn test_dedup_first_occurrence_wins() {
        let cache = TempDir::new().unwrap();
        // P1 emits A and B; P2 emits B and C. Execution order is
        // lexicographic, so B's content must come from P1.
        write_rule_plugin(
            cache.path(),
            "P1",
            r#"[
                {"code": "A", "title": "A from P1", "pattern": "log"},
                {"code": "B", "title": "B from P1", "pattern": "log"}
            ]"#,
        );
        write_rule_plugin(
            cache.path(),
            "P2",
            r#"[
                {"code": "B", "title": "B from P2", "pattern": "log"},
                {"code": "C", "title": "C from P2", "pattern": "log"}
            ]"#,
        );
        let input = input_dir("log content matching everything");

        let mut analyzer = offline_analyzer(cache.path());
        let report = analyzer.run_all(input.path()).await.unwrap();

        let codes: Vec<&str> = report.findings.iter().map(|f| f.code.as_str()).collect();
        assert_eq!(codes, vec!["A", "B", "C"]);
        assert_eq!(report.findings[1].title, "B from P1");
        assert!(!report.succeeded);
    }

    #[tokio::test]
    async fn test_clean_run_succeeds() {
        let cache = TempDir::new().unwrap();
        write_rule_plugin(
            cache.path(),
            "E001",
            r#"[{"code": "E001", "title": "t", "pattern": "zzz-never-matches"}]"#,
        );
        let input = input_dir("healthy log");

        let mut analyzer = offline_analyzer(cache.path());
        let report = analyzer.run_all(input.path()).await.unwrap();

        assert!(report.succeeded);
        assert!(report.findings.is_empty());
    }

    #[tokio::test]
    async fn test_unloadable_plugin_skipped_batch_continues() {
        let cache = TempDir::new().unwrap();
        // Malformed entry file.
        let bad = cache.path().join("A-bad");
        fs::create_dir_all(&bad).unwrap();
        fs::write(bad.join(ENTRY_FILE), "{ broken").unwrap();
        write_rule_plugin(
            cache.path(),
            "B-good",
            r#"[{"code": "E001", "title": "t", "pattern": "log"}]"#,
        );
        let input = input_dir("log content");

        let mut analyzer = offline_analyzer(cache.path());
        let report = analyzer.run_all(input.path()).await.unwrap();

        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].code, "E001");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_plugin_skipped_batch_continues() {
        let cache = TempDir::new().unwrap();
        // Execution order: "A-fail" before "B-good". The failure must not
        // block the rest of the batch and records nothing.
        let fail_dir = cache.path().join("A-fail");
        fs::create_dir_all(&fail_dir).unwrap();
        fs::write(fail_dir.join(ENTRY_FILE), r#"{"command": "false"}"#).unwrap();
        write_rule_plugin(
            cache.path(),
            "B-good",
            r#"[{"code": "E001", "title": "t", "pattern": "log"}]"#,
        );
        let input = input_dir("log content");

        let mut analyzer = offline_analyzer(cache.path());
        let report = analyzer.run_all(input.path()).await.unwrap();

        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].code, "E001");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_malformed_result_degrades_and_batch_completes() {
        use std::os::unix::fs::PermissionsExt;

        let cache = TempDir::new().unwrap();
        let bad_dir = cache.path().join("A-garbled");
        fs::create_dir_all(&bad_dir).unwrap();
        let script = bad_dir.join("garbled.sh");
        fs::write(&script, "#!/bin/sh\necho '{\"success\": \"not-a-bool\"}'\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(
            bad_dir.join(ENTRY_FILE),
            format!(r#"{{"command": "{}"}}"#, script.display()),
        )
        .unwrap();
        write_rule_plugin(
            cache.path(),
            "B-good",
            r#"[{"code": "E001", "title": "t", "pattern": "log"}]"#,
        );
        let input = input_dir("log content");

        let mut analyzer = offline_analyzer(cache.path());
        let report = analyzer.run_all(input.path()).await.unwrap();

        let codes: Vec<&str> = report.findings.iter().map(|f| f.code.as_str()).collect();
        assert_eq!(codes, vec!["SYS002:A-garbled", "E001"]);
        assert!(!report.succeeded);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_summaries_prefixed_by_identifier() {
        use std::os::unix::fs::PermissionsExt;

        let cache = TempDir::new().unwrap();
        for (id, summary) in [("P1", "first"), ("P2", "second")] {
            let dir = cache.path().join(id);
            fs::create_dir_all(&dir).unwrap();
            let script = dir.join("run.sh");
            fs::write(
                &script,
                format!(
                    "#!/bin/sh\necho '{{\"success\": true, \"findings\": [], \"summary\": \"{summary}\"}}'\n"
                ),
            )
            .unwrap();
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
            fs::write(
                dir.join(ENTRY_FILE),
                format!(r#"{{"command": "{}"}}"#, script.display()),
            )
            .unwrap();
        }
        let input = input_dir("log content");

        let mut analyzer = offline_analyzer(cache.path());
        let report = analyzer.run_all(input.path()).await.unwrap();

        assert_eq!(report.summary, "P1: first; P2: second");
        assert!(report.succeeded);
    }

    #[tokio::test]
    async fn test_enforced_sync_failure_escapes() {
        struct DeadSource;

        #[async_trait]
        impl RemoteSource for DeadSource {
            async fn fetch_catalog(&self, _t: Duration) -> Result<Vec<PluginDescriptor>> {
                Err(DoctorError::Network("unreachable".to_string()))
            }
            async fn fetch_file(&self, _p: &str, _t: Duration) -> Result<Vec<u8>> {
                Err(DoctorError::Network("unreachable".to_string()))
            }
        }

        let cache = TempDir::new().unwrap();
        let input = input_dir("log content");
        let coordinator = SyncCoordinator::new(
            Arc::new(DeadSource),
            cache.path().to_path_buf(),
            SyncMode::Enforced,
        );
        let mut analyzer = Analyzer::new(coordinator, Duration::from_secs(5));

        let result = analyzer.run_all(input.path()).await;
        assert!(matches!(result, Err(DoctorError::Sync(_))));
    }
}
