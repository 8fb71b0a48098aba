//! AI log summarization
//!
//! A stateless helper that extracts ERR/WRN records from the input logs and
//! asks an OpenAI-compatible chat endpoint to summarize them into the same
//! report shape the plugins produce. This is an independent producer: its
//! report is never merged with the rule-based batch, the caller picks one
//! path or the other.
//!
//! Every failure mode (unconfigured client, API error, non-JSON reply)
//! degrades to a report carrying an `AI00x` finding; `summarize` never
//! errors out to the caller.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::AiConfig;
use crate::error::{DoctorError, Result};
use crate::plugins::types::{normalize_report, Finding, PluginReport};

/// Log file the error extraction runs against.
const TARGET_LOG_NAME: &str = "gui.log";

/// Cap on deduplicated records included in the prompt.
const MAX_PROMPT_RECORDS: usize = 15;

/// Record header: `[2024-05-01 12:00:00.123][ERR][module] ...`
static RECORD_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{3}\]\[([A-Z]{3})\]").unwrap()
});

/// AI log analyzer over an OpenAI-compatible chat-completions API.
pub struct AiAnalyzer {
    config: AiConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl AiAnalyzer {
    pub fn new(config: AiConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    /// Whether an API URL and key are configured.
    pub fn is_configured(&self) -> bool {
        !self.config.api_url.is_empty() && !self.config.api_key.is_empty()
    }

    /// Summarize the ERR/WRN records under `log_dir` into a report.
    pub async fn summarize(&self, log_dir: &Path) -> PluginReport {
        if !self.is_configured() {
            return ai_finding_report(
                "AI001",
                "AI analyzer not configured",
                "set the API URL and API key in the config file".to_string(),
            );
        }

        let records = extract_error_records(log_dir);
        if records.is_empty() {
            return PluginReport::healthy("AI analysis: no ERR/WRN records found");
        }

        let total = records.len();
        let mut seen = HashSet::new();
        let unique: Vec<&String> = records.iter().filter(|r| seen.insert(r.as_str())).collect();
        let prompt = build_prompt(&unique, total);

        match self.call_api(&prompt).await {
            Ok(reply) => parse_ai_reply(&reply, total),
            Err(e) => {
                warn!(error = %e, "AI analysis request failed");
                ai_finding_report("AI002", "AI analysis failed", e.to_string())
            }
        }
    }

    async fn call_api(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.api_url.trim_end_matches('/')
        );
        let payload = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": "You are an expert log analyst."},
                {"role": "user", "content": prompt}
            ],
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send()
            .await
            .map_err(|e| DoctorError::Network(format!("AI request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(DoctorError::Network(format!(
                "AI endpoint returned HTTP {}",
                response.status()
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| DoctorError::ResultFormat(format!("unexpected AI response body: {e}")))?;
        chat.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| DoctorError::ResultFormat("AI response has no choices".to_string()))
    }
}

/// Collect ERR/WRN records from every `gui.log` under `dir`. A record runs
/// from its header line until the next header line.
fn extract_error_records(dir: &Path) -> Vec<String> {
    let mut logs = Vec::new();
    find_target_logs(dir, &mut logs);

    let mut records = Vec::new();
    for path in logs {
        let Ok(content) = fs::read_to_string(&path) else {
            debug!(file = %path.display(), "Skipping unreadable log file");
            continue;
        };
        collect_records(&content, &mut records);
    }
    records
}

fn find_target_logs(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        // Never follow symlinks; see the input-file walk in plugins::runner.
        if file_type.is_symlink() {
            continue;
        }
        let path = entry.path();
        if file_type.is_dir() {
            find_target_logs(&path, out);
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.eq_ignore_ascii_case(TARGET_LOG_NAME))
            .unwrap_or(false)
        {
            out.push(path);
        }
    }
    out.sort();
}

fn collect_records(content: &str, out: &mut Vec<String>) {
    let mut current: Option<String> = None;
    for line in content.lines() {
        if let Some(caps) = RECORD_HEADER.captures(line) {
            if let Some(record) = current.take() {
                out.push(record);
            }
            let level = &caps[1];
            if level == "ERR" || level == "WRN" {
                current = Some(line.to_string());
            }
        } else if line.starts_with('[') {
            // Some other bracketed line still terminates the record.
            if let Some(record) = current.take() {
                out.push(record);
            }
        } else if let Some(record) = current.as_mut() {
            record.push('\n');
            record.push_str(line);
        }
    }
    if let Some(record) = current.take() {
        out.push(record);
    }
}

fn build_prompt(unique_records: &[&String], total: usize) -> String {
    let sample = unique_records
        .iter()
        .take(MAX_PROMPT_RECORDS)
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Analyze the following application log records and identify likely problems.\n\
         \n\
         Record format: [timestamp][level][module] message\n\
         Only ERR and WRN records are included. Total: {total}, unique: {unique}.\n\
         \n\
         Records:\n{sample}\n\
         \n\
         Reply with JSON only, in exactly this shape:\n\
         {{\n\
           \"success\": boolean,\n\
           \"findings\": [\n\
             {{\"code\": string, \"title\": string, \"detail\": string, \"has_remedy\": boolean}}\n\
           ],\n\
           \"summary\": string\n\
         }}\n\
         \n\
         Group repeated error patterns, relate errors where possible, and\n\
         return success: true if nothing looks actionable.",
        unique = unique_records.len(),
    )
}

/// Parse the model's reply into a report, tolerating prose around the JSON
/// object. A reply that yields no parseable report degrades to an `AI003`
/// finding.
fn parse_ai_reply(reply: &str, record_count: usize) -> PluginReport {
    let candidate = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => reply,
    };

    let parsed = serde_json::from_str::<Value>(candidate)
        .map_err(DoctorError::from)
        .and_then(|value| normalize_report("ai", value));

    let mut report = match parsed {
        Ok(report) => report,
        Err(e) => {
            warn!(error = %e, "AI reply was not a parseable report");
            ai_finding_report(
                "AI003",
                "AI reply had an unexpected format",
                e.to_string(),
            )
        }
    };

    report
        .raw_data
        .insert("ai_response".to_string(), Value::String(reply.to_string()));
    report.raw_data.insert(
        "error_record_count".to_string(),
        Value::Number(record_count.into()),
    );
    report.raw_data.insert(
        "timestamp".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    report
}

fn ai_finding_report(code: &str, title: &str, detail: String) -> PluginReport {
    PluginReport::single(
        Finding {
            code: code.to_string(),
            title: title.to_string(),
            detail,
            has_remedy: false,
        },
        title.to_string(),
    )
}
