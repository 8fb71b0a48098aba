//! Plugin result types
//!
//! Defines the canonical finding/report types every producer (rule plugins,
//! command plugins, the AI analyzer) is normalized into, plus the
//! normalization itself. Plugins may emit either a full report or a single
//! bare finding; both shapes are accepted at this boundary and anything else
//! is a typed `ResultFormat` error rather than an uncaught fault.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DoctorError, Result};

/// One structured diagnostic result. `code` is the dedup key across the
/// whole batch; immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Unique key for deduplication, e.g. `E001`.
    pub code: String,

    /// Short human-readable title.
    pub title: String,

    /// Longer description; may be empty.
    #[serde(default)]
    pub detail: String,

    /// Whether a remedy document exists for this code.
    #[serde(default = "default_true", alias = "has_solution")]
    pub has_remedy: bool,
}

fn default_true() -> bool {
    true
}

/// Report produced by a single plugin (or the AI analyzer).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginReport {
    /// Whether the producer considers the input healthy.
    #[serde(default)]
    pub success: bool,

    /// Findings in the order the producer emitted them.
    #[serde(default, alias = "errors")]
    pub findings: Vec<Finding>,

    /// Free-form summary line; may be empty.
    #[serde(default)]
    pub summary: String,

    /// Producer-specific auxiliary data, passed through untouched.
    #[serde(default)]
    pub raw_data: Map<String, Value>,
}

impl PluginReport {
    /// An empty all-clear report.
    pub fn healthy(summary: impl Into<String>) -> Self {
        Self {
            success: true,
            findings: Vec::new(),
            summary: summary.into(),
            raw_data: Map::new(),
        }
    }

    /// A report carrying exactly one finding.
    pub fn single(finding: Finding, summary: impl Into<String>) -> Self {
        Self {
            success: false,
            findings: vec![finding],
            summary: summary.into(),
            raw_data: Map::new(),
        }
    }
}

/// Terminal artifact of a full analysis run, handed to the presentation
/// layer. Findings are deduplicated by code, first occurrence wins.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisReport {
    /// True iff the deduplicated finding list is empty.
    pub succeeded: bool,

    /// Deduplicated findings in first-seen order across plugins.
    pub findings: Vec<Finding>,

    /// Concatenated per-producer summaries.
    pub summary: String,

    /// Auxiliary data merged from producers.
    pub raw_data: Map<String, Value>,
}

/// Normalize a plugin's raw return value into a canonical report.
///
/// Accepted shapes:
/// - a full report object: `{success, findings|errors, summary, raw_data?}`
/// - a single bare finding: `{code, title, detail?, has_remedy?}`
/// - `null`, meaning "nothing to report"
///
/// Anything else, including a finding missing its `code` or `title`, is a
/// `ResultFormat` error attributed to `identifier`.
pub fn normalize_report(identifier: &str, value: Value) -> Result<PluginReport> {
    match value {
        Value::Null => Ok(PluginReport::healthy("")),
        Value::Object(ref obj) => {
            if obj.contains_key("code") {
                let finding: Finding = serde_json::from_value(value).map_err(|e| {
                    DoctorError::ResultFormat(format!(
                        "plugin '{identifier}' returned a malformed finding: {e}"
                    ))
                })?;
                Ok(PluginReport::single(finding, ""))
            } else if obj.contains_key("success")
                || obj.contains_key("findings")
                || obj.contains_key("errors")
            {
                serde_json::from_value(value).map_err(|e| {
                    DoctorError::ResultFormat(format!(
                        "plugin '{identifier}' returned a malformed report: {e}"
                    ))
                })
            } else {
                Err(DoctorError::ResultFormat(format!(
                    "plugin '{identifier}' returned an object matching neither report nor finding shape"
                )))
            }
        }
        other => Err(DoctorError::ResultFormat(format!(
            "plugin '{identifier}' returned {} instead of an object",
            type_name(&other)
        ))),
    }
}

/// Synthetic finding standing in for a plugin whose result could not be
/// normalized. The code embeds the identifier so two misbehaving plugins do
/// not collapse into one deduplicated finding.
pub fn format_error_finding(identifier: &str, error: &DoctorError) -> Finding {
    Finding {
        code: format!("SYS002:{identifier}"),
        title: format!("Plugin '{identifier}' returned a malformed result"),
        detail: error.to_string(),
        has_remedy: false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
