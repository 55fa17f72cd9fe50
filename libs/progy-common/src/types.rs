use serde::{Deserialize, Serialize};

/// Identity of one exercise as produced by a manifest scan.
///
/// `id` is always `<module>/<entry name>`; `path` is relative to the layer
/// root the exercise was found in. Values are only built from manifest
/// entries, never from raw request input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseIdentity {
    pub id: String,
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    pub path: String,
}

impl ExerciseIdentity {
    /// Logical path of the runnable file: `path` joined with `entry_point`.
    pub fn entry_path(&self) -> String {
        match &self.entry_point {
            Some(entry) => format!("{}/{}", self.path.trim_end_matches('/'), entry),
            None => self.path.clone(),
        }
    }
}

/// Outcome of a single test case reported by a runner script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SrpTestCase {
    pub name: String,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Severity {
    pub fn icon(&self) -> &'static str {
        match self {
            Severity::Error => "❌",
            Severity::Warning => "⚠️",
            Severity::Note => "ℹ️",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Note => "NOTE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SrpDiagnostic {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Smart Runner Protocol payload, the block a runner script prints between
/// `__SRP_BEGIN__` and `__SRP_END__`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SrpOutput {
    pub success: bool,
    pub summary: String,
    pub raw: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<Vec<SrpTestCase>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Vec<SrpDiagnostic>>,
}

impl SrpOutput {
    /// Build a failed payload with no tests or diagnostics
    pub fn failure(summary: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            success: false,
            summary: summary.into(),
            raw: raw.into(),
            tests: None,
            diagnostics: None,
        }
    }
}

/// Merged stdout+stderr and exit code of one strategy run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExecutionResult {
    pub output: String,
    pub exit_code: i64,
}

/// What every run resolves to, whichever strategy produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub success: bool,
    pub output: String,
    pub friendly_output: String,
}
