/// SRP Evaluator - Runner Output Interpretation
///
/// **Core Responsibility:**
/// Turn the raw merged output of a runner into a pass/fail verdict and a
/// Markdown report.
///
/// **Critical Properties:**
/// - Knows nothing about Docker, processes or progress
/// - Never fails: malformed or missing structured output falls back to the
///   heuristic verdict
/// - Rendering is deterministic (diagnostics, then tests, then raw output)
///
/// **Extraction Order (first match wins):**
/// 1. Block between `__SRP_BEGIN__` and `__SRP_END__`
/// 2. Otherwise the greedy `{ ... }` span of the whole output
/// 3. First `{` to last `}` of that candidate, parsed as `SrpOutput`
/// 4. Heuristic: exit code 0, no "❌", none of `FAILURE_KEYWORDS`
use progy_common::error::ExecutionFailure;
use progy_common::types::{RunReport, SrpDiagnostic, SrpOutput, TestStatus};
use std::fmt::Write as _;
use tracing::debug;

pub const SRP_BEGIN: &str = "__SRP_BEGIN__";
pub const SRP_END: &str = "__SRP_END__";

/// Substrings (case-insensitive) that mark infrastructure failure in
/// unstructured output. Extending this list is a product decision.
pub const FAILURE_KEYWORDS: &[&str] = &[
    "error during connect:",
    "permission denied",
    "unable to get image",
    "failed to solve",
    "The system cannot find the file specified",
];

const FAILURE_MARKER: &str = "❌";

#[derive(Debug)]
enum ParseError {
    NoCandidate,
    NoObject,
    Json(serde_json::Error),
}

/// Candidate JSON text from raw output (steps 1 and 2)
pub fn extract_candidate(raw_output: &str) -> Option<&str> {
    if let Some(start) = raw_output.find(SRP_BEGIN) {
        let body_start = start + SRP_BEGIN.len();
        if let Some(len) = raw_output[body_start..].find(SRP_END) {
            let body = raw_output[body_start..body_start + len].trim();
            if !body.is_empty() {
                return Some(body);
            }
        }
    }

    let first = raw_output.find('{')?;
    let last = raw_output.rfind('}')?;
    if last > first {
        Some(raw_output[first..=last].trim())
    } else {
        None
    }
}

/// Step 3: parse exactly the first `{` .. last `}` span of the candidate
fn parse_candidate(candidate: &str) -> Result<SrpOutput, ParseError> {
    let start = candidate.find('{').ok_or(ParseError::NoObject)?;
    let end = candidate.rfind('}').ok_or(ParseError::NoObject)?;
    if end < start {
        return Err(ParseError::NoObject);
    }
    serde_json::from_str(&candidate[start..=end]).map_err(ParseError::Json)
}

fn parse_structured(raw_output: &str) -> Result<SrpOutput, ParseError> {
    let candidate = extract_candidate(raw_output).ok_or(ParseError::NoCandidate)?;
    parse_candidate(candidate)
}

/// Step 4 verdict on unstructured output
pub fn heuristic_success(raw_output: &str, exit_code: i64) -> bool {
    let lowered = raw_output.to_lowercase();
    let has_error = FAILURE_KEYWORDS
        .iter()
        .any(|k| lowered.contains(&k.to_lowercase()));

    exit_code == 0 && !raw_output.contains(FAILURE_MARKER) && !has_error
}

/// Parse runner output into a report. Always returns a usable result.
pub fn parse_runner_output(raw_output: &str, exit_code: i64) -> RunReport {
    match parse_structured(raw_output) {
        Ok(srp) => RunReport {
            success: srp.success,
            output: srp.raw.trim().to_string(),
            friendly_output: render_friendly(&srp),
        },
        Err(reason) => {
            debug!(?reason, exit_code, "No structured SRP block, using heuristic");
            let success = heuristic_success(raw_output, exit_code);
            let heading = if success { "✅ Success" } else { "❌ Failed" };
            RunReport {
                success,
                output: raw_output.to_string(),
                friendly_output: format!("{}\n\n{}", heading, raw_output),
            }
        }
    }
}

/// Fence language for a diagnostic snippet, taken from the file extension
fn fence_language(diagnostic: &SrpDiagnostic) -> &'static str {
    let extension = diagnostic
        .file
        .as_deref()
        .and_then(|f| f.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("rs") => "rust",
        Some("py") => "python",
        Some("ts") | Some("tsx") => "typescript",
        Some("js") | Some("mjs") => "javascript",
        Some("go") => "go",
        Some("sql") => "sql",
        Some("java") => "java",
        Some("c") | Some("h") => "c",
        Some("cpp") | Some("cc") | Some("hpp") => "cpp",
        Some("sh") => "bash",
        _ => "",
    }
}

/// Markdown report for a structured result
pub fn render_friendly(srp: &SrpOutput) -> String {
    let mut out = String::new();
    let heading = if srp.success { "✅ Success" } else { "❌ Failed" };
    let _ = write!(out, "## {}\n\n> {}\n\n", heading, srp.summary);

    if let Some(diagnostics) = srp.diagnostics.as_ref().filter(|d| !d.is_empty()) {
        out.push_str("### 📍 Diagnostics\n\n");
        for d in diagnostics {
            let _ = write!(out, "#### {} {}\n**{}**\n", d.severity.icon(), d.severity.label(), d.message);
            if let Some(file) = &d.file {
                let _ = write!(out, "`{}:{}`\n\n", file, d.line.unwrap_or(0));
            }
            if let Some(snippet) = &d.snippet {
                let _ = write!(out, "```{}\n{}\n```\n\n", fence_language(d), snippet);
            }
            if let Some(suggestion) = &d.suggestion {
                let _ = write!(out, "💡 {}\n\n", suggestion);
            }
            out.push_str("---\n\n");
        }
    }

    if let Some(tests) = srp.tests.as_ref().filter(|t| !t.is_empty()) {
        out.push_str("### 🧪 Tests\n\n");
        for t in tests {
            let icon = if t.status == TestStatus::Pass { "✅" } else { "❌" };
            let _ = writeln!(out, "- {} **{}**", icon, t.name);
            if let Some(message) = &t.message {
                let _ = write!(out, "  > {}\n\n", message.replace('\n', "\n  > "));
            }
        }
    }

    let raw = srp.raw.trim();
    if !raw.is_empty() {
        let _ = writeln!(out, "### 📋 Output\n\n```\n{}\n```", raw);
    }

    out
}

/// Render a strategy failure in the same report shape as a failed run
pub fn failure_report(failure: &ExecutionFailure) -> RunReport {
    let mut raw = failure.to_string();
    let captured = failure.captured_output().trim();
    if !captured.is_empty() {
        raw.push_str("\n\n");
        raw.push_str(captured);
    }

    let summary = match failure.hint() {
        Some(hint) => format!("{}: {}", failure.title(), hint),
        None => failure.title().to_string(),
    };
    let srp = SrpOutput::failure(summary, raw);

    RunReport {
        success: false,
        output: srp.raw.clone(),
        friendly_output: render_friendly(&srp),
    }
}
