//! Execution outcomes and the response shape served to clients.

use serde::{Deserialize, Serialize};

/// Terminal state of one sandboxed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Success,
    Failure,
    Timeout,
}

/// Language-agnostic fault categories, mapped from whatever name the
/// interpreter reports for the fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Compile,
    Runtime,
    Assertion,
    Timeout,
}

impl FaultKind {
    /// Classify an interpreter fault name into a stable category.
    pub fn classify(error_kind: &str) -> FaultKind {
        match error_kind {
            "SyntaxError" | "IndentationError" | "TabError" => FaultKind::Compile,
            "AssertionError" => FaultKind::Assertion,
            "Timeout" => FaultKind::Timeout,
            _ => FaultKind::Runtime,
        }
    }
}

/// Result of one capture-sandbox invocation.
///
/// `error_kind` is present exactly when the run did not succeed; `stdout`
/// and `stderr` reflect only output produced during this single run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecOutcome {
    pub status: ExecStatus,
    pub stdout: String,
    pub stderr: String,
    pub error_kind: Option<String>,
}

impl ExecOutcome {
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            status: ExecStatus::Success,
            stdout,
            stderr,
            error_kind: None,
        }
    }

    pub fn failure(error_kind: String, stdout: String, stderr: String) -> Self {
        Self {
            status: ExecStatus::Failure,
            stdout,
            stderr,
            error_kind: Some(error_kind),
        }
    }

    /// A run cut off by the wall-clock or CPU budget. Whatever the
    /// fragment printed before the kill is kept.
    pub fn timed_out(stdout: String, mut stderr: String, budget_ms: u64) -> Self {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!(
            "Timeout: execution exceeded the {} ms budget\n",
            budget_ms
        ));
        Self {
            status: ExecStatus::Timeout,
            stdout,
            stderr,
            error_kind: Some("Timeout".to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecStatus::Success
    }

    /// Fault category of a non-successful run.
    pub fn fault(&self) -> Option<FaultKind> {
        self.error_kind.as_deref().map(FaultKind::classify)
    }
}

/// Result of grading one submission against an exercise.
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub success: bool,
    /// The learner run's stdout, surfaced even on failure.
    pub output: String,
    /// Diagnostic text: the failure reason, the test run's output, or the
    /// no-test marker.
    pub details: String,
}

/// The single response shape of the serving layer, regardless of which
/// internal path produced the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResult {
    pub success: bool,
    pub output: String,
    pub details: String,
}

impl ApiResult {
    pub fn rejected(details: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            details: details.into(),
        }
    }
}

impl From<ExecOutcome> for ApiResult {
    fn from(outcome: ExecOutcome) -> Self {
        let success = outcome.is_success();
        let details = if success {
            String::new()
        } else if !outcome.stderr.is_empty() {
            outcome.stderr
        } else {
            outcome.error_kind.unwrap_or_else(|| "Failure".to_string())
        };
        Self {
            success,
            output: outcome.stdout,
            details,
        }
    }
}

impl From<CheckOutcome> for ApiResult {
    fn from(outcome: CheckOutcome) -> Self {
        Self {
            success: outcome.success,
            output: outcome.output,
            details: outcome.details,
        }
    }
}
