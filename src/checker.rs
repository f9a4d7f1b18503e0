//! Verification orchestrator: grades a submission against an exercise's
//! test fragment.
//!
//! Two-phase sequence over the capture sandbox. The learner fragment runs
//! first with a fresh context; only if it succeeds does the test fragment
//! run, with the learner's captured stdout bound as `output`.

use tracing::info;

use crate::outcome::{CheckOutcome, FaultKind};
use crate::sandbox::{ExecutionContext, Sandbox, SandboxError};

/// Marker returned when an exercise defines no test fragment.
pub const NO_TEST_DETAILS: &str = "executed, no automated check";

/// Name under which the learner's captured stdout is visible to the test
/// fragment.
pub const OUTPUT_BINDING: &str = "output";

#[derive(Debug, Clone, Default)]
pub struct Checker {
    sandbox: Sandbox,
}

impl Checker {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Run the learner's code and, if it succeeds and a test fragment
    /// exists, the test fragment against its captured output.
    ///
    /// The test phase never runs for a failed submission. `Err` is
    /// reserved for host faults; every fragment fault comes back inside
    /// the outcome.
    pub async fn check(
        &self,
        learner_code: &str,
        test_code: Option<&str>,
    ) -> Result<CheckOutcome, SandboxError> {
        let learner = self.sandbox.run(learner_code, ExecutionContext::new()).await?;

        if !learner.is_success() {
            info!(error_kind = ?learner.error_kind, "submission failed, skipping test phase");
            return Ok(CheckOutcome {
                success: false,
                output: learner.stdout,
                details: learner.stderr,
            });
        }

        let test_code = test_code.filter(|code| !code.trim().is_empty());
        let Some(test_code) = test_code else {
            return Ok(CheckOutcome {
                success: true,
                output: learner.stdout,
                details: NO_TEST_DETAILS.to_string(),
            });
        };

        let mut context = ExecutionContext::new();
        context.bind(OUTPUT_BINDING, learner.stdout.clone());
        let test = self.sandbox.run(test_code, context).await?;

        let success = test.is_success();
        // stderr carries the structured failure reason; stdout is
        // incidental, so stderr wins when both are present.
        let mut details = if !test.stderr.is_empty() {
            test.stderr
        } else {
            test.stdout
        };
        if test.error_kind.as_deref().map(FaultKind::classify) == Some(FaultKind::Assertion) {
            details = format!("Test failed: {}", details);
        }

        info!(success, "test phase finished");
        Ok(CheckOutcome {
            success,
            output: learner.stdout,
            details,
        })
    }
}
