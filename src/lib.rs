//! Code-execution and exercise-grading engine for an interactive course
//! platform.
//!
//! Learner code runs in a fresh interpreter subprocess per call
//! ([`sandbox`]); graded exercises sequence a second, test-defining run
//! against the first run's captured output ([`checker`]); the serving
//! layer ([`http_server`]) exposes both over JSON along with the
//! file-backed course content ([`content`]).

pub mod checker;
pub mod content;
pub mod duration;
pub mod http_server;
pub mod outcome;
pub mod sandbox;
pub mod state;

pub use checker::Checker;
pub use outcome::{ApiResult, CheckOutcome, ExecOutcome, ExecStatus, FaultKind};
pub use sandbox::{ExecutionContext, RunLimits, Sandbox, SandboxError};
