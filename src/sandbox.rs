//! Capture sandbox: runs one untrusted code fragment in a fresh
//! interpreter subprocess and captures everything it writes.
//!
//! Each call owns its scratch directory, its pipes and its child process,
//! so concurrent runs cannot contaminate each other's captured output.
//! The fragment talks back through three files staged in the scratch dir:
//! the fragment itself, the JSON-encoded binding context, and a JSON
//! report the driver writes with the structured verdict.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::outcome::ExecOutcome;

/// Python harness staged into every scratch dir.
const DRIVER: &str = include_str!("driver.py");

/// How long to keep draining the capture pipes after the child is gone.
/// A leaked writer in an orphaned grandchild would otherwise hold the
/// pipe open forever.
const PIPE_GRACE: Duration = Duration::from_secs(1);

/// Resource budget for one run.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    /// Wall-clock budget in milliseconds.
    pub time_ms: u64,
    /// Address-space ceiling in KB.
    pub mem_kb: u64,
    /// Maximum file size the fragment may create, in KB.
    pub fsize_kb: u64,
    /// Maximum number of open files.
    pub nofile: u64,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            time_ms: 10_000,
            mem_kb: 262_144,
            fsize_kb: 1_024,
            nofile: 64,
        }
    }
}

impl RunLimits {
    /// CPU-seconds ceiling derived from the wall budget.
    fn cpu_secs(&self) -> u64 {
        std::cmp::max(1, self.time_ms / 1000)
    }
}

/// Variable bindings seeded into the fragment's global namespace.
///
/// Always carries the module-name binding; discarded after the run that
/// consumes it.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    bindings: BTreeMap<String, serde_json::Value>,
}

impl ExecutionContext {
    pub const MODULE_NAME: &'static str = "__executor__";

    pub fn new() -> Self {
        let mut bindings = BTreeMap::new();
        bindings.insert(
            "__name__".to_string(),
            serde_json::Value::from(Self::MODULE_NAME),
        );
        Self { bindings }
    }

    /// Seed one binding, replacing any previous value under that name.
    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.bindings.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.bindings.get(name)
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Host-side faults. Fragment faults never surface here; they come back
/// as an [`ExecOutcome`] with a failure status.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("scratch dir: {0}")]
    Scratch(#[source] std::io::Error),
    #[error("stage run files: {0}")]
    Stage(#[source] std::io::Error),
    #[error("encode context: {0}")]
    Context(#[from] serde_json::Error),
    #[error("spawn {python}: {source}")]
    Spawn {
        python: String,
        #[source]
        source: std::io::Error,
    },
    #[error("wait for interpreter: {0}")]
    Wait(#[source] std::io::Error),
    #[error("capture output: {0}")]
    Capture(String),
}

/// Verdict the driver writes before exiting.
#[derive(Debug, Deserialize)]
struct DriverReport {
    ok: bool,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// The single-call execution primitive.
#[derive(Debug, Clone)]
pub struct Sandbox {
    python: String,
    limits: RunLimits,
}

impl Sandbox {
    pub fn new() -> Self {
        Self::with_limits(RunLimits::default())
    }

    pub fn with_limits(limits: RunLimits) -> Self {
        Self {
            python: "python3".to_string(),
            limits,
        }
    }

    /// Override the interpreter binary.
    pub fn with_interpreter(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    pub fn limits(&self) -> RunLimits {
        self.limits
    }

    /// Run `code` with `context` as its global namespace and capture the
    /// run's stdout/stderr.
    ///
    /// Any fault inside the fragment — compile-time or runtime — is
    /// recovered into the returned outcome; `Err` is reserved for faults
    /// of the host itself (scratch space, spawn, pipes).
    pub async fn run(
        &self,
        code: &str,
        context: ExecutionContext,
    ) -> Result<ExecOutcome, SandboxError> {
        let run_id = Uuid::new_v4();
        info!(%run_id, code_bytes = code.len(), "running fragment");

        let scratch = tempfile::Builder::new()
            .prefix("codelab-run-")
            .tempdir()
            .map_err(SandboxError::Scratch)?;

        let driver_path = scratch.path().join("driver.py");
        let code_path = scratch.path().join("fragment.py");
        let context_path = scratch.path().join("context.json");
        let report_path = scratch.path().join("report.json");

        tokio::fs::write(&driver_path, DRIVER)
            .await
            .map_err(SandboxError::Stage)?;
        tokio::fs::write(&code_path, code)
            .await
            .map_err(SandboxError::Stage)?;
        tokio::fs::write(&context_path, serde_json::to_vec(&context)?)
            .await
            .map_err(SandboxError::Stage)?;

        let mut cmd = Command::new(&self.python);
        cmd.arg("-u")
            .arg(&driver_path)
            .arg(&code_path)
            .arg(&context_path)
            .arg(&report_path)
            .current_dir(scratch.path())
            .env_clear()
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .env("HOME", scratch.path())
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(target_os = "linux")]
        {
            let limits = self.limits;
            unsafe {
                cmd.pre_exec(move || apply_rlimits(&limits));
            }
        }

        let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            python: self.python.clone(),
            source,
        })?;

        let stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Capture("child stdout pipe missing".to_string()))?;
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Capture("child stderr pipe missing".to_string()))?;

        // Drain both pipes concurrently with the wait; a full pipe would
        // otherwise deadlock a chatty fragment.
        let stdout_task = tokio::spawn(read_stream(stdout_pipe));
        let stderr_task = tokio::spawn(read_stream(stderr_pipe));

        let wall = Duration::from_millis(self.limits.time_ms);
        let status = match timeout(wall, child.wait()).await {
            Ok(waited) => Some(waited.map_err(SandboxError::Wait)?),
            Err(_) => {
                warn!(%run_id, budget_ms = self.limits.time_ms, "wall budget exceeded, killing");
                let _ = child.start_kill();
                let _ = child.wait().await;
                None
            }
        };

        let stdout = collect(stdout_task).await?;
        let stderr = collect(stderr_task).await?;

        let outcome = match status {
            None => ExecOutcome::timed_out(stdout, stderr, self.limits.time_ms),
            Some(status) => match read_report(&report_path).await {
                Some(report) if !report.ok => {
                    let kind = report.kind.unwrap_or_else(|| "Fault".to_string());
                    debug!(%run_id, kind = %kind, message = ?report.message, "fragment faulted");
                    ExecOutcome::failure(kind, stdout, stderr)
                }
                Some(_) if status.success() => ExecOutcome::success(stdout, stderr),
                _ => classify_exit(status, stdout, stderr, self.limits.time_ms),
            },
        };

        info!(
            %run_id,
            status = ?outcome.status,
            stdout_bytes = outcome.stdout.len(),
            stderr_bytes = outcome.stderr.len(),
            "fragment finished"
        );
        Ok(outcome)
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_stream<R>(mut reader: R) -> std::io::Result<String>
where
    R: AsyncReadExt + Unpin,
{
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn collect(task: JoinHandle<std::io::Result<String>>) -> Result<String, SandboxError> {
    match timeout(PIPE_GRACE, task).await {
        Ok(joined) => joined
            .map_err(|e| SandboxError::Capture(e.to_string()))?
            .map_err(|e| SandboxError::Capture(e.to_string())),
        // Writer leaked into an orphan; give up on the stream.
        Err(_) => Ok(String::new()),
    }
}

async fn read_report(path: &Path) -> Option<DriverReport> {
    let bytes = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// The interpreter died without leaving a report. Classify from the exit
/// status; a CPU-limit kill counts as a timeout.
fn classify_exit(
    status: std::process::ExitStatus,
    stdout: String,
    stderr: String,
    time_ms: u64,
) -> ExecOutcome {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::process::ExitStatusExt;
        if status.signal() == Some(nix::sys::signal::Signal::SIGXCPU as i32) {
            return ExecOutcome::timed_out(stdout, stderr, time_ms);
        }
    }
    #[cfg(not(target_os = "linux"))]
    let _ = time_ms;

    let (kind, message) = exit_description(&status);
    let mut stderr = stderr;
    if !stderr.is_empty() && !stderr.ends_with('\n') {
        stderr.push('\n');
    }
    stderr.push_str(&format!("{}: {}\n", kind, message));
    ExecOutcome::failure(kind.to_string(), stdout, stderr)
}

fn exit_description(status: &std::process::ExitStatus) -> (&'static str, String) {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ("Signal", format!("interpreter killed by signal {}", signal));
        }
    }
    (
        "ProcessExit",
        format!(
            "interpreter exited with status {} without a report",
            status.code().unwrap_or(-1)
        ),
    )
}

#[cfg(target_os = "linux")]
fn apply_rlimits(limits: &RunLimits) -> std::io::Result<()> {
    use nix::sys::resource::{setrlimit, Resource};

    let fail = |what: &str, e: nix::Error| {
        std::io::Error::new(std::io::ErrorKind::Other, format!("rlimit {}: {}", what, e))
    };

    let cpu = limits.cpu_secs();
    setrlimit(Resource::RLIMIT_CPU, cpu, cpu).map_err(|e| fail("cpu", e))?;

    let mem = limits.mem_kb * 1024;
    setrlimit(Resource::RLIMIT_AS, mem, mem).map_err(|e| fail("as", e))?;

    let fsize = limits.fsize_kb * 1024;
    setrlimit(Resource::RLIMIT_FSIZE, fsize, fsize).map_err(|e| fail("fsize", e))?;

    setrlimit(Resource::RLIMIT_NOFILE, limits.nofile, limits.nofile)
        .map_err(|e| fail("nofile", e))?;
    setrlimit(Resource::RLIMIT_CORE, 0, 0).map_err(|e| fail("core", e))?;
    setrlimit(Resource::RLIMIT_NPROC, 64, 64).map_err(|e| fail("nproc", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{ExecStatus, FaultKind};

    /// Sandbox-backed tests need a real interpreter on PATH.
    pub(crate) fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn context_always_carries_module_name() {
        let ctx = ExecutionContext::new();
        assert_eq!(
            ctx.get("__name__").and_then(|v| v.as_str()),
            Some(ExecutionContext::MODULE_NAME)
        );
    }

    #[test]
    fn context_bind_replaces() {
        let mut ctx = ExecutionContext::new();
        ctx.bind("output", "a\n");
        ctx.bind("output", "b\n");
        assert_eq!(ctx.get("output").and_then(|v| v.as_str()), Some("b\n"));
    }

    #[tokio::test]
    async fn captures_stdout_of_clean_run() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let outcome = Sandbox::new()
            .run("print('hi')", ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecStatus::Success);
        assert_eq!(outcome.stdout, "hi\n");
        assert_eq!(outcome.stderr, "");
        assert!(outcome.error_kind.is_none());
    }

    #[tokio::test]
    async fn runtime_fault_is_classified() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let outcome = Sandbox::new()
            .run("1/0", ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecStatus::Failure);
        assert_eq!(outcome.stdout, "");
        assert_eq!(outcome.error_kind.as_deref(), Some("ZeroDivisionError"));
        assert!(outcome.stderr.contains("ZeroDivisionError: division by zero"));
        assert_eq!(outcome.fault(), Some(FaultKind::Runtime));
    }

    #[tokio::test]
    async fn syntax_fault_reports_before_any_output() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let outcome = Sandbox::new()
            .run("print('early')\nsyntax(", ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecStatus::Failure);
        // compile() fails before the first line runs
        assert_eq!(outcome.stdout, "");
        assert_eq!(outcome.error_kind.as_deref(), Some("SyntaxError"));
        assert_eq!(outcome.fault(), Some(FaultKind::Compile));
    }

    #[tokio::test]
    async fn partial_output_survives_a_fault() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let outcome = Sandbox::new()
            .run("print('before')\n1/0", ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecStatus::Failure);
        assert_eq!(outcome.stdout, "before\n");
        assert_eq!(outcome.error_kind.as_deref(), Some("ZeroDivisionError"));
    }

    #[tokio::test]
    async fn context_bindings_reach_the_fragment_verbatim() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let mut ctx = ExecutionContext::new();
        ctx.bind("output", "x\n");
        let outcome = Sandbox::new()
            .run("import sys\nsys.stdout.write(output)", ctx)
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecStatus::Success);
        assert_eq!(outcome.stdout, "x\n");
    }

    #[tokio::test]
    async fn unicode_output_round_trips() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let outcome = Sandbox::new()
            .run("print('Olá, Python!')", ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(outcome.stdout, "Olá, Python!\n");
    }

    #[tokio::test]
    async fn stderr_writes_do_not_fail_the_run() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let outcome = Sandbox::new()
            .run("import sys\nsys.stderr.write('warn\\n')", ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecStatus::Success);
        assert_eq!(outcome.stderr, "warn\n");
    }

    #[tokio::test]
    async fn runs_share_no_interpreter_state() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let sandbox = Sandbox::new();
        let first = sandbox.run("x = 5", ExecutionContext::new()).await.unwrap();
        assert_eq!(first.status, ExecStatus::Success);

        let second = sandbox
            .run("print(x)", ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(second.status, ExecStatus::Failure);
        assert_eq!(second.error_kind.as_deref(), Some("NameError"));
    }

    #[tokio::test]
    async fn repeated_runs_are_idempotent() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let sandbox = Sandbox::new();
        let a = sandbox
            .run("print('same')", ExecutionContext::new())
            .await
            .unwrap();
        let b = sandbox
            .run("print('same')", ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(a.status, b.status);
        assert_eq!(a.stdout, b.stdout);
        assert_eq!(a.error_kind, b.error_kind);
    }

    #[tokio::test]
    async fn non_terminating_fragment_times_out() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let limits = RunLimits {
            time_ms: 500,
            ..RunLimits::default()
        };
        let outcome = Sandbox::with_limits(limits)
            .run("while True:\n    pass", ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecStatus::Timeout);
        assert_eq!(outcome.error_kind.as_deref(), Some("Timeout"));
        assert_eq!(outcome.fault(), Some(FaultKind::Timeout));
        assert!(outcome.stderr.contains("Timeout: execution exceeded"));
    }

    #[tokio::test]
    async fn output_before_timeout_is_kept() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let limits = RunLimits {
            time_ms: 800,
            ..RunLimits::default()
        };
        let outcome = Sandbox::with_limits(limits)
            .run(
                "print('started', flush=True)\nwhile True:\n    pass",
                ExecutionContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecStatus::Timeout);
        assert_eq!(outcome.stdout, "started\n");
    }

    #[tokio::test]
    async fn missing_interpreter_is_a_host_error() {
        let result = Sandbox::new()
            .with_interpreter("codelab-no-such-python")
            .run("print('hi')", ExecutionContext::new())
            .await;
        assert!(matches!(result, Err(SandboxError::Spawn { .. })));
    }
}
