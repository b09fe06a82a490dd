//! Code runners for the execution endpoint.
//!
//! The endpoint delegates execution to a [`CodeRunner`] so the HTTP layer
//! can be tested without an interpreter. The production implementation,
//! [`PythonRunner`], spawns one interpreter process per request and builds
//! the restricted namespace inside it from positive allow-lists only.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::protocol::ExecErrorKind;

/// Marker preceding the JSON outcome on the interpreter's stdout. Anything
/// the submitted code prints lands before it, so ordinary output cannot
/// corrupt the protocol.
const RESULT_SENTINEL: &str = "__PODBOX_RESULT__";

/// Deadline for the readiness import check.
const READY_CHECK_TIMEOUT: Duration = Duration::from_secs(20);

/// Host program driving one execution. The submitted code is read from
/// stdin as JSON, executed against a namespace built from allow-lists
/// (builtins, a guarded `__import__`, library handles, a minimal `os`
/// shim), and the outcome is emitted after the sentinel. Negative lists are
/// never used: anything not explicitly granted is absent.
const WRAPPER: &str = r#"
import builtins as _builtins
import importlib as _importlib
import json as _json
import sys as _sys

_payload = _json.loads(_sys.stdin.read())
_code = _payload["code"]

_SAFE_BUILTIN_NAMES = [
    "abs", "all", "any", "bool", "dict", "divmod", "enumerate", "filter",
    "float", "frozenset", "getattr", "hasattr", "int", "isinstance",
    "issubclass", "iter", "len", "list", "map", "max", "min", "next",
    "pow", "print", "range", "repr", "reversed", "round", "set", "slice",
    "sorted", "str", "sum", "tuple", "type", "zip",
    "ArithmeticError", "AttributeError", "Exception", "ImportError",
    "IndexError", "KeyError", "NameError", "RuntimeError",
    "StopIteration", "TypeError", "ValueError", "ZeroDivisionError",
]

_ALLOWED_MODULES = {
    "pandas", "numpy", "matplotlib", "matplotlib.pyplot", "seaborn",
    "plotly", "time", "math", "statistics", "random", "json", "datetime",
    "re", "itertools", "functools", "collections",
}

_original_import = _builtins.__import__

def _safe_import(name, globals=None, locals=None, fromlist=(), level=0):
    if level == 0 and (name in _ALLOWED_MODULES or name.split(".")[0] in _ALLOWED_MODULES):
        return _original_import(name, globals, locals, fromlist, level)
    raise ImportError("import of %r is not permitted in the sandbox" % name)

_safe_builtins = {
    name: getattr(_builtins, name)
    for name in _SAFE_BUILTIN_NAMES
    if hasattr(_builtins, name)
}
_safe_builtins["__import__"] = _safe_import

_globals = {"__builtins__": _safe_builtins}

for _alias, _module in [
    ("pandas", "pandas"), ("pd", "pandas"),
    ("numpy", "numpy"), ("np", "numpy"),
    ("matplotlib", "matplotlib"), ("plt", "matplotlib.pyplot"),
    ("seaborn", "seaborn"), ("plotly", "plotly"),
]:
    try:
        _globals[_alias] = _importlib.import_module(_module)
    except ImportError:
        pass

import os as _os

class _SafeOS:
    path = _os.path
    @staticmethod
    def getcwd():
        return "/workspace"
    @staticmethod
    def listdir(path="/workspace"):
        return _os.listdir(path)

_globals["os"] = _SafeOS()

_locals = {}
try:
    exec(compile(_code, "<sandbox>", "exec"), _globals, _locals)
    _result = _locals.get("result", "Code executed successfully")
    try:
        _json.dumps(_result)
    except (TypeError, ValueError):
        _result = str(_result)
    _out = {"success": True, "result": _result}
except BaseException as _e:
    _out = {"success": False, "error": "%s: %s" % (type(_e).__name__, _e)}

_sys.stdout.write("\n" + "__PODBOX_RESULT__" + _json.dumps(_out) + "\n")
_sys.stdout.flush()
"#;

/// Outcome of one code execution, before timing is attached.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub kind: Option<ExecErrorKind>,
}

impl RunOutcome {
    /// A successful execution.
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            kind: None,
        }
    }

    /// An orderly in-code failure.
    pub fn exception(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            kind: Some(ExecErrorKind::Exception),
        }
    }

    /// A deadline overrun.
    pub fn timed_out(timeout_secs: u64) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(format!("Execution timed out after {timeout_secs} seconds")),
            kind: Some(ExecErrorKind::Timeout),
        }
    }
}

/// Executes submitted code with a hard wall-clock deadline.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    /// Verifies the execution environment is usable (readiness probe).
    async fn ready(&self) -> Result<()>;

    /// Runs `code`, returning within `timeout` plus a small scheduling
    /// margin. Never errors: every failure mode maps to a `RunOutcome`.
    async fn run(&self, code: &str, timeout: Duration) -> RunOutcome;
}

/// Runs code in a fresh interpreter subprocess per request.
///
/// The deadline is enforced by the host: when it expires the child process
/// is killed outright. Nothing submitted code does can extend its own
/// lifetime past the deadline.
pub struct PythonRunner {
    interpreter: String,
}

impl PythonRunner {
    /// Creates a runner using `python3` from PATH.
    pub fn new() -> Self {
        Self::with_interpreter("python3")
    }

    /// Creates a runner using a specific interpreter binary.
    pub fn with_interpreter(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

impl Default for PythonRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CodeRunner for PythonRunner {
    async fn ready(&self) -> Result<()> {
        let check = Command::new(&self.interpreter)
            .arg("-c")
            .arg("import pandas, numpy")
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output();
        let output = tokio::time::timeout(READY_CHECK_TIMEOUT, check)
            .await
            .context("readiness import check timed out")?
            .context("failed to spawn interpreter for readiness check")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("required libraries unavailable: {}", stderr.trim());
        }
        Ok(())
    }

    async fn run(&self, code: &str, timeout: Duration) -> RunOutcome {
        let child = Command::new(&self.interpreter)
            .arg("-I")
            .arg("-c")
            .arg(WRAPPER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn interpreter {}: {e}", self.interpreter);
                return RunOutcome::exception(format!("InterpreterError: {e}"));
            }
        };

        let payload = serde_json::json!({ "code": code }).to_string();
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                warn!("Failed to write code to interpreter: {e}");
                return RunOutcome::exception(format!("InterpreterError: {e}"));
            }
            // Close stdin so the wrapper's read completes.
            drop(stdin);
        }

        // On expiry the dropped future drops the child handle, which kills
        // the process (kill_on_drop). Hard cancellation: no leaked work.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Interpreter wait failed: {e}");
                return RunOutcome::exception(format!("InterpreterError: {e}"));
            }
            Err(_) => {
                debug!("Execution exceeded {}s deadline, killing child", timeout.as_secs());
                return RunOutcome::timed_out(timeout.as_secs());
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_outcome(&stdout) {
            Some(outcome) => outcome,
            None => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(
                    "Interpreter exited ({}) without a result: {}",
                    output.status,
                    stderr.trim()
                );
                RunOutcome::exception(format!(
                    "InterpreterError: interpreter exited ({}) without a result",
                    output.status
                ))
            }
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct WrapperOutcome {
    success: bool,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Extracts the sentinel-delimited outcome from interpreter stdout.
fn parse_outcome(stdout: &str) -> Option<RunOutcome> {
    let start = stdout.rfind(RESULT_SENTINEL)? + RESULT_SENTINEL.len();
    let line = stdout[start..].lines().next()?;
    let parsed: WrapperOutcome = serde_json::from_str(line.trim()).ok()?;
    Some(if parsed.success {
        RunOutcome::ok(parsed.result.unwrap_or(serde_json::Value::Null))
    } else {
        RunOutcome::exception(parsed.error.unwrap_or_else(|| "unknown error".to_string()))
    })
}

/// A scripted runner for testing.
///
/// Returns configured outcomes in order (cycling) and tracks invocations
/// for test assertions.
#[derive(Clone)]
pub struct ScriptedRunner {
    outcomes: Arc<Vec<RunOutcome>>,
    invocation_count: Arc<AtomicUsize>,
    ready_error: Option<String>,
}

impl ScriptedRunner {
    /// Creates a runner that returns the given outcomes in order.
    ///
    /// If invoked more times than outcomes, it cycles back to the first.
    pub fn new(outcomes: Vec<RunOutcome>) -> Self {
        Self {
            outcomes: Arc::new(outcomes),
            invocation_count: Arc::new(AtomicUsize::new(0)),
            ready_error: None,
        }
    }

    /// Creates a runner that always succeeds with the given result value.
    pub fn always_ok(result: serde_json::Value) -> Self {
        Self::new(vec![RunOutcome::ok(result)])
    }

    /// Creates a runner whose readiness check fails with the given detail.
    pub fn not_ready(detail: &str) -> Self {
        Self {
            outcomes: Arc::new(vec![]),
            invocation_count: Arc::new(AtomicUsize::new(0)),
            ready_error: Some(detail.to_string()),
        }
    }

    /// Number of times `run` was called.
    pub fn invocation_count(&self) -> usize {
        self.invocation_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodeRunner for ScriptedRunner {
    async fn ready(&self) -> Result<()> {
        match &self.ready_error {
            Some(detail) => bail!("{detail}"),
            None => Ok(()),
        }
    }

    async fn run(&self, _code: &str, _timeout: Duration) -> RunOutcome {
        let count = self.invocation_count.fetch_add(1, Ordering::SeqCst);
        if self.outcomes.is_empty() {
            return RunOutcome::exception("ScriptedRunner has no outcomes");
        }
        self.outcomes[count % self.outcomes.len()].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_outcome_success() {
        let stdout = format!("user output\n{RESULT_SENTINEL}{{\"success\": true, \"result\": 42}}\n");
        let outcome = parse_outcome(&stdout).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.result, Some(serde_json::json!(42)));
    }

    #[test]
    fn test_parse_outcome_exception() {
        let stdout = format!(
            "{RESULT_SENTINEL}{{\"success\": false, \"error\": \"ZeroDivisionError: division by zero\"}}\n"
        );
        let outcome = parse_outcome(&stdout).unwrap();
        assert!(!outcome.success);
        assert_eq!(
            outcome.error.as_deref(),
            Some("ZeroDivisionError: division by zero")
        );
        assert_eq!(outcome.kind, Some(ExecErrorKind::Exception));
    }

    #[test]
    fn test_parse_outcome_uses_last_sentinel() {
        // Submitted code can print the sentinel itself; only the wrapper's
        // final line counts.
        let stdout = format!(
            "{RESULT_SENTINEL}{{\"success\": false, \"error\": \"fake\"}}\n\
             {RESULT_SENTINEL}{{\"success\": true, \"result\": \"real\"}}\n"
        );
        let outcome = parse_outcome(&stdout).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.result, Some(serde_json::json!("real")));
    }

    #[test]
    fn test_parse_outcome_garbage() {
        assert!(parse_outcome("no sentinel here").is_none());
        let stdout = format!("{RESULT_SENTINEL}not json\n");
        assert!(parse_outcome(&stdout).is_none());
    }

    #[test]
    fn test_wrapper_uses_positive_allow_lists() {
        assert!(WRAPPER.contains("_SAFE_BUILTIN_NAMES"));
        assert!(WRAPPER.contains("_ALLOWED_MODULES"));
        assert!(WRAPPER.contains("__import__"));
        // The namespace grants no subprocess or file-write capability.
        assert!(!WRAPPER.contains("subprocess"));
        assert!(!WRAPPER.contains("open"));
    }

    #[tokio::test]
    async fn test_scripted_runner_cycles_and_counts() {
        let runner = ScriptedRunner::new(vec![
            RunOutcome::ok(serde_json::json!(1)),
            RunOutcome::exception("boom"),
        ]);
        let first = runner.run("", Duration::from_secs(1)).await;
        let second = runner.run("", Duration::from_secs(1)).await;
        let third = runner.run("", Duration::from_secs(1)).await;
        assert!(first.success);
        assert!(!second.success);
        assert!(third.success); // cycles back
        assert_eq!(runner.invocation_count(), 3);
    }

    #[tokio::test]
    async fn test_scripted_runner_not_ready() {
        let runner = ScriptedRunner::not_ready("pandas missing");
        let err = runner.ready().await.unwrap_err();
        assert!(err.to_string().contains("pandas missing"));
    }

    #[cfg(unix)]
    fn fake_interpreter(dir: &std::path::Path, script_body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-python");
        std::fs::write(&path, format!("#!/bin/sh\n{script_body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_parses_fake_interpreter_output() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = fake_interpreter(
            dir.path(),
            "cat > /dev/null\necho '__PODBOX_RESULT__{\"success\": true, \"result\": 7}'",
        );
        let runner = PythonRunner::with_interpreter(interpreter);
        let outcome = runner.run("result = 7", Duration::from_secs(5)).await;
        assert!(outcome.success);
        assert_eq!(outcome.result, Some(serde_json::json!(7)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_kills_child_on_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = fake_interpreter(dir.path(), "cat > /dev/null\nsleep 30");
        let runner = PythonRunner::with_interpreter(interpreter);

        let started = std::time::Instant::now();
        let outcome = runner.run("anything", Duration::from_millis(300)).await;
        assert!(!outcome.success);
        assert_eq!(outcome.kind, Some(ExecErrorKind::Timeout));
        // The runner must return at the deadline, not at child exit.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_reports_interpreter_crash() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = fake_interpreter(dir.path(), "cat > /dev/null\nexit 3");
        let runner = PythonRunner::with_interpreter(interpreter);
        let outcome = runner.run("result = 1", Duration::from_secs(5)).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("InterpreterError"));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_an_orderly_failure() {
        let runner = PythonRunner::with_interpreter("/nonexistent/interpreter");
        let outcome = runner.run("result = 1", Duration::from_secs(1)).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("InterpreterError"));
    }

    fn python3_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_python_result_roundtrip() {
        if !python3_available() {
            return;
        }
        let runner = PythonRunner::new();
        let outcome = runner.run("result = 42", Duration::from_secs(10)).await;
        assert!(outcome.success, "error: {:?}", outcome.error);
        assert_eq!(outcome.result, Some(serde_json::json!(42)));
    }

    #[tokio::test]
    async fn test_python_dict_result_verbatim() {
        if !python3_available() {
            return;
        }
        let runner = PythonRunner::new();
        let outcome = runner
            .run(
                "result = {\"type\": \"number\", \"value\": 3.14}",
                Duration::from_secs(10),
            )
            .await;
        assert!(outcome.success, "error: {:?}", outcome.error);
        assert_eq!(
            outcome.result,
            Some(serde_json::json!({"type": "number", "value": 3.14}))
        );
    }

    #[tokio::test]
    async fn test_python_division_by_zero() {
        if !python3_available() {
            return;
        }
        let runner = PythonRunner::new();
        let outcome = runner.run("result = 1/0", Duration::from_secs(10)).await;
        assert!(!outcome.success);
        assert_eq!(
            outcome.error.as_deref(),
            Some("ZeroDivisionError: division by zero")
        );
    }

    #[tokio::test]
    async fn test_python_default_result_placeholder() {
        if !python3_available() {
            return;
        }
        let runner = PythonRunner::new();
        let outcome = runner.run("x = 1 + 1", Duration::from_secs(10)).await;
        assert!(outcome.success);
        assert_eq!(
            outcome.result,
            Some(serde_json::json!("Code executed successfully"))
        );
    }

    #[tokio::test]
    async fn test_python_disallowed_import_rejected() {
        if !python3_available() {
            return;
        }
        let runner = PythonRunner::new();
        let outcome = runner
            .run("import subprocess", Duration::from_secs(10))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("not permitted"));
    }

    #[tokio::test]
    async fn test_python_allowed_import_and_deadline() {
        if !python3_available() {
            return;
        }
        let runner = PythonRunner::new();
        // `time` is allow-listed, so the sleep really runs and the host
        // deadline has to cut it short.
        let outcome = runner
            .run("import time\ntime.sleep(10)", Duration::from_secs(1))
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.kind, Some(ExecErrorKind::Timeout));
    }
}
