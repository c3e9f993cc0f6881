use async_trait::async_trait;
use factorlab_core::config::ExecutorConfig;
use factorlab_core::{Error, ExecutionResult, FailureKind, Fixture, Result};
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::protocol::{parse_output, ParsedOutput};
use crate::wrapper::{timeout_message, wrap_snippet, WrapOptions};
use crate::CodeExecutor;

/// How long to wait for the process to be reaped after a kill.
const KILL_WAIT_SECS: u64 = 2;
/// How long to wait for pipe readers once the process is gone.
const DRAIN_SECS: u64 = 2;

/// Cut `s` to at most `max_chars` bytes on a char boundary.
pub fn safe_truncate(s: &str, max_chars: usize) -> &str {
    if s.len() <= max_chars {
        return s;
    }
    let mut end = max_chars;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn bounded(s: String, max_chars: usize) -> String {
    if s.len() <= max_chars {
        s
    } else {
        format!("{}\n... (output truncated)", safe_truncate(&s, max_chars))
    }
}

/// Runs snippets in a fresh `python` process per call.
#[derive(Debug, Clone)]
pub struct PythonHarness {
    python: String,
    wrap: WrapOptions,
    kill_grace: Duration,
    max_output_chars: usize,
    /// Where temp scripts go; system temp dir when None.
    script_dir: Option<PathBuf>,
}

impl PythonHarness {
    pub fn new(python: impl Into<String>, wrap: WrapOptions) -> Self {
        Self {
            python: python.into(),
            wrap,
            kill_grace: Duration::from_secs(5),
            max_output_chars: 10000,
            script_dir: None,
        }
    }

    pub fn from_config(cfg: &ExecutorConfig) -> Self {
        Self {
            python: cfg.python_path.clone(),
            wrap: WrapOptions {
                timeout_secs: cfg.timeout_secs,
                data_root: cfg.data_root.clone(),
            },
            kill_grace: Duration::from_secs(cfg.kill_grace_secs),
            max_output_chars: cfg.max_output_chars,
            script_dir: None,
        }
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn with_script_dir(mut self, dir: PathBuf) -> Self {
        self.script_dir = Some(dir);
        self
    }

    pub fn python(&self) -> &str {
        &self.python
    }

    /// Budget after which the process is killed from outside.
    pub fn hard_deadline(&self) -> Duration {
        Duration::from_secs(self.wrap.timeout_secs) + self.kill_grace
    }

    /// Resolve the interpreter on PATH (or as given).
    pub fn check_interpreter(&self) -> Result<PathBuf> {
        which::which(&self.python)
            .map_err(|e| Error::Executor(format!("Python interpreter '{}' not found: {}", self.python, e)))
    }

    fn write_script(&self, script: &str) -> Result<tempfile::NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("explore_").suffix(".py");
        let mut file = match &self.script_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| Error::Executor(format!("Failed to create temp script: {}", e)))?;
        file.write_all(script.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| Error::Executor(format!("Failed to write temp script: {}", e)))?;
        Ok(file)
    }

    pub async fn run(&self, code: &str, fixture: &Fixture) -> Result<ExecutionResult> {
        let script = wrap_snippet(code, fixture, &self.wrap)?;
        let script_file = self.write_script(&script)?;
        let outcome = self.run_script(script_file.path().to_path_buf(), fixture).await;
        // Removed on every path, including spawn failures.
        if let Err(e) = script_file.close() {
            warn!(error = %e, "Failed to remove temp script");
        }
        outcome
    }

    async fn run_script(&self, path: PathBuf, fixture: &Fixture) -> Result<ExecutionResult> {
        let started = Instant::now();
        let mut child = Command::new(&self.python)
            .arg(&path)
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Executor(format!("Failed to spawn {}: {}", self.python, e)))?;

        debug!(script = %path.display(), fixture = %fixture, "Snippet process started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Executor("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Executor("Failed to capture stderr".to_string()))?;
        let stdout_task = tokio::spawn(read_all(stdout));
        let stderr_task = tokio::spawn(read_all(stderr));

        let deadline = self.hard_deadline();
        let (status, killed) = match timeout(deadline, child.wait()).await {
            Ok(res) => (Some(res.map_err(|e| Error::Executor(format!("wait failed: {}", e)))?), false),
            Err(_) => {
                warn!(deadline_secs = deadline.as_secs(), fixture = %fixture, "Snippet exceeded hard deadline, killing");
                let _ = child.kill().await;
                let reaped = timeout(Duration::from_secs(KILL_WAIT_SECS), child.wait())
                    .await
                    .ok()
                    .and_then(|r| r.ok());
                (reaped, true)
            }
        };

        let stdout = drain(stdout_task).await;
        let stderr = drain(stderr_task).await;
        let elapsed = started.elapsed();

        let mut result = if killed {
            // Nothing is salvaged from a killed process.
            ExecutionResult::failed(
                fixture,
                FailureKind::Timeout,
                timeout_message(self.wrap.timeout_secs),
                Some("TimeoutError".to_string()),
                None,
            )
        } else {
            let parsed = parse_output(&stdout);
            if let ParsedOutput::Unparsable(reason) = &parsed {
                let tail = safe_truncate(&stderr, 500);
                warn!(reason = %reason, stderr = %tail, "Snippet output could not be parsed");
            }
            parsed.into_execution_result(fixture)
        };

        result.exit_code = status.and_then(|s| s.code());
        result.duration_ms = elapsed.as_millis() as u64;
        result.stdout = bounded(stdout, self.max_output_chars);
        result.stderr = bounded(stderr, self.max_output_chars);

        info!(
            fixture = %fixture,
            success = result.success,
            failure = ?result.failure_kind,
            duration_ms = result.duration_ms,
            "Snippet execution finished"
        );
        Ok(result)
    }
}

async fn read_all<R: tokio::io::AsyncRead + Unpin>(mut reader: R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Collect a pipe reader. A grandchild holding the pipe open must not stall us.
async fn drain(task: JoinHandle<std::io::Result<Vec<u8>>>) -> String {
    let abort = task.abort_handle();
    match timeout(Duration::from_secs(DRAIN_SECS), task).await {
        Ok(Ok(Ok(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Ok(Err(e))) => {
            warn!(error = %e, "Pipe read failed");
            String::new()
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Pipe reader task failed");
            String::new()
        }
        Err(_) => {
            abort.abort();
            warn!("Pipe still open after process exit, dropping output");
            String::new()
        }
    }
}

#[async_trait]
impl CodeExecutor for PythonHarness {
    async fn execute(&self, code: &str, fixture: &Fixture) -> Result<ExecutionResult> {
        self.run(code, fixture).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factorlab_core::FactorValue;

    fn python_with_pandas() -> Option<&'static str> {
        let ok = std::process::Command::new("python3")
            .args(["-c", "import pandas, numpy"])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        if !ok {
            eprintln!("skipping: python3 with pandas/numpy not available");
            return None;
        }
        Some("python3")
    }

    fn harness(python: &str, timeout_secs: u64) -> PythonHarness {
        PythonHarness::new(
            python,
            WrapOptions {
                timeout_secs,
                data_root: "/nonexistent".to_string(),
            },
        )
    }

    #[test]
    fn test_safe_truncate_multibyte() {
        let s = "超时abc";
        assert_eq!(safe_truncate(s, 4), "超");
        assert_eq!(safe_truncate(s, 100), s);
        assert!(bounded("x".repeat(20), 5).ends_with("(output truncated)"));
        assert_eq!(bounded("short".to_string(), 5), "short");
    }

    #[test]
    fn test_hard_deadline() {
        let h = harness("python3", 60);
        assert_eq!(h.hard_deadline(), Duration::from_secs(65));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_infrastructure_error() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness("/definitely/not/python", 5).with_script_dir(dir.path().to_path_buf());
        let err = h.run("pass", &Fixture::validation()).await.unwrap_err();
        assert!(matches!(err, Error::Executor(_)));
        // Script removed even though nothing ran.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_scalar_and_series() {
        let Some(py) = python_with_pandas() else { return };
        let dir = tempfile::tempdir().unwrap();
        let code = r#"
import numpy as np
import pandas as pd

def calculate_factor(code, date):
    print("noise from snippet")
    s = pd.Series([1.0, np.nan, 3.0], index=["a", "b", "c"])
    return {"level": 1.25, "trend": s}, {"arr": np.array([1.0, 2.0, 3.0, 4.0])}
"#;
        let h = harness(py, 30).with_script_dir(dir.path().to_path_buf());
        let r = h.run(code, &Fixture::validation()).await.unwrap();
        assert!(r.success, "unexpected failure: {:?}", r.error);
        assert_eq!(r.factors["level"], FactorValue::Scalar { value: Some(1.25) });
        match &r.factors["trend"] {
            FactorValue::Series { stats, data } => {
                assert_eq!(data.x, vec!["a", "b", "c"]);
                assert_eq!(data.y, vec![Some(1.0), None, Some(3.0)]);
                assert_eq!(stats.count, 2);
                assert!((stats.mean.unwrap() - 2.0).abs() < 1e-12);
                assert!((stats.std.unwrap() - 2f64.sqrt()).abs() < 1e-9);
            }
            other => panic!("unexpected {:?}", other),
        }
        match &r.key_variables["arr"] {
            FactorValue::Array { stats, data } => {
                assert_eq!(data.len(), 4);
                // population std of 1..4
                assert!((stats.std.unwrap() - 1.25f64.sqrt()).abs() < 1e-9);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(r.plotly_data.is_some());
        assert!(r.stdout.contains("noise from snippet"));
        assert_eq!(r.exit_code, Some(0));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_exception_carries_type_and_traceback() {
        let Some(py) = python_with_pandas() else { return };
        let code = "def calculate_factor(code, date):\n    raise KeyError('price')\n";
        let r = harness(py, 30).run(code, &Fixture::validation()).await.unwrap();
        assert!(!r.success);
        assert_eq!(r.error_type.as_deref(), Some("KeyError"));
        assert_eq!(r.failure_kind, Some(FailureKind::Runtime));
        let tb = r.traceback.unwrap();
        assert!(tb.contains("<factor>"), "traceback should point into the snippet: {}", tb);
        assert_eq!(r.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_missing_entry_point() {
        let Some(py) = python_with_pandas() else { return };
        let r = harness(py, 30).run("def other(code, date):\n    return 1\n", &Fixture::validation()).await.unwrap();
        assert!(!r.success);
        assert_eq!(r.error_type.as_deref(), Some("NameError"));
    }

    #[tokio::test]
    async fn test_compat_return_shapes() {
        let Some(py) = python_with_pandas() else { return };
        let h = harness(py, 30);
        let bare_map = h.run("def calculate_factor(code, date):\n    return {'v': 2}\n", &Fixture::validation()).await.unwrap();
        assert!(bare_map.success);
        assert_eq!(bare_map.factors["v"], FactorValue::Scalar { value: Some(2.0) });
        assert!(bare_map.key_variables.is_empty());

        let bare_value = h.run("def calculate_factor(code, date):\n    return 7\n", &Fixture::validation()).await.unwrap();
        assert_eq!(bare_value.factors["result"], FactorValue::Scalar { value: Some(7.0) });

        let dict_factor = h
            .run(
                "def calculate_factor(code, date):\n    return {'m': {'a': 1, 'b': 'x', 'c': float('nan')}}, {}\n",
                &Fixture::validation(),
            )
            .await
            .unwrap();
        match &dict_factor.factors["m"] {
            FactorValue::Dict { value } => {
                assert_eq!(value["a"], factorlab_core::DictValue::Number(1.0));
                assert_eq!(value["b"], factorlab_core::DictValue::Text("x".to_string()));
                assert_eq!(value["c"], factorlab_core::DictValue::Null);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_readers_use_fixture_and_cannot_be_redefined() {
        let Some(py) = python_with_pandas() else { return };
        let root = tempfile::tempdir().unwrap();
        let day = root.path().join("20220819").join("transaction");
        std::fs::create_dir_all(&day).unwrap();
        std::fs::write(
            day.join("000001_20220819_transaction.csv"),
            "exchtime,price,volume,turnover,flag,index,localtime,ask_order,bid_order\n\
             1660872600000000,10.0,100,1000,66,1,0,1,2\n\
             1660872601000000,10.1,200,2020,83,2,0,3,4\n\
             1660872602000000,10.2,300,3060,32,3,0,5,6\n",
        )
        .unwrap();
        let code = r#"
def read_trade(symbol, date, with_retreat=0):
    return None

def calculate_factor(code, date):
    df = read_trade(code, date)
    return {"rows": len(df), "vwap": float((df.price * df.volume).sum() / df.volume.sum())}, {}
"#;
        let h = PythonHarness::new(
            py,
            WrapOptions {
                timeout_secs: 30,
                data_root: root.path().to_string_lossy().into_owned(),
            },
        );
        let r = h.run(code, &Fixture::validation()).await.unwrap();
        assert!(r.success, "unexpected failure: {:?} {:?}", r.error, r.traceback);
        // Cancelled trade (flag 32) filtered by the canonical reader.
        assert_eq!(r.factors["rows"], FactorValue::Scalar { value: Some(2.0) });
    }

    #[tokio::test]
    async fn test_alarm_timeout() {
        let Some(py) = python_with_pandas() else { return };
        let code = "def calculate_factor(code, date):\n    while True:\n        pass\n";
        let started = Instant::now();
        let r = harness(py, 1).with_kill_grace(Duration::from_secs(10)).run(code, &Fixture::validation()).await.unwrap();
        assert!(r.is_timeout());
        assert_eq!(r.error_type.as_deref(), Some("TimeoutError"));
        assert!(r.error.unwrap().contains("超时"));
        assert!(started.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test]
    async fn test_outer_kill_when_alarm_is_ignored() {
        let Some(py) = python_with_pandas() else { return };
        let dir = tempfile::tempdir().unwrap();
        let code = r#"
import signal
import time

def calculate_factor(code, date):
    signal.signal(signal.SIGALRM, signal.SIG_IGN)
    time.sleep(30)
    return {}, {}
"#;
        let started = Instant::now();
        let r = harness(py, 1)
            .with_kill_grace(Duration::from_secs(1))
            .with_script_dir(dir.path().to_path_buf())
            .run(code, &Fixture::validation())
            .await
            .unwrap();
        assert!(r.is_timeout());
        assert!(r.error.unwrap().contains("超时"));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
