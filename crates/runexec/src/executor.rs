//! Captured command execution with environment and timeout controls.
//! （擷取輸出的外部指令執行，支援環境變數與逾時控制。）
//!
//! The executor wraps `std::process::Command` for commands whose output is
//! only needed once they exit: compiler probes and compilations. Programs
//! whose output must be streamed live go through [`crate::process`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that may surface while preparing or executing a command.
/// （準備或執行指令時有可能發生的錯誤。）
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read process output: {0}")]
    Output(std::io::Error),
    #[error("failed to poll process status: {0}")]
    Poll(std::io::Error),
    #[error("process timed out after {0:?}")]
    TimedOut(Duration),
    #[error("failed to terminate process: {0}")]
    Kill(std::io::Error),
}

/// Serializable description of a command to run.
/// （可序列化的指令設定資料結構。）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<OsString>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<OsString, OsString>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_kill_on_timeout")]
    pub kill_on_timeout: bool,
}

fn default_kill_on_timeout() -> bool {
    true
}

impl RunSpec {
    /// Creates a new command pointing at the given program.
    /// （以指定的程式建立指令設定。）
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            timeout_ms: None,
            kill_on_timeout: true,
        }
    }

    /// Appends an argument to the command.
    /// （為指令加入一個參數。）
    pub fn push_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds multiple arguments at once.
    /// （一次加入多個參數。）
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Registers an environment variable override.
    /// （設定環境變數覆寫值。）
    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Registers several environment overrides.
    pub fn with_envs<'a, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (&'a OsString, &'a OsString)>,
    {
        for (key, value) in vars {
            self.env.insert(key.clone(), value.clone());
        }
        self
    }

    /// Sets the working directory.
    /// （設定指令執行的工作目錄。）
    pub fn with_working_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(path.into());
        self
    }

    /// Applies a timeout to the command execution.
    /// （設定指令執行的逾時限制。）
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let millis = timeout.as_millis().clamp(1, u128::from(u64::MAX)) as u64;
        self.timeout_ms = Some(millis);
        self
    }

    /// Controls whether the process is killed after a timeout.
    /// （決定逾時後是否強制終止進程。）
    pub fn with_kill_on_timeout(mut self, kill: bool) -> Self {
        self.kill_on_timeout = kill;
        self
    }
}

/// Result information produced by a command execution.
/// （指令執行完成後的結果資訊。）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration_ms: u128,
    pub timed_out: bool,
}

impl RunResult {
    /// Indicates whether the command exited successfully (code `0`).
    /// （判斷指令是否以 0 代表成功結束。）
    pub fn success(&self) -> bool {
        !self.timed_out && matches!(self.exit_code, Some(0))
    }

    /// Diagnostic text: stderr, or stdout when stderr is empty.
    pub fn diagnostics(&self) -> String {
        let stream = if self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        String::from_utf8_lossy(stream).into_owned()
    }
}

/// Executes commands described by a [`RunSpec`].
/// （依照設定執行指令的主要元件。）
pub struct RunExecutor;

impl RunExecutor {
    /// Runs the provided command and captures output.
    /// （執行指定指令並擷取輸出。）
    pub fn execute(spec: &RunSpec) -> Result<RunResult, RunError> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.envs(&spec.env);

        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let start = Instant::now();
        let mut child = command.spawn().map_err(|source| RunError::Spawn {
            program: spec.program.display().to_string(),
            source,
        })?;

        let timeout_duration = spec.timeout_ms.map(Duration::from_millis);
        let mut timed_out = false;
        let output = match timeout_duration {
            Some(timeout) => loop {
                if child.try_wait().map_err(RunError::Poll)?.is_some() {
                    break child.wait_with_output().map_err(RunError::Output)?;
                }
                if start.elapsed() >= timeout {
                    if spec.kill_on_timeout {
                        child.kill().map_err(RunError::Kill)?;
                        timed_out = true;
                        break child.wait_with_output().map_err(RunError::Output)?;
                    } else {
                        return Err(RunError::TimedOut(timeout));
                    }
                }
                thread::sleep(Duration::from_millis(15));
            },
            None => child.wait_with_output().map_err(RunError::Output)?,
        };
        let duration = start.elapsed();

        Ok(RunResult {
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms: duration.as_millis(),
            timed_out,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::str;
    use tempfile::tempdir;

    fn require_utf8(bytes: &[u8]) -> &str {
        str::from_utf8(bytes).expect("output should be valid UTF-8 / 輸出需為有效 UTF-8")
    }

    #[test]
    fn execute_command_with_environment() {
        let spec = RunSpec::new("sh")
            .with_args(["-c", "printf '%s' \"$RUN_TEST_MESSAGE\""])
            .with_env("RUN_TEST_MESSAGE", "hello-runpp");

        let result = RunExecutor::execute(&spec).expect("command should execute / 指令應成功執行");
        assert!(result.success(), "exit code should be zero / 結束碼應為 0");
        assert_eq!(require_utf8(&result.stdout), "hello-runpp");
        assert!(require_utf8(&result.stderr).is_empty());
        assert!(!result.timed_out);
    }

    #[test]
    fn execute_with_custom_working_directory() {
        let temp = tempdir().expect("tempdir should work / 臨時目錄應可建立");
        let spec = RunSpec::new("sh")
            .with_args(["-c", "pwd -P"])
            .with_working_dir(temp.path());

        let result = RunExecutor::execute(&spec).expect("command should execute / 指令應成功執行");
        assert!(result.success());
        let expected = temp.path().canonicalize().expect("canonical tempdir");
        assert_eq!(
            require_utf8(&result.stdout).trim_end(),
            expected.to_str().expect("path convertible to str / 路徑需可轉為字串")
        );
    }

    #[test]
    fn failing_command_reports_exit_code_and_diagnostics() {
        let spec = RunSpec::new("sh").with_args(["-c", "echo broken >&2; exit 3"]);
        let result = RunExecutor::execute(&spec).expect("command should execute");
        assert!(!result.success());
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.diagnostics(), "broken\n");
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let spec = RunSpec::new("/definitely/not/a/compiler");
        let err = RunExecutor::execute(&spec).unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
    }

    #[test]
    fn enforce_timeout_and_kill() {
        let spec = RunSpec::new("sh")
            .with_args(["-c", "sleep 1 && echo done"])
            .with_timeout(Duration::from_millis(100));

        let result =
            RunExecutor::execute(&spec).expect("command should report timeout / 指令應回報逾時");
        assert!(result.timed_out, "result should indicate timeout / 結果需標示逾時");
        assert!(!result.success());
    }

    #[test]
    fn timeout_without_kill_returns_error() {
        let spec = RunSpec::new("sh")
            .with_args(["-c", "sleep 1"])
            .with_timeout(Duration::from_millis(100))
            .with_kill_on_timeout(false);

        let err = RunExecutor::execute(&spec).unwrap_err();
        assert!(matches!(err, RunError::TimedOut(_)));
    }
}
