//! External command execution abstraction for testability.
//!
//! The [`CommandRunner`] trait abstracts process invocation, allowing
//! production code to use [`SystemCommandRunner`] while tests record
//! invocations without touching the kernel's ipset tables.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐
//! │ LinuxIpsetSink │
//! └───────┬────────┘
//!         │
//!         ▼
//!  ┌───────────────┐
//!  │ CommandRunner │ (trait)
//!  └───────────────┘
//!      │       │
//!      ▼       ▼
//!  ┌──────┐ ┌────────┐
//!  │System│ │Recorder│
//!  └──┬───┘ └────────┘
//!     │
//!     ▼
//!  ipset(8)
//! ```

use std::future::Future;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::error::IpsetSinkError;

/// Result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or `None` if the process was terminated by a signal.
    pub code: Option<i32>,
    /// Trimmed standard output.
    pub stdout: String,
    /// Trimmed standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Creates a successful output with the given stdout.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Returns `true` if the command exited with code 0.
    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Converts a non-zero exit into [`IpsetSinkError::NonZeroExit`].
    pub fn check(self, argv: &[String]) -> Result<Self, IpsetSinkError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(IpsetSinkError::NonZeroExit {
            argv: argv.join(" "),
            code: self
                .code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_owned()),
            stdout: self.stdout,
            stderr: self.stderr,
        })
    }
}

/// Trait abstracting external command invocation.
///
/// `argv[0]` is the program; the rest are its arguments. No shell is involved,
/// so arguments are never re-interpreted.
///
/// # Errors
///
/// - `IpsetSinkError::EmptyCommand`: `argv` is empty
/// - `IpsetSinkError::Spawn`: the program could not be started
/// - `IpsetSinkError::Timeout`: the program did not finish in time and was killed
///
/// A non-zero exit is *not* an error at this layer; callers decide with
/// [`CommandOutput::check`].
pub trait CommandRunner: Send + Sync + 'static {
    /// Runs a command to completion and captures its output.
    fn run(
        &self,
        argv: &[String],
    ) -> impl Future<Output = Result<CommandOutput, IpsetSinkError>> + Send;
}

/// Production runner backed by `tokio::process`.
///
/// The child is spawned with `kill_on_drop`, so a timed-out invocation is
/// killed when its future is dropped.
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl SystemCommandRunner {
    /// Creates a runner with the given per-invocation timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Per-invocation timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl CommandRunner for SystemCommandRunner {
    async fn run(&self, argv: &[String]) -> Result<CommandOutput, IpsetSinkError> {
        let (program, args) = argv.split_first().ok_or(IpsetSinkError::EmptyCommand)?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| IpsetSinkError::Spawn {
                program: program.clone(),
                source,
            })?;

        let started = Instant::now();
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(IpsetSinkError::Timeout {
                    argv: argv.join(" "),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        };

        tracing::trace!(
            program = %program,
            elapsed_ms = started.elapsed().as_millis() as u64,
            code = output.status.code(),
            "command finished"
        );

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

/// 테스트용 기록 runner
///
/// 호출된 명령을 기록하고, 미리 지정한 응답을 반환합니다.
#[cfg(test)]
#[derive(Default)]
pub struct MockCommandRunner {
    /// 호출된 명령 목록
    pub calls: std::sync::Mutex<Vec<Vec<String>>>,
    /// `list` 명령에 대한 stdout
    pub list_output: String,
    /// `add` 명령을 실패시킬지 여부
    pub fail_adds: bool,
}

#[cfg(test)]
impl MockCommandRunner {
    /// 주어진 `list` 출력으로 mock을 생성합니다.
    pub fn with_list_output(output: &str) -> Self {
        Self {
            list_output: output.to_owned(),
            ..Self::default()
        }
    }

    /// `add` 명령이 exit 1로 실패하도록 설정합니다.
    pub fn failing_adds(mut self) -> Self {
        self.fail_adds = true;
        self
    }

    /// 지금까지 기록된 명령
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl CommandRunner for MockCommandRunner {
    async fn run(&self, argv: &[String]) -> Result<CommandOutput, IpsetSinkError> {
        self.calls.lock().unwrap().push(argv.to_vec());
        match argv.get(1).map(String::as_str) {
            Some("list") => Ok(CommandOutput::success(self.list_output.clone())),
            _ if self.fail_adds => Ok(CommandOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: "ipset v7.19: Kernel error received: set type not supported".to_owned(),
            }),
            _ => Ok(CommandOutput::success("")),
        }
    }
}
