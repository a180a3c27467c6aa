//! 라인 팔로워 감독자
//!
//! 외부 "파일 따라가기" 프로세스(기본값 `tail -n 0 -F <path>`)를 실행하고,
//! stdout 라인은 디코딩 경로로, stderr 라인은 로그로 보냅니다.
//!
//! # 세션 종료 처리
//! ```text
//! spawn ──▶ running ──┬─ cancel ───────────▶ SIGINT → wait → (kill) → 종료
//!                     ├─ exit by SIGINT ───▶ 종료
//!                     └─ 그 외 exit ───────▶ backoff 대기 → spawn
//! ```
//!
//! 프로그램을 실행할 수 없는 경우(바이너리 없음, 권한 없음)는 재시도로
//! 복구되지 않으므로 [`NginxSourceError::Spawn`]으로 즉시 반환합니다.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ratewarden_core::metrics as m;

use crate::error::NginxSourceError;

/// 한 라인의 최대 길이 (초과분은 잘림)
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// SIGINT 이후 자식 프로세스가 종료되기를 기다리는 시간
const INTERRUPT_GRACE: Duration = Duration::from_secs(2);

/// 취소된 세션의 스트림 리더 태스크를 기다리는 시간
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// 팔로워 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowerConfig {
    /// 실행할 프로그램
    pub program: String,
    /// 선행 인자 (경로는 마지막에 붙음)
    pub args: Vec<String>,
    /// 따라갈 파일 경로
    pub path: PathBuf,
    /// 재시작 지연 초기값
    pub backoff_initial: Duration,
    /// 재시작 지연 상한
    pub backoff_max: Duration,
}

/// 지수 백오프
///
/// 상한에 도달하면 더 늘어나지 않고 상한 간격으로 계속 재시도합니다.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// 새 백오프를 생성합니다.
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// 다음 대기 시간을 반환하고 간격을 두 배로 늘립니다.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// 초기 간격으로 되돌립니다.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// 소스와 공유하는 팔로워 상태
#[derive(Debug, Default)]
pub struct FollowerStats {
    restarts: AtomicU64,
    last_restart: Mutex<Option<Instant>>,
    failed: AtomicBool,
}

impl FollowerStats {
    /// 누적 재시작 횟수
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// 마지막 재시작 시각
    pub fn last_restart(&self) -> Option<Instant> {
        self.last_restart.lock().ok().and_then(|guard| *guard)
    }

    /// 팔로워가 치명적으로 실패했는지 여부
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    /// 치명적 실패를 기록합니다.
    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Relaxed);
    }

    fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_restart.lock() {
            *guard = Some(Instant::now());
        }
    }
}

/// 세션 종료 사유
#[derive(Debug)]
enum SessionEnd {
    /// 취소 요청으로 종료
    Cancelled,
    /// 자식이 SIGINT로 종료 (정상 정지)
    Interrupted,
    /// 예기치 않은 종료
    Exited(ExitStatus),
    /// wait 자체가 실패
    WaitFailed(std::io::Error),
}

/// 외부 팔로워 프로세스 감독자
#[derive(Debug)]
pub struct LineFollower {
    name: String,
    config: FollowerConfig,
    stats: Arc<FollowerStats>,
}

impl LineFollower {
    /// 감독자를 생성합니다. `name`은 로그와 메트릭 레이블에 쓰이는 소스 이름입니다.
    pub fn new(name: impl Into<String>, config: FollowerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            stats: Arc::new(FollowerStats::default()),
        }
    }

    /// 공유 상태 핸들
    pub fn stats(&self) -> Arc<FollowerStats> {
        Arc::clone(&self.stats)
    }

    /// 취소되거나 자식이 SIGINT로 종료될 때까지 팔로워를 실행합니다.
    ///
    /// 반환 시 `lines` 송신측이 모두 drop되므로 수신측은 스트림 종료를 감지합니다.
    pub async fn run(
        self,
        lines: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Result<(), NginxSourceError> {
        let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_max);

        loop {
            let started = Instant::now();
            let end = self.run_session(&lines, &cancel).await?;

            let reason = match end {
                SessionEnd::Cancelled => {
                    tracing::debug!(source = %self.name, "follower cancelled");
                    return Ok(());
                }
                SessionEnd::Interrupted => {
                    tracing::info!(source = %self.name, "follower interrupted, not restarting");
                    return Ok(());
                }
                SessionEnd::Exited(status) => status.to_string(),
                SessionEnd::WaitFailed(e) => format!("wait failed: {e}"),
            };

            if cancel.is_cancelled() || lines.is_closed() {
                return Ok(());
            }

            if started.elapsed() >= self.config.backoff_max {
                backoff.reset();
            }
            let delay = backoff.next_delay();

            self.stats.record_restart();
            metrics::counter!(m::SOURCE_FOLLOWER_RESTARTS_TOTAL, m::LABEL_SOURCE => self.name.clone())
                .increment(1);
            tracing::warn!(
                source = %self.name,
                program = %self.config.program,
                path = %self.config.path.display(),
                status = %reason,
                backoff_ms = delay.as_millis() as u64,
                restarts = self.stats.restarts(),
                "follower exited unexpectedly, restarting"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn run_session(
        &self,
        lines: &mpsc::Sender<Bytes>,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd, NginxSourceError> {
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .arg(&self.config.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| NginxSourceError::Spawn {
            program: self.config.program.clone(),
            source,
        })?;

        let stdout = child.stdout.take().ok_or_else(|| NginxSourceError::MissingPipe {
            program: self.config.program.clone(),
            stream: "stdout",
        })?;
        let stderr = child.stderr.take().ok_or_else(|| NginxSourceError::MissingPipe {
            program: self.config.program.clone(),
            stream: "stderr",
        })?;

        tracing::info!(
            source = %self.name,
            program = %self.config.program,
            path = %self.config.path.display(),
            pid = child.id(),
            "follower started"
        );

        let stdout_task = tokio::spawn(forward_lines(stdout, lines.clone(), self.name.clone()));
        let stderr_task = tokio::spawn(log_diagnostics(stderr, self.name.clone()));

        let end = tokio::select! {
            status = child.wait() => match status {
                Ok(status) if exited_by_interrupt(&status) => SessionEnd::Interrupted,
                Ok(status) => SessionEnd::Exited(status),
                Err(e) => SessionEnd::WaitFailed(e),
            },
            _ = cancel.cancelled() => {
                self.terminate(&mut child).await;
                SessionEnd::Cancelled
            }
        };

        // 자식이 스스로 종료했다면 파이프에 남은 라인까지 모두 전달합니다.
        // 재시작된 `tail -n 0`은 이미 지나간 라인을 다시 읽지 않습니다.
        match end {
            SessionEnd::Cancelled => join_reader(stdout_task).await,
            _ => self.drain_reader(stdout_task, cancel).await,
        }
        join_reader(stderr_task).await;

        Ok(end)
    }

    /// stdout 리더가 EOF까지 전달을 마칠 때까지 기다립니다. 취소되면 중단합니다.
    async fn drain_reader(&self, mut task: JoinHandle<()>, cancel: &CancellationToken) {
        tokio::select! {
            _ = &mut task => {}
            _ = cancel.cancelled() => {
                tracing::debug!(source = %self.name, "cancelled while draining follower output");
                join_reader(task).await;
            }
        }
    }

    /// 자식에게 SIGINT를 보내고, 유예 시간 안에 끝나지 않으면 강제 종료합니다.
    async fn terminate(&self, child: &mut Child) {
        send_interrupt(child);

        match tokio::time::timeout(INTERRUPT_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(source = %self.name, %status, "follower exited after interrupt");
            }
            Ok(Err(e)) => {
                tracing::warn!(source = %self.name, error = %e, "failed to wait for follower");
            }
            Err(_) => {
                tracing::warn!(
                    source = %self.name,
                    grace_ms = INTERRUPT_GRACE.as_millis() as u64,
                    "follower ignored interrupt, killing"
                );
                if let Err(e) = child.kill().await {
                    tracing::warn!(source = %self.name, error = %e, "failed to kill follower");
                }
            }
        }
    }
}

/// stdout 라인을 라인 채널로 전달합니다.
async fn forward_lines<R>(stream: R, lines: mpsc::Sender<Bytes>, name: String)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(512);

    loop {
        buf.clear();
        match read_line_bounded(&mut reader, &mut buf, MAX_LINE_LENGTH).await {
            Ok(0) => break,
            Ok(_) => {
                if lines.send(Bytes::copy_from_slice(&buf)).await.is_err() {
                    tracing::debug!(source = %name, "line receiver closed");
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(source = %name, error = %e, "error reading follower stdout");
                break;
            }
        }
    }
}

/// stderr 라인을 info 레벨로 기록합니다.
async fn log_diagnostics<R>(stream: R, name: String)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match read_line_bounded(&mut reader, &mut buf, MAX_LINE_LENGTH).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let text = text.trim_end();
                if !text.is_empty() {
                    tracing::info!(source = %name, stream = "stderr", "{text}");
                }
            }
            Err(e) => {
                tracing::warn!(source = %name, error = %e, "error reading follower stderr");
                break;
            }
        }
    }
}

/// `\n`까지 읽되 `buf`에는 최대 `limit` 바이트만 담고 나머지는 버립니다.
///
/// 소비한 전체 바이트 수를 반환합니다. 0이면 EOF입니다.
async fn read_line_bounded<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut total = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(total);
        }
        let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (&available[..=i], true),
            None => (available, false),
        };
        let room = limit.saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        let used = chunk.len();
        reader.consume(used);
        total += used;
        if done {
            return Ok(total);
        }
    }
}

async fn join_reader(mut task: JoinHandle<()>) {
    if tokio::time::timeout(READER_JOIN_TIMEOUT, &mut task)
        .await
        .is_err()
    {
        task.abort();
    }
}

#[cfg(unix)]
fn send_interrupt(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: pid는 아직 회수(wait)되지 않은 자식 프로세스의 ID이며,
        // kill(2)은 메모리를 건드리지 않습니다.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
        if rc != 0 {
            tracing::debug!(pid, error = %std::io::Error::last_os_error(), "SIGINT delivery failed");
        }
    }
}

#[cfg(not(unix))]
fn send_interrupt(_child: &Child) {}

#[cfg(unix)]
fn exited_by_interrupt(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(libc::SIGINT)
}

#[cfg(not(unix))]
fn exited_by_interrupt(_status: &ExitStatus) -> bool {
    false
}
