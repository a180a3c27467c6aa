//! `LINUX_IPSET` 싱크 플러그인
//!
//! [`LinuxIpsetSink`]는 입력 채널에서 [`MatchedEvent`]를 받아
//! 주소를 Linux ipset 집합에 추가합니다.
//!
//! # 처리 흐름
//! ```text
//! MatchedEvent ─▶ 버전 확인 ─▶ 무시 대역 확인 ─▶ 명령 구성 ─┬─ dry_run ─▶ 로그
//!                    │              │                        └─ 실행 ────▶ ipset
//!                    ▼              ▼
//!                 Ignored        Ignored
//! ```
//!
//! 집합 패밀리 감지는 `init`에서 한 번 수행되며 실패하면 데몬 시작이 중단됩니다.
//! 이후 개별 명령 실패(0이 아닌 종료, 타임아웃)는 로그만 남기고 루프를 계속합니다.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ratewarden_core::error::{PipelineError, RatewardenError};
use ratewarden_core::event::{MODULE_IPSET_SINK, MatchedEvent};
use ratewarden_core::metrics as m;
use ratewarden_core::pipeline::HealthStatus;
use ratewarden_core::plugin::{Plugin, PluginContext, PluginInfo, PluginState, PluginType};
use ratewarden_core::types::{IpNet, IpVersion, find_overlapping};

use crate::config::LinuxIpsetSinkConfig;
use crate::error::IpsetSinkError;
use crate::executor::CommandRunner;
use crate::ipset::{self, SetInfo};

/// 이벤트를 무시한 사유
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// 주소 버전이 집합 패밀리와 다름
    VersionMismatch {
        /// 이벤트 주소의 버전
        address: IpVersion,
        /// 집합의 버전
        set: IpVersion,
    },
    /// 무시 대역과 겹침
    IgnoredCidr(IpNet),
}

impl IgnoreReason {
    /// 메트릭 레이블용 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VersionMismatch { .. } => "version_mismatch",
            Self::IgnoredCidr(_) => "ignored_cidr",
        }
    }
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionMismatch { address, set } => {
                write!(f, "version_mismatch(address={address}, set={set})")
            }
            Self::IgnoredCidr(net) => write!(f, "ignored_cidr({net})"),
        }
    }
}

/// 이벤트 하나의 처리 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// 집합에 추가됨
    Added,
    /// dry run: 명령을 구성했지만 실행하지 않음
    DryRun(Vec<String>),
    /// 로컬 필터에서 무시됨
    Ignored(IgnoreReason),
    /// 명령 실패 (항목은 버려짐)
    Failed(String),
}

/// 싱크 누적 카운터
#[derive(Debug, Default)]
pub struct SinkStats {
    added: AtomicU64,
    ignored: AtomicU64,
    dry_run: AtomicU64,
    failures: AtomicU64,
    last_failed: AtomicBool,
}

impl SinkStats {
    /// 추가된 엔트리 수
    pub fn added(&self) -> u64 {
        self.added.load(Ordering::Relaxed)
    }

    /// 무시된 이벤트 수
    pub fn ignored(&self) -> u64 {
        self.ignored.load(Ordering::Relaxed)
    }

    /// dry run으로 건너뛴 명령 수
    pub fn dry_run(&self) -> u64 {
        self.dry_run.load(Ordering::Relaxed)
    }

    /// 실패한 명령 수
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn record(&self, outcome: &Outcome) {
        match outcome {
            Outcome::Added => {
                self.added.fetch_add(1, Ordering::Relaxed);
                self.last_failed.store(false, Ordering::Relaxed);
            }
            Outcome::DryRun(_) => {
                self.dry_run.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Ignored(_) => {
                self.ignored.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Failed(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.last_failed.store(true, Ordering::Relaxed);
            }
        }
    }
}

/// 이벤트 하나를 처리하는 워커
///
/// 싱크의 처리 태스크가 소유하며, 테스트에서는 직접 호출할 수 있습니다.
pub struct SinkWorker<R: CommandRunner> {
    name: String,
    runner: Arc<R>,
    config: Arc<LinuxIpsetSinkConfig>,
    set_version: IpVersion,
}

impl<R: CommandRunner> SinkWorker<R> {
    /// 워커를 생성합니다.
    pub fn new(
        name: impl Into<String>,
        runner: Arc<R>,
        config: Arc<LinuxIpsetSinkConfig>,
        set_version: IpVersion,
    ) -> Self {
        Self {
            name: name.into(),
            runner,
            config,
            set_version,
        }
    }

    /// 로컬 필터를 평가합니다.
    pub fn evaluate(&self, address: &IpNet) -> Result<(), IgnoreReason> {
        let version = address.version();
        if version != self.set_version {
            return Err(IgnoreReason::VersionMismatch {
                address: version,
                set: self.set_version,
            });
        }
        if let Some(cidr) = find_overlapping(address, &self.config.ignore_cidrs) {
            return Err(IgnoreReason::IgnoredCidr(*cidr));
        }
        Ok(())
    }

    /// 이벤트 하나를 처리합니다.
    pub async fn handle(&self, matched: &MatchedEvent) -> Outcome {
        let event = &matched.event;

        if let Err(reason) = self.evaluate(&event.address) {
            tracing::debug!(
                sink = %self.name,
                trace_id = %matched.metadata.trace_id,
                address = %event.address,
                %reason,
                "event ignored"
            );
            metrics::counter!(
                m::SINK_IGNORED_TOTAL,
                m::LABEL_SINK => self.name.clone(),
                m::LABEL_REASON => reason.as_str()
            )
            .increment(1);
            return Outcome::Ignored(reason);
        }

        let comment = ipset::render_comment(
            self.config.entry_default_comment.as_deref(),
            event,
            chrono::Utc::now(),
        );
        let argv = ipset::add_command(
            &self.config.ipset_command,
            &self.config.ipset_name,
            &event.address,
            self.config.entry_default_timeout_seconds,
            &comment,
        );

        if self.config.dry_run {
            tracing::info!(
                sink = %self.name,
                trace_id = %matched.metadata.trace_id,
                address = %event.address,
                argv = ?argv,
                "dry run; would have added ipset entry"
            );
            metrics::counter!(m::SINK_DRY_RUN_TOTAL, m::LABEL_SINK => self.name.clone())
                .increment(1);
            return Outcome::DryRun(argv);
        }

        let started = Instant::now();
        let result = match self.runner.run(&argv).await {
            Ok(output) => output.check(&argv),
            Err(e) => Err(e),
        };
        metrics::histogram!(m::SINK_COMMAND_DURATION_SECONDS, m::LABEL_SINK => self.name.clone())
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(_) => {
                tracing::info!(
                    sink = %self.name,
                    trace_id = %matched.metadata.trace_id,
                    set = %self.config.ipset_name,
                    address = %event.address,
                    zone = %event.zone,
                    "ipset entry added"
                );
                metrics::counter!(m::SINK_ENTRIES_ADDED_TOTAL, m::LABEL_SINK => self.name.clone())
                    .increment(1);
                Outcome::Added
            }
            Err(e) => {
                log_command_failure(&self.name, &matched.metadata.trace_id, &argv, &e);
                metrics::counter!(m::SINK_COMMAND_FAILURES_TOTAL, m::LABEL_SINK => self.name.clone())
                    .increment(1);
                Outcome::Failed(e.to_string())
            }
        }
    }
}

fn log_command_failure(sink: &str, trace_id: &str, argv: &[String], err: &IpsetSinkError) {
    match err {
        IpsetSinkError::NonZeroExit {
            code,
            stdout,
            stderr,
            ..
        } => tracing::error!(
            sink,
            trace_id,
            argv = ?argv,
            rc = %code,
            stdout = %stdout,
            stderr = %stderr,
            "ipset command returned non-zero exit code"
        ),
        other => tracing::error!(
            sink,
            trace_id,
            argv = ?argv,
            error = %other,
            "ipset command failed"
        ),
    }
}

/// 집합 메타데이터를 조회해 주소 버전을 감지합니다.
pub async fn detect_set_version<R: CommandRunner>(
    runner: &R,
    config: &LinuxIpsetSinkConfig,
) -> Result<(IpVersion, SetInfo), IpsetSinkError> {
    let argv = ipset::list_command(&config.ipset_command, &config.ipset_name);
    let detection = |reason: String| IpsetSinkError::Detection {
        set: config.ipset_name.clone(),
        reason,
    };

    let output = runner
        .run(&argv)
        .await
        .and_then(|out| out.check(&argv))
        .map_err(|e| detection(e.to_string()))?;
    let info = ipset::parse_list_output(&output.stdout).map_err(|e| detection(e.to_string()))?;
    let version = info.ip_version().map_err(detection)?;
    Ok((version, info))
}

/// Linux ipset 싱크
///
/// # 사용 예시
/// ```ignore
/// let mut sink = LinuxIpsetSinkBuilder::new()
///     .name("api-limit/linux_ipset-0")
///     .config(config)
///     .runner(SystemCommandRunner::new(Duration::from_secs(2)))
///     .input(rx)
///     .build()?;
///
/// sink.init().await?;   // ipset list <set> -terse
/// sink.start().await?;
/// ```
pub struct LinuxIpsetSink<R: CommandRunner> {
    info: PluginInfo,
    state: PluginState,
    config: Arc<LinuxIpsetSinkConfig>,
    runner: Arc<R>,
    ctx: PluginContext,
    input: Option<mpsc::Receiver<MatchedEvent>>,
    set_version: Option<IpVersion>,
    set_info: Option<SetInfo>,
    stats: Arc<SinkStats>,
    task: Option<JoinHandle<()>>,
}

impl<R: CommandRunner> LinuxIpsetSink<R> {
    /// 싱크 인스턴스 이름
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// 감지되었거나 설정된 집합 주소 버전
    pub fn set_version(&self) -> Option<IpVersion> {
        self.set_version
    }

    /// `init`에서 조회한 집합 메타데이터 (버전이 설정된 경우 없음)
    pub fn set_info(&self) -> Option<&SetInfo> {
        self.set_info.as_ref()
    }

    /// 누적 카운터
    pub fn stats(&self) -> &SinkStats {
        &self.stats
    }
}

impl<R: CommandRunner> Plugin for LinuxIpsetSink<R> {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn state(&self) -> PluginState {
        self.state
    }

    async fn init(&mut self) -> Result<(), RatewardenError> {
        if self.state != PluginState::Created {
            return Err(PipelineError::InitFailed(format!(
                "sink '{}' already initialized",
                self.info.name
            ))
            .into());
        }

        if let Err(e) = self.config.validate() {
            self.state = PluginState::Failed;
            return Err(e.into());
        }

        let version = match self.config.ip_version() {
            Some(version) => version,
            None => match detect_set_version(self.runner.as_ref(), &self.config).await {
                Ok((version, info)) => {
                    tracing::debug!(sink = %self.info.name, ipset = ?info, "got ipset info");
                    self.set_info = Some(info);
                    version
                }
                Err(e) => {
                    self.state = PluginState::Failed;
                    tracing::error!(sink = %self.info.name, error = %e, "ipset detection failed");
                    return Err(e.into());
                }
            },
        };
        self.set_version = Some(version);

        tracing::info!(
            sink = %self.info.name,
            set = %self.config.ipset_name,
            ip_version = %version,
            dry_run = self.config.dry_run,
            "ipset sink initialized"
        );
        self.state = PluginState::Initialized;
        Ok(())
    }

    async fn start(&mut self) -> Result<(), RatewardenError> {
        match self.state {
            PluginState::Initialized => {}
            PluginState::Running => return Err(PipelineError::AlreadyRunning.into()),
            other => {
                return Err(PipelineError::InitFailed(format!(
                    "sink '{}' cannot start from state {other}",
                    self.info.name
                ))
                .into());
            }
        }

        let (Some(mut input), Some(version)) = (self.input.take(), self.set_version) else {
            return Err(PipelineError::InitFailed(format!(
                "sink '{}' has no input channel",
                self.info.name
            ))
            .into());
        };

        let worker = SinkWorker::new(
            self.info.name.clone(),
            Arc::clone(&self.runner),
            Arc::clone(&self.config),
            version,
        );
        let stats = Arc::clone(&self.stats);
        let name = self.info.name.clone();

        self.task = Some(tokio::spawn(async move {
            while let Some(matched) = input.recv().await {
                let outcome = worker.handle(&matched).await;
                stats.record(&outcome);
            }
            tracing::debug!(sink = %name, "input channel closed");
        }));

        self.state = PluginState::Running;
        tracing::info!(sink = %self.info.name, "ipset sink started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), RatewardenError> {
        if self.state != PluginState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        tracing::info!(sink = %self.info.name, "stopping ipset sink");

        if let Some(mut task) = self.task.take() {
            let grace = self.ctx.shutdown_grace();
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                tracing::warn!(
                    sink = %self.info.name,
                    grace_ms = grace.as_millis() as u64,
                    "sink did not drain within shutdown grace, aborting"
                );
                task.abort();
            }
        }

        self.state = PluginState::Stopped;
        tracing::info!(
            sink = %self.info.name,
            added = self.stats.added(),
            ignored = self.stats.ignored(),
            dry_run = self.stats.dry_run(),
            failures = self.stats.failures(),
            "ipset sink stopped"
        );
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PluginState::Running => {
                if self.task.as_ref().is_some_and(|t| t.is_finished()) {
                    HealthStatus::Unhealthy("input channel closed".to_owned())
                } else if self.stats.last_failed.load(Ordering::Relaxed) {
                    HealthStatus::Degraded(format!(
                        "last ipset command failed ({} failures total)",
                        self.stats.failures()
                    ))
                } else {
                    HealthStatus::Healthy
                }
            }
            PluginState::Created | PluginState::Initialized => {
                HealthStatus::Unhealthy("not started".to_owned())
            }
            PluginState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
            PluginState::Failed => HealthStatus::Unhealthy("failed".to_owned()),
        }
    }
}

/// 싱크 빌더
pub struct LinuxIpsetSinkBuilder<R: CommandRunner> {
    name: Option<String>,
    config: Option<LinuxIpsetSinkConfig>,
    runner: Option<R>,
    input: Option<mpsc::Receiver<MatchedEvent>>,
    ctx: Option<PluginContext>,
}

impl<R: CommandRunner> LinuxIpsetSinkBuilder<R> {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            name: None,
            config: None,
            runner: None,
            input: None,
            ctx: None,
        }
    }

    /// 인스턴스 이름을 지정합니다. 기본값은 `linux-ipset`입니다.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 싱크 설정을 지정합니다.
    pub fn config(mut self, config: LinuxIpsetSinkConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 명령 runner를 지정합니다.
    pub fn runner(mut self, runner: R) -> Self {
        self.runner = Some(runner);
        self
    }

    /// 입력 채널을 지정합니다.
    pub fn input(mut self, rx: mpsc::Receiver<MatchedEvent>) -> Self {
        self.input = Some(rx);
        self
    }

    /// 실행 컨텍스트를 지정합니다.
    pub fn context(mut self, ctx: PluginContext) -> Self {
        self.ctx = Some(ctx);
        self
    }

    /// 싱크를 빌드합니다.
    pub fn build(self) -> Result<LinuxIpsetSink<R>, IpsetSinkError> {
        let config = self
            .config
            .ok_or_else(|| IpsetSinkError::config("config", "sink config is required"))?;
        config.validate()?;
        let runner = self
            .runner
            .ok_or_else(|| IpsetSinkError::config("runner", "command runner is required"))?;
        let input = self
            .input
            .ok_or_else(|| IpsetSinkError::config("input", "input channel is required"))?;
        let ctx = self
            .ctx
            .unwrap_or_else(|| PluginContext::new(std::time::Duration::from_millis(200)).0);

        Ok(LinuxIpsetSink {
            info: PluginInfo {
                name: self.name.unwrap_or_else(|| MODULE_IPSET_SINK.to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                description: format!("adds rate-limited clients to ipset '{}'", config.ipset_name),
                plugin_type: PluginType::Sink,
            },
            state: PluginState::Created,
            config: Arc::new(config),
            runner: Arc::new(runner),
            ctx,
            input: Some(input),
            set_version: None,
            set_info: None,
            stats: Arc::new(SinkStats::default()),
            task: None,
        })
    }
}

impl<R: CommandRunner> Default for LinuxIpsetSinkBuilder<R> {
    fn default() -> Self {
        Self::new()
    }
}
