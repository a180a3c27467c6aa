//! `NGINX_RATELIMIT` 소스 플러그인
//!
//! [`NginxRatelimitSource`]는 팔로워, 디코더, 필터, 중복 제거 캐시를 묶어
//! 하나의 error log에서 매칭된 이벤트를 출력 채널들로 팬아웃합니다.
//!
//! # 내부 아키텍처
//! ```text
//! LineFollower ──(Bytes)──▶ processing task ──(MatchedEvent)──▶ sink 채널 N개
//!   stdout/stderr 리더         Selector
//! ```
//!
//! # 정지 순서
//! 1. 취소 토큰 → 팔로워가 자식에 SIGINT를 보내고 종료, 라인 채널 닫힘
//! 2. 처리 태스크가 버퍼에 남은 라인을 마저 처리한 뒤 출력 채널을 닫음
//! 3. 유예 시간을 넘긴 태스크는 abort

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ratewarden_core::error::{PipelineError, RatewardenError};
use ratewarden_core::event::{MODULE_NGINX_SOURCE, MatchedEvent};
use ratewarden_core::metrics as m;
use ratewarden_core::pipeline::HealthStatus;
use ratewarden_core::plugin::{Plugin, PluginContext, PluginInfo, PluginState, PluginType};

use crate::config::NginxSourceConfig;
use crate::decoder::RatelimitLineDecoder;
use crate::dedup::DedupCache;
use crate::error::NginxSourceError;
use crate::follower::{FollowerStats, LineFollower};
use crate::selector::{Selection, Selector};

/// 컨텍스트를 지정하지 않았을 때의 정지 유예 시간
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

/// nginx 레이트 리밋 소스
///
/// # 사용 예시
/// ```ignore
/// let (tx, rx) = tokio::sync::mpsc::channel(1000);
/// let mut source = NginxRatelimitSourceBuilder::new()
///     .name("api-limit")
///     .config(config)
///     .output(tx)
///     .context(ctx)
///     .build()?;
///
/// source.init().await?;
/// source.start().await?;
/// ```
pub struct NginxRatelimitSource {
    info: PluginInfo,
    state: PluginState,
    config: NginxSourceConfig,
    ctx: PluginContext,
    /// init에서 컴파일되고 start에서 처리 태스크로 이동
    decoder: Option<RatelimitLineDecoder>,
    /// start에서 처리 태스크로 이동
    outputs: Vec<mpsc::Sender<MatchedEvent>>,
    cancel: CancellationToken,
    follower_stats: Option<Arc<FollowerStats>>,
    delivered: Arc<AtomicU64>,
    follower_task: Option<JoinHandle<()>>,
    processing_task: Option<JoinHandle<()>>,
}

impl NginxRatelimitSource {
    /// 소스 인스턴스 이름
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// 소스 설정
    pub fn config(&self) -> &NginxSourceConfig {
        &self.config
    }

    /// 팔로워 재시작 횟수
    pub fn follower_restarts(&self) -> u64 {
        self.follower_stats
            .as_ref()
            .map(|s| s.restarts())
            .unwrap_or(0)
    }

    /// 출력 채널로 전달된 이벤트 수
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    fn running_health(&self) -> HealthStatus {
        let Some(stats) = &self.follower_stats else {
            return HealthStatus::Unhealthy("follower not started".to_owned());
        };

        if stats.is_failed() {
            return HealthStatus::Unhealthy("follower failed".to_owned());
        }
        if self
            .follower_task
            .as_ref()
            .is_some_and(|task| task.is_finished())
        {
            return HealthStatus::Unhealthy("follower exited".to_owned());
        }

        let window = Duration::from_millis(self.config.backoff_max_ms);
        match stats.last_restart() {
            Some(at) if at.elapsed() < window => HealthStatus::Degraded(format!(
                "follower restarted {} time(s), last {}ms ago",
                stats.restarts(),
                at.elapsed().as_millis()
            )),
            _ => HealthStatus::Healthy,
        }
    }
}

impl Plugin for NginxRatelimitSource {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn state(&self) -> PluginState {
        self.state
    }

    async fn init(&mut self) -> Result<(), RatewardenError> {
        if self.state != PluginState::Created {
            return Err(PipelineError::InitFailed(format!(
                "source '{}' already initialized",
                self.info.name
            ))
            .into());
        }

        if let Err(e) = self.config.validate() {
            self.state = PluginState::Failed;
            return Err(e.into());
        }
        match RatelimitLineDecoder::new() {
            Ok(decoder) => self.decoder = Some(decoder),
            Err(e) => {
                self.state = PluginState::Failed;
                return Err(e.into());
            }
        }

        tracing::info!(
            source = %self.info.name,
            path = %self.config.error_log_file_path.display(),
            zone = %self.config.ratelimit_zone_name,
            kind = %self.config.ratelimit_type,
            action = %self.config.ratelimit_action,
            outputs = self.outputs.len(),
            "nginx source initialized"
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
                    "source '{}' cannot start from state {other}",
                    self.info.name
                ))
                .into());
            }
        }

        let decoder = self.decoder.take().ok_or_else(|| {
            PipelineError::InitFailed(format!("source '{}' has no decoder", self.info.name))
        })?;
        let selector = Selector::new(
            self.info.name.clone(),
            decoder,
            self.config.match_criteria(),
            DedupCache::new(self.config.cache_size, self.config.cache_ttl()),
        );

        let (line_tx, line_rx) = mpsc::channel(self.config.line_channel_capacity);
        let follower = LineFollower::new(self.info.name.clone(), self.config.follower_config());
        let stats = follower.stats();
        self.follower_stats = Some(Arc::clone(&stats));

        self.cancel = CancellationToken::new();
        let cancel = self.cancel.clone();
        let ctx = self.ctx.clone();
        let name = self.info.name.clone();
        self.follower_task = Some(tokio::spawn(async move {
            if let Err(e) = follower.run(line_tx, cancel).await {
                stats.mark_failed();
                tracing::error!(source = %name, error = %e, "follower failed");
                ctx.report_failure(name, e.to_string());
            }
        }));

        let outputs = std::mem::take(&mut self.outputs);
        self.processing_task = Some(tokio::spawn(process_lines(
            self.info.name.clone(),
            selector,
            line_rx,
            outputs,
            Arc::clone(&self.delivered),
        )));

        self.state = PluginState::Running;
        tracing::info!(source = %self.info.name, "nginx source started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), RatewardenError> {
        if self.state != PluginState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        tracing::info!(source = %self.info.name, "stopping nginx source");
        self.cancel.cancel();

        let deadline = tokio::time::Instant::now() + self.ctx.shutdown_grace();
        for (label, task) in [
            ("follower", self.follower_task.take()),
            ("processing", self.processing_task.take()),
        ] {
            let Some(mut task) = task else { continue };
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                tracing::warn!(
                    source = %self.info.name,
                    task = label,
                    "task did not finish within shutdown grace, aborting"
                );
                task.abort();
            }
        }

        self.state = PluginState::Stopped;
        tracing::info!(
            source = %self.info.name,
            delivered = self.delivered_count(),
            restarts = self.follower_restarts(),
            "nginx source stopped"
        );
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PluginState::Running => self.running_health(),
            PluginState::Created | PluginState::Initialized => {
                HealthStatus::Unhealthy("not started".to_owned())
            }
            PluginState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
            PluginState::Failed => HealthStatus::Unhealthy("failed".to_owned()),
        }
    }
}

/// 라인 채널이 닫힐 때까지 라인을 판단하고 매칭 이벤트를 팬아웃합니다.
///
/// 반환 시 `outputs`가 drop되어 싱크는 스트림 종료를 감지합니다.
async fn process_lines(
    name: String,
    mut selector: Selector,
    mut lines: mpsc::Receiver<Bytes>,
    mut outputs: Vec<mpsc::Sender<MatchedEvent>>,
    delivered: Arc<AtomicU64>,
) {
    while let Some(raw) = lines.recv().await {
        let line = String::from_utf8_lossy(&raw);

        match selector.select(&line) {
            Selection::Deliver(event) => {
                let matched = MatchedEvent::new(MODULE_NGINX_SOURCE, event);
                tracing::info!(
                    source = %name,
                    event_id = %matched.id,
                    trace_id = %matched.metadata.trace_id,
                    address = %matched.event.address,
                    zone = %matched.event.zone,
                    excess = matched.event.excess,
                    "rate-limit event matched"
                );
                fan_out(&name, &mut outputs, matched).await;
                delivered.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::SOURCE_DELIVERED_TOTAL, m::LABEL_SOURCE => name.clone())
                    .increment(1);
            }
            Selection::Undecodable(stage) => {
                tracing::debug!(source = %name, %stage, "line is not a rate-limit event");
            }
            Selection::Rejected(reason) => {
                tracing::debug!(source = %name, %reason, "event rejected by match criteria");
            }
            Selection::Suppressed => {
                tracing::debug!(source = %name, "event suppressed by dedup window");
            }
        }
    }

    tracing::debug!(
        source = %name,
        outputs = outputs.len(),
        "line stream closed, closing outbound channels"
    );
}

/// 모든 출력 채널에 이벤트를 보냅니다.
///
/// 가득 찬 채널에서는 대기합니다. 수신측이 사라진 채널은 목록에서 제거합니다.
async fn fan_out(
    name: &str,
    outputs: &mut Vec<mpsc::Sender<MatchedEvent>>,
    matched: MatchedEvent,
) {
    let mut closed = Vec::new();
    for (index, tx) in outputs.iter().enumerate() {
        if tx.send(matched.clone()).await.is_err() {
            tracing::warn!(source = %name, output = index, "sink channel closed, dropping output");
            closed.push(index);
        }
    }
    for index in closed.into_iter().rev() {
        outputs.remove(index);
    }
}

/// 소스 빌더
pub struct NginxRatelimitSourceBuilder {
    name: Option<String>,
    config: Option<NginxSourceConfig>,
    outputs: Vec<mpsc::Sender<MatchedEvent>>,
    ctx: Option<PluginContext>,
}

impl NginxRatelimitSourceBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            name: None,
            config: None,
            outputs: Vec::new(),
            ctx: None,
        }
    }

    /// 인스턴스 이름을 지정합니다. 기본값은 `nginx-ratelimit`입니다.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 소스 설정을 지정합니다.
    pub fn config(mut self, config: NginxSourceConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 출력 채널을 하나 추가합니다.
    ///
    /// 싱크마다 전용 채널을 하나씩 연결합니다.
    pub fn output(mut self, tx: mpsc::Sender<MatchedEvent>) -> Self {
        self.outputs.push(tx);
        self
    }

    /// 실행 컨텍스트를 지정합니다.
    pub fn context(mut self, ctx: PluginContext) -> Self {
        self.ctx = Some(ctx);
        self
    }

    /// 소스를 빌드합니다.
    pub fn build(self) -> Result<NginxRatelimitSource, NginxSourceError> {
        let config = self
            .config
            .ok_or_else(|| NginxSourceError::config("config", "source config is required"))?;
        config.validate()?;

        let ctx = self
            .ctx
            .unwrap_or_else(|| PluginContext::new(DEFAULT_SHUTDOWN_GRACE).0);

        Ok(NginxRatelimitSource {
            info: PluginInfo {
                name: self.name.unwrap_or_else(|| MODULE_NGINX_SOURCE.to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                description: "nginx rate-limit error log follower".to_owned(),
                plugin_type: PluginType::Source,
            },
            state: PluginState::Created,
            config,
            ctx,
            decoder: None,
            outputs: self.outputs,
            cancel: CancellationToken::new(),
            follower_stats: None,
            delivered: Arc::new(AtomicU64::new(0)),
            follower_task: None,
            processing_task: None,
        })
    }
}

impl Default for NginxRatelimitSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
