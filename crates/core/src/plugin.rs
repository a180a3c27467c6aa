//! 플러그인 시스템 — 소스/싱크 생명주기 관리
//!
//! 소스와 싱크는 모두 [`Plugin`]을 구현하고, 데몬은 [`PluginRegistry`]로
//! 등록 순서(소스 먼저, 싱크 나중)대로 초기화/시작/정지합니다.
//!
//! # 생명주기
//! ```text
//! Created → init() → Initialized → start() → Running → stop() → Stopped
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{PluginError, RatewardenError};
use crate::pipeline::{BoxFuture, HealthStatus};

// ─── PluginType ──────────────────────────────────────────────────────

/// 플러그인 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginType {
    /// 로그를 읽어 이벤트를 생산
    Source,
    /// 이벤트를 소비하여 외부 조치를 수행
    Sink,
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Sink => write!(f, "sink"),
        }
    }
}

// ─── PluginInfo ──────────────────────────────────────────────────────

/// 플러그인 메타데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// 인스턴스 이름 (예: `"api-limit"`, `"api-limit/linux_ipset-0"`)
    pub name: String,
    /// 구현 버전
    pub version: String,
    /// 설명
    pub description: String,
    /// 역할
    pub plugin_type: PluginType,
}

// ─── PluginState ─────────────────────────────────────────────────────

/// 플러그인 생명주기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginState {
    /// 생성됨 (init 전)
    Created,
    /// 초기화 완료 (start 가능)
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
    /// 오류 상태
    Failed,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Initialized => write!(f, "initialized"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ─── PluginContext ───────────────────────────────────────────────────

/// 워커가 복구할 수 없는 에러를 데몬에 보고할 때 사용하는 메시지
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFailure {
    /// 실패한 플러그인 인스턴스 이름
    pub plugin: String,
    /// 실패 사유
    pub reason: String,
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.plugin, self.reason)
    }
}

/// 플러그인 팩토리에 전달되는 실행 컨텍스트
///
/// 정지 시 드레인 대기 시간과 치명적 실패 보고 채널을 담습니다.
#[derive(Debug, Clone)]
pub struct PluginContext {
    shutdown_grace: Duration,
    failures: mpsc::UnboundedSender<WorkerFailure>,
}

impl PluginContext {
    /// 컨텍스트와 실패 수신 채널을 생성합니다.
    pub fn new(shutdown_grace: Duration) -> (Self, mpsc::UnboundedReceiver<WorkerFailure>) {
        let (failures, rx) = mpsc::unbounded_channel();
        (
            Self {
                shutdown_grace,
                failures,
            },
            rx,
        )
    }

    /// 정지 시 워커가 드레인할 수 있도록 기다리는 최대 시간
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    /// 치명적 실패를 보고합니다.
    ///
    /// 수신 측이 이미 종료되었으면 조용히 무시합니다.
    pub fn report_failure(&self, plugin: impl Into<String>, reason: impl Into<String>) {
        let failure = WorkerFailure {
            plugin: plugin.into(),
            reason: reason.into(),
        };
        if self.failures.send(failure).is_err() {
            tracing::debug!("worker failure receiver already closed");
        }
    }
}

// ─── Plugin Trait ────────────────────────────────────────────────────

/// 소스와 싱크가 구현하는 플러그인 trait
///
/// # 구현 예시
/// ```ignore
/// impl Plugin for MySink {
///     fn info(&self) -> &PluginInfo { &self.info }
///     fn state(&self) -> PluginState { self.state }
///
///     async fn init(&mut self) -> Result<(), RatewardenError> { Ok(()) }
///     async fn start(&mut self) -> Result<(), RatewardenError> { Ok(()) }
///     async fn stop(&mut self) -> Result<(), RatewardenError> { Ok(()) }
///     async fn health_check(&self) -> HealthStatus { HealthStatus::Healthy }
/// }
/// ```
pub trait Plugin: Send + Sync {
    /// 플러그인 메타데이터를 반환합니다.
    fn info(&self) -> &PluginInfo;

    /// 현재 플러그인 상태를 반환합니다.
    fn state(&self) -> PluginState;

    /// 플러그인을 초기화합니다.
    ///
    /// 외부 리소스 확인(예: ipset 패밀리 감지)을 수행합니다.
    /// 여기서의 실패는 데몬 시작을 중단시킵니다.
    fn init(&mut self) -> impl Future<Output = Result<(), RatewardenError>> + Send;

    /// 워커 태스크를 시작합니다.
    fn start(&mut self) -> impl Future<Output = Result<(), RatewardenError>> + Send;

    /// 워커를 정지합니다.
    ///
    /// 유예 시간 안에 드레인하지 못한 태스크는 강제 종료됩니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), RatewardenError>> + Send;

    /// 플러그인의 건강 상태를 확인합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}

// ─── DynPlugin Trait ─────────────────────────────────────────────────

/// dyn-compatible 플러그인 trait
///
/// `Plugin`은 RPITIT를 사용하므로 `dyn Plugin`이 불가합니다.
/// `DynPlugin`은 `BoxFuture`를 반환하여 `Box<dyn DynPlugin>`으로 관리할 수 있게 합니다.
pub trait DynPlugin: Send + Sync {
    /// 플러그인 메타데이터를 반환합니다.
    fn info(&self) -> &PluginInfo;

    /// 현재 플러그인 상태를 반환합니다.
    fn state(&self) -> PluginState;

    /// 플러그인을 초기화합니다.
    fn init(&mut self) -> BoxFuture<'_, Result<(), RatewardenError>>;

    /// 플러그인을 시작합니다.
    fn start(&mut self) -> BoxFuture<'_, Result<(), RatewardenError>>;

    /// 플러그인을 정지합니다.
    fn stop(&mut self) -> BoxFuture<'_, Result<(), RatewardenError>>;

    /// 플러그인의 건강 상태를 확인합니다.
    fn health_check(&self) -> BoxFuture<'_, HealthStatus>;
}

impl<T: Plugin> DynPlugin for T {
    fn info(&self) -> &PluginInfo {
        Plugin::info(self)
    }

    fn state(&self) -> PluginState {
        Plugin::state(self)
    }

    fn init(&mut self) -> BoxFuture<'_, Result<(), RatewardenError>> {
        Box::pin(Plugin::init(self))
    }

    fn start(&mut self) -> BoxFuture<'_, Result<(), RatewardenError>> {
        Box::pin(Plugin::start(self))
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), RatewardenError>> {
        Box::pin(Plugin::stop(self))
    }

    fn health_check(&self) -> BoxFuture<'_, HealthStatus> {
        Box::pin(Plugin::health_check(self))
    }
}

// ─── PluginRegistry ──────────────────────────────────────────────────

/// 플러그인 생명주기 레지스트리
///
/// 등록 순서가 보존됩니다. 소스를 먼저 등록하면 `stop_all`에서 소스가 먼저
/// 정지하고 출력 채널을 닫으므로, 뒤따르는 싱크는 남은 이벤트를 드레인한 뒤 종료합니다.
pub struct PluginRegistry {
    plugins: Vec<Box<dyn DynPlugin>>,
}

impl PluginRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    /// 플러그인을 등록합니다.
    ///
    /// 동일한 이름의 플러그인이 이미 있으면 에러를 반환합니다.
    pub fn register(&mut self, plugin: Box<dyn DynPlugin>) -> Result<(), RatewardenError> {
        let name = plugin.info().name.clone();
        if self.plugins.iter().any(|p| p.info().name == name) {
            return Err(PluginError::AlreadyRegistered { name }.into());
        }
        self.plugins.push(plugin);
        Ok(())
    }

    /// 이름으로 플러그인을 조회합니다.
    pub fn get(&self, name: &str) -> Option<&dyn DynPlugin> {
        self.plugins
            .iter()
            .find(|p| p.info().name == name)
            .map(|p| p.as_ref())
    }

    /// 모든 플러그인을 등록 순서대로 초기화합니다.
    ///
    /// 첫 번째 실패 시 즉시 반환합니다.
    pub async fn init_all(&mut self) -> Result<(), RatewardenError> {
        for plugin in &mut self.plugins {
            plugin.init().await?;
        }
        Ok(())
    }

    /// 모든 플러그인을 등록 순서대로 시작합니다.
    ///
    /// 첫 번째 실패 시 즉시 반환합니다.
    /// 이미 시작된 플러그인은 호출자가 `stop_all`로 정리해야 합니다.
    pub async fn start_all(&mut self) -> Result<(), RatewardenError> {
        for plugin in &mut self.plugins {
            plugin.start().await?;
        }
        Ok(())
    }

    /// 모든 플러그인을 등록 순서대로 정지합니다.
    ///
    /// 실행 중이 아닌 플러그인은 건너뜁니다. 개별 실패가 있어도 나머지를
    /// 계속 정지하고, 에러는 모아서 반환합니다.
    pub async fn stop_all(&mut self) -> Result<(), RatewardenError> {
        let mut errors = Vec::new();
        for plugin in &mut self.plugins {
            if plugin.state() != PluginState::Running {
                continue;
            }
            if let Err(e) = plugin.stop().await {
                errors.push(format!("{}: {}", plugin.info().name, e));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PluginError::StopFailed(errors.join("; ")).into())
        }
    }

    /// 등록된 플러그인 수를 반환합니다.
    pub fn count(&self) -> usize {
        self.plugins.len()
    }

    /// 등록된 모든 플러그인의 정보를 반환합니다.
    pub fn list(&self) -> Vec<&PluginInfo> {
        self.plugins.iter().map(|p| p.info()).collect()
    }

    /// 모든 플러그인의 건강 상태를 조회합니다.
    pub async fn health_check_all(&self) -> Vec<(String, PluginState, HealthStatus)> {
        let mut statuses = Vec::with_capacity(self.plugins.len());
        for plugin in &self.plugins {
            let name = plugin.info().name.clone();
            let state = plugin.state();
            let health = plugin.health_check().await;
            statuses.push((name, state, health));
        }
        statuses
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::sync::{Arc, Mutex};

    /// 테스트용 Mock 플러그인
    struct MockPlugin {
        info: PluginInfo,
        state: PluginState,
        fail_on_init: bool,
        fail_on_start: bool,
        fail_on_stop: bool,
        stop_log: Option<Arc<Mutex<Vec<String>>>>,
    }

    impl MockPlugin {
        fn new(name: &str, plugin_type: PluginType) -> Self {
            Self {
                info: PluginInfo {
                    name: name.to_owned(),
                    version: "0.1.0".to_owned(),
                    description: format!("Mock plugin: {name}"),
                    plugin_type,
                },
                state: PluginState::Created,
                fail_on_init: false,
                fail_on_start: false,
                fail_on_stop: false,
                stop_log: None,
            }
        }

        fn failing_init(mut self) -> Self {
            self.fail_on_init = true;
            self
        }

        fn failing_start(mut self) -> Self {
            self.fail_on_start = true;
            self
        }

        fn failing_stop(mut self) -> Self {
            self.fail_on_stop = true;
            self
        }

        fn recording_stops(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
            self.stop_log = Some(log);
            self
        }
    }

    impl Plugin for MockPlugin {
        fn info(&self) -> &PluginInfo {
            &self.info
        }

        fn state(&self) -> PluginState {
            self.state
        }

        async fn init(&mut self) -> Result<(), RatewardenError> {
            if self.fail_on_init {
                self.state = PluginState::Failed;
                return Err(PipelineError::InitFailed("mock init failure".to_owned()).into());
            }
            self.state = PluginState::Initialized;
            Ok(())
        }

        async fn start(&mut self) -> Result<(), RatewardenError> {
            if self.fail_on_start {
                self.state = PluginState::Failed;
                return Err(PipelineError::InitFailed("mock start failure".to_owned()).into());
            }
            self.state = PluginState::Running;
            Ok(())
        }

        async fn stop(&mut self) -> Result<(), RatewardenError> {
            if let Some(log) = &self.stop_log {
                log.lock().unwrap().push(self.info.name.clone());
            }
            if self.fail_on_stop {
                self.state = PluginState::Failed;
                return Err(PipelineError::NotRunning.into());
            }
            self.state = PluginState::Stopped;
            Ok(())
        }

        async fn health_check(&self) -> HealthStatus {
            match self.state {
                PluginState::Running => HealthStatus::Healthy,
                PluginState::Failed => HealthStatus::Unhealthy("failed".to_owned()),
                _ => HealthStatus::Unhealthy("not running".to_owned()),
            }
        }
    }

    #[test]
    fn plugin_type_and_state_display() {
        assert_eq!(PluginType::Source.to_string(), "source");
        assert_eq!(PluginType::Sink.to_string(), "sink");
        assert_eq!(PluginState::Initialized.to_string(), "initialized");
        assert_eq!(PluginState::Failed.to_string(), "failed");
    }

    #[tokio::test]
    async fn dyn_plugin_lifecycle() {
        let mut plugin: Box<dyn DynPlugin> =
            Box::new(MockPlugin::new("boxed", PluginType::Source));
        assert_eq!(plugin.state(), PluginState::Created);

        plugin.init().await.unwrap();
        assert_eq!(plugin.state(), PluginState::Initialized);

        plugin.start().await.unwrap();
        assert!(plugin.health_check().await.is_healthy());

        plugin.stop().await.unwrap();
        assert_eq!(plugin.state(), PluginState::Stopped);
    }

    #[test]
    fn registry_rejects_duplicate_names() {
        let mut registry = PluginRegistry::new();
        registry
            .register(Box::new(MockPlugin::new("dup", PluginType::Source)))
            .unwrap();
        let err = registry
            .register(Box::new(MockPlugin::new("dup", PluginType::Sink)))
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn registry_preserves_registration_order() {
        let mut registry = PluginRegistry::default();
        for name in ["src", "sink-a", "sink-b"] {
            registry
                .register(Box::new(MockPlugin::new(name, PluginType::Sink)))
                .unwrap();
        }
        let names: Vec<_> = registry.list().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["src", "sink-a", "sink-b"]);
        assert!(registry.get("sink-a").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[tokio::test]
    async fn init_all_fails_fast() {
        let mut registry = PluginRegistry::new();
        registry
            .register(Box::new(MockPlugin::new("ok", PluginType::Source)))
            .unwrap();
        registry
            .register(Box::new(
                MockPlugin::new("broken-sink", PluginType::Sink).failing_init(),
            ))
            .unwrap();
        registry
            .register(Box::new(MockPlugin::new("skipped", PluginType::Sink)))
            .unwrap();

        assert!(registry.init_all().await.is_err());
        assert_eq!(
            registry.get("ok").unwrap().state(),
            PluginState::Initialized
        );
        assert_eq!(
            registry.get("broken-sink").unwrap().state(),
            PluginState::Failed
        );
        assert_eq!(
            registry.get("skipped").unwrap().state(),
            PluginState::Created
        );
    }

    #[tokio::test]
    async fn start_all_failure_leaves_earlier_plugins_running() {
        let mut registry = PluginRegistry::new();
        registry
            .register(Box::new(MockPlugin::new("first", PluginType::Source)))
            .unwrap();
        registry
            .register(Box::new(
                MockPlugin::new("second", PluginType::Sink).failing_start(),
            ))
            .unwrap();

        registry.init_all().await.unwrap();
        assert!(registry.start_all().await.is_err());
        assert_eq!(registry.get("first").unwrap().state(), PluginState::Running);

        registry.stop_all().await.unwrap();
        assert_eq!(registry.get("first").unwrap().state(), PluginState::Stopped);
        assert_eq!(registry.get("second").unwrap().state(), PluginState::Failed);
    }

    #[tokio::test]
    async fn stop_all_runs_in_order_and_aggregates_errors() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        registry
            .register(Box::new(
                MockPlugin::new("source", PluginType::Source)
                    .failing_stop()
                    .recording_stops(log.clone()),
            ))
            .unwrap();
        registry
            .register(Box::new(
                MockPlugin::new("sink", PluginType::Sink).recording_stops(log.clone()),
            ))
            .unwrap();

        registry.init_all().await.unwrap();
        registry.start_all().await.unwrap();

        let err = registry.stop_all().await.unwrap_err();
        assert!(err.to_string().contains("source"));
        assert_eq!(*log.lock().unwrap(), ["source", "sink"]);
        assert_eq!(registry.get("sink").unwrap().state(), PluginState::Stopped);
    }

    #[tokio::test]
    async fn health_check_all_reports_every_plugin() {
        let mut registry = PluginRegistry::new();
        registry
            .register(Box::new(MockPlugin::new("a", PluginType::Source)))
            .unwrap();
        registry
            .register(Box::new(MockPlugin::new("b", PluginType::Sink)))
            .unwrap();
        registry.init_all().await.unwrap();
        registry.start_all().await.unwrap();

        let statuses = registry.health_check_all().await;
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|(_, state, health)| {
            *state == PluginState::Running && health.is_healthy()
        }));
    }

    #[tokio::test]
    async fn context_delivers_worker_failures() {
        let (ctx, mut rx) = PluginContext::new(Duration::from_millis(200));
        assert_eq!(ctx.shutdown_grace(), Duration::from_millis(200));

        ctx.clone().report_failure("api-limit", "cannot spawn tail");
        let failure = rx.recv().await.unwrap();
        assert_eq!(failure.plugin, "api-limit");
        assert_eq!(failure.to_string(), "api-limit: cannot spawn tail");
    }

    #[test]
    fn report_failure_after_receiver_dropped_is_silent() {
        let (ctx, rx) = PluginContext::new(Duration::from_millis(1));
        drop(rx);
        ctx.report_failure("x", "y");
    }
}
