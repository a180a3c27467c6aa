//! 설정 관리 — ratewarden.toml 파싱, 탐색, 런타임 설정
//!
//! [`RatewardenConfig`]는 데몬 전역 설정과 소스 → 싱크 연결 그래프를 담는
//! 최상위 구조체입니다. 플러그인별 옵션은 `config` 테이블 그대로 보관하고,
//! 각 플러그인 크레이트가 자기 타입으로 역직렬화합니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`RATEWARDEN_GENERAL_LOG_LEVEL=debug` 형식)
//! 3. 설정 파일 (`ratewarden.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), ratewarden_core::error::RatewardenError> {
//! use ratewarden_core::config::RatewardenConfig;
//!
//! let path = RatewardenConfig::discover(None)?;
//! let config = RatewardenConfig::load(&path).await?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, RatewardenError};

/// 설정 파일 이름
pub const CONFIG_FILE_NAME: &str = "ratewarden.toml";

/// 채널 용량 상한
const MAX_CHANNEL_CAPACITY: usize = 1_000_000;
/// 종료 유예 시간 상한 (밀리초)
const MAX_SHUTDOWN_GRACE_MS: u64 = 60_000;

/// Ratewarden 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatewardenConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// 파이프라인 설정
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// 소스 목록 (각 소스는 자기 싱크 목록을 가짐)
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
}

impl RatewardenConfig {
    /// 기본 탐색 경로 목록을 반환합니다.
    ///
    /// 현재 디렉토리, `~/.config/ratewarden/`, `/etc/ratewarden/` 순서입니다.
    /// `HOME`이 설정되지 않았으면 사용자 경로는 건너뜁니다.
    pub fn default_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".").join(CONFIG_FILE_NAME)];
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(
                PathBuf::from(home)
                    .join(".config")
                    .join("ratewarden")
                    .join(CONFIG_FILE_NAME),
            );
        }
        paths.push(PathBuf::from("/etc/ratewarden").join(CONFIG_FILE_NAME));
        paths
    }

    /// 사용할 설정 파일 경로를 결정합니다.
    ///
    /// 명시적 경로가 있으면 존재 여부만 확인하고, 없으면 기본 탐색 경로 중
    /// 처음으로 존재하는 파일을 고릅니다.
    pub fn discover(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
        match explicit {
            Some(path) => Self::discover_in(&[path.to_path_buf()]),
            None => Self::discover_in(&Self::default_search_paths()),
        }
    }

    /// 주어진 후보 경로 중 처음으로 존재하는 파일을 반환합니다.
    pub fn discover_in(candidates: &[PathBuf]) -> Result<PathBuf, ConfigError> {
        candidates
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .ok_or_else(|| ConfigError::NoConfigFound {
                attempted: candidates.iter().map(|p| p.display().to_string()).collect(),
            })
    }

    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드와 검증을 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RatewardenError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 읽습니다 (오버라이드/검증 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, RatewardenError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RatewardenError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                RatewardenError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, RatewardenError> {
        toml::from_str(toml_str).map_err(|e| {
            RatewardenError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 전역 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `RATEWARDEN_{SECTION}_{FIELD}`.
    /// 소스/싱크 목록은 파일에서만 설정합니다.
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "RATEWARDEN_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "RATEWARDEN_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "RATEWARDEN_GENERAL_PID_FILE");

        // Metrics
        override_parsed(&mut self.metrics.enabled, "RATEWARDEN_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "RATEWARDEN_METRICS_LISTEN_ADDR",
        );
        override_parsed(&mut self.metrics.port, "RATEWARDEN_METRICS_PORT");
        override_string(&mut self.metrics.endpoint, "RATEWARDEN_METRICS_ENDPOINT");

        // Pipeline
        override_parsed(
            &mut self.pipeline.channel_capacity,
            "RATEWARDEN_PIPELINE_CHANNEL_CAPACITY",
        );
        override_parsed(
            &mut self.pipeline.shutdown_grace_ms,
            "RATEWARDEN_PIPELINE_SHUTDOWN_GRACE_MS",
        );
        override_parsed(
            &mut self.pipeline.health_log_interval_secs,
            "RATEWARDEN_PIPELINE_HEALTH_LOG_INTERVAL_SECS",
        );
    }

    /// 전역 설정값의 유효성을 검증합니다.
    ///
    /// 플러그인 유형 해석과 플러그인별 옵션 검증은 데몬이 레지스트리를 통해 수행합니다.
    pub fn validate(&self) -> Result<(), RatewardenError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.metrics.enabled && !self.metrics.endpoint.starts_with('/') {
            return Err(invalid("metrics.endpoint", "must start with '/'"));
        }

        if self.pipeline.channel_capacity == 0
            || self.pipeline.channel_capacity > MAX_CHANNEL_CAPACITY
        {
            return Err(invalid(
                "pipeline.channel_capacity",
                format!("must be between 1 and {MAX_CHANNEL_CAPACITY}"),
            ));
        }

        if self.pipeline.shutdown_grace_ms > MAX_SHUTDOWN_GRACE_MS {
            return Err(invalid(
                "pipeline.shutdown_grace_ms",
                format!("must be at most {MAX_SHUTDOWN_GRACE_MS}"),
            ));
        }

        if self.sources.is_empty() {
            return Err(invalid("sources", "at least one source must be configured"));
        }

        for (index, source) in self.sources.iter().enumerate() {
            if source.plugin_type.trim().is_empty() {
                return Err(invalid(
                    &format!("sources[{index}].type"),
                    "must not be empty",
                ));
            }
            for (sink_index, sink) in source.sinks.iter().enumerate() {
                if sink.plugin_type.trim().is_empty() {
                    return Err(invalid(
                        &format!("sources[{index}].sinks[{sink_index}].type"),
                        "must not be empty",
                    ));
                }
            }
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 생성하지 않음)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: String::new(),
        }
    }
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus 엔드포인트 활성화 여부
    pub enabled: bool,
    /// 바인딩 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
    /// 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9317,
            endpoint: "/metrics".to_owned(),
        }
    }
}

/// 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 소스 → 싱크 채널 용량
    pub channel_capacity: usize,
    /// 정지 시 드레인 유예 시간 (밀리초)
    pub shutdown_grace_ms: u64,
    /// 헬스 로그 주기 (초, 0이면 비활성)
    pub health_log_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
            shutdown_grace_ms: 200,
            health_log_interval_secs: 60,
        }
    }
}

/// 소스 설정 — 유형, 옵션 테이블, 연결된 싱크 목록
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    /// 플러그인 유형 이름 (대소문자 무시)
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// 인스턴스 이름 (없으면 `<type>-<index>`)
    #[serde(default)]
    pub name: Option<String>,
    /// 플러그인 옵션
    #[serde(default)]
    pub config: toml::Table,
    /// 이 소스의 이벤트를 받을 싱크 목록
    #[serde(default)]
    pub sinks: Vec<PluginSpec>,
}

impl SourceSpec {
    /// 인스턴스 이름을 결정합니다.
    pub fn instance_name(&self, index: usize) -> String {
        instance_name(self.name.as_deref(), &self.plugin_type, index)
    }
}

/// 싱크 설정 — 유형과 옵션 테이블
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSpec {
    /// 플러그인 유형 이름 (대소문자 무시)
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// 인스턴스 이름 (없으면 `<type>-<index>`)
    #[serde(default)]
    pub name: Option<String>,
    /// 플러그인 옵션
    #[serde(default)]
    pub config: toml::Table,
}

impl PluginSpec {
    /// 소스 이름 아래의 인스턴스 이름을 결정합니다 (예: `api-limit/linux_ipset-0`).
    pub fn instance_name(&self, source_name: &str, index: usize) -> String {
        format!(
            "{source_name}/{}",
            instance_name(self.name.as_deref(), &self.plugin_type, index)
        )
    }
}

/// 플러그인 옵션 테이블을 구체 타입으로 역직렬화합니다.
///
/// `field`는 에러 메시지에 표시할 설정 위치입니다.
pub fn decode_plugin_config<T>(table: &toml::Table, field: &str) -> Result<T, ConfigError>
where
    T: serde::de::DeserializeOwned,
{
    toml::Value::Table(table.clone())
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::InvalidValue {
            field: field.to_owned(),
            reason: e.to_string(),
        })
}

fn instance_name(explicit: Option<&str>, plugin_type: &str, index: usize) -> String {
    match explicit {
        Some(name) if !name.trim().is_empty() => name.to_owned(),
        _ => format!("{}-{index}", plugin_type.to_ascii_lowercase()),
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> RatewardenError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = std::any::type_name::<T>(),
                "failed to parse env var, ignoring"
            ),
        }
    }
}
