//! nginx 소스 설정
//!
//! [`NginxSourceConfig`]는 `[sources.config]` 테이블을 역직렬화한 값입니다.
//! 검증 후 [`MatchCriteria`], [`FollowerConfig`], 중복 제거 캐시 파라미터로 나뉘어
//! 각 구성 요소에 전달됩니다.
//!
//! # 사용 예시
//! ```ignore
//! let config = NginxSourceConfig::from_table(&spec.config, "sources[0].config")?;
//! let criteria = config.match_criteria();
//! ```

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ratewarden_core::config::decode_plugin_config;
use ratewarden_core::event::{LimitAction, LimitKind};
use ratewarden_core::types::{IpNet, default_ignore_cidrs};

use crate::error::NginxSourceError;
use crate::filter::MatchCriteria;
use crate::follower::FollowerConfig;

/// 라인 채널 용량 상한
const MAX_LINE_CHANNEL_CAPACITY: usize = 1_000_000;

/// nginx 레이트 리밋 소스 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NginxSourceConfig {
    /// 따라갈 nginx error log 경로
    pub error_log_file_path: PathBuf,
    /// 매칭할 리밋 유형
    pub ratelimit_type: LimitKind,
    /// 매칭할 조치
    pub ratelimit_action: LimitAction,
    /// 매칭할 zone 이름 (필수)
    pub ratelimit_zone_name: String,
    /// dry run 이벤트를 무시할지 여부
    pub ratelimit_ignore_if_dry_run: bool,
    /// 무시할 네트워크 목록
    pub ignore_cidrs: Vec<IpNet>,
    /// 중복 제거 캐시 크기 (0이면 비활성)
    pub cache_size: usize,
    /// 중복 제거 TTL (초)
    pub cache_ttl_seconds: f64,
    /// 라인 팔로워 프로그램
    pub follow_command: String,
    /// 팔로워 인자 (파일 경로가 뒤에 붙음)
    pub follow_args: Vec<String>,
    /// 재시작 백오프 초기값 (밀리초)
    pub backoff_initial_ms: u64,
    /// 재시작 백오프 최대값 (밀리초)
    pub backoff_max_ms: u64,
    /// 팔로워 → 처리 루프 라인 채널 용량
    pub line_channel_capacity: usize,
}

impl Default for NginxSourceConfig {
    fn default() -> Self {
        Self {
            error_log_file_path: PathBuf::new(),
            ratelimit_type: LimitKind::Requests,
            ratelimit_action: LimitAction::Limit,
            ratelimit_zone_name: String::new(),
            ratelimit_ignore_if_dry_run: true,
            ignore_cidrs: default_ignore_cidrs(),
            cache_size: 10_000,
            cache_ttl_seconds: 60.0,
            follow_command: "tail".to_owned(),
            follow_args: vec!["-n".to_owned(), "0".to_owned(), "-F".to_owned()],
            backoff_initial_ms: 500,
            backoff_max_ms: 30_000,
            line_channel_capacity: 1000,
        }
    }
}

impl NginxSourceConfig {
    /// 플러그인 옵션 테이블에서 설정을 만들고 검증합니다.
    pub fn from_table(table: &toml::Table, field: &str) -> Result<Self, NginxSourceError> {
        let config: Self = decode_plugin_config(table, field)
            .map_err(|e| NginxSourceError::config(field, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), NginxSourceError> {
        validate_log_path(&self.error_log_file_path)?;

        if self.ratelimit_zone_name.trim().is_empty() {
            return Err(NginxSourceError::config(
                "ratelimit_zone_name",
                "must not be empty",
            ));
        }

        if self.cache_size > 0
            && (self.cache_ttl_seconds <= 0.0
                || Duration::try_from_secs_f64(self.cache_ttl_seconds).is_err())
        {
            return Err(NginxSourceError::config(
                "cache_ttl_seconds",
                "must be a positive, representable number of seconds when cache_size > 0",
            ));
        }

        if self.follow_command.trim().is_empty() {
            return Err(NginxSourceError::config("follow_command", "must not be empty"));
        }

        if self.backoff_initial_ms == 0 {
            return Err(NginxSourceError::config(
                "backoff_initial_ms",
                "must be at least 1",
            ));
        }

        if self.backoff_initial_ms > self.backoff_max_ms {
            return Err(NginxSourceError::config(
                "backoff_max_ms",
                format!(
                    "must be >= backoff_initial_ms ({})",
                    self.backoff_initial_ms
                ),
            ));
        }

        if self.line_channel_capacity == 0
            || self.line_channel_capacity > MAX_LINE_CHANNEL_CAPACITY
        {
            return Err(NginxSourceError::config(
                "line_channel_capacity",
                format!("must be between 1 and {MAX_LINE_CHANNEL_CAPACITY}"),
            ));
        }

        Ok(())
    }

    /// 필터 조건을 만듭니다.
    pub fn match_criteria(&self) -> MatchCriteria {
        MatchCriteria {
            kind: self.ratelimit_type,
            action: self.ratelimit_action,
            zone: self.ratelimit_zone_name.clone(),
            ignore_dry_run: self.ratelimit_ignore_if_dry_run,
            ignore_cidrs: self.ignore_cidrs.clone(),
        }
    }

    /// 팔로워 설정을 만듭니다.
    pub fn follower_config(&self) -> FollowerConfig {
        FollowerConfig {
            program: self.follow_command.clone(),
            args: self.follow_args.clone(),
            path: self.error_log_file_path.clone(),
            backoff_initial: Duration::from_millis(self.backoff_initial_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }

    /// 중복 제거 TTL
    pub fn cache_ttl(&self) -> Duration {
        Duration::try_from_secs_f64(self.cache_ttl_seconds).unwrap_or(Duration::ZERO)
    }
}

/// 로그 경로를 검증합니다.
///
/// 빈 경로와 `..` 컴포넌트를 거부합니다.
fn validate_log_path(path: &Path) -> Result<(), NginxSourceError> {
    if path.as_os_str().is_empty() {
        return Err(NginxSourceError::config(
            "error_log_file_path",
            "must not be empty",
        ));
    }
    if path.components().any(|c| c == Component::ParentDir) {
        return Err(NginxSourceError::config(
            "error_log_file_path",
            format!("'{}' contains path traversal pattern '..'", path.display()),
        ));
    }
    Ok(())
}

/// 설정 빌더
///
/// 테스트와 임베딩 용도로 TOML 없이 설정을 구성합니다.
#[derive(Debug, Default)]
pub struct NginxSourceConfigBuilder {
    config: NginxSourceConfig,
}

impl NginxSourceConfigBuilder {
    /// 기본값으로 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 로그 파일 경로를 설정합니다.
    pub fn error_log_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.error_log_file_path = path.into();
        self
    }

    /// zone 이름을 설정합니다.
    pub fn zone(mut self, zone: impl Into<String>) -> Self {
        self.config.ratelimit_zone_name = zone.into();
        self
    }

    /// 리밋 유형과 조치를 설정합니다.
    pub fn kind_action(mut self, kind: LimitKind, action: LimitAction) -> Self {
        self.config.ratelimit_type = kind;
        self.config.ratelimit_action = action;
        self
    }

    /// dry run 무시 여부를 설정합니다.
    pub fn ignore_dry_run(mut self, ignore: bool) -> Self {
        self.config.ratelimit_ignore_if_dry_run = ignore;
        self
    }

    /// 무시 네트워크 목록을 설정합니다.
    pub fn ignore_cidrs(mut self, cidrs: Vec<IpNet>) -> Self {
        self.config.ignore_cidrs = cidrs;
        self
    }

    /// 중복 제거 캐시를 설정합니다.
    pub fn cache(mut self, size: usize, ttl_seconds: f64) -> Self {
        self.config.cache_size = size;
        self.config.cache_ttl_seconds = ttl_seconds;
        self
    }

    /// 팔로워 명령을 설정합니다.
    pub fn follow_command(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.config.follow_command = program.into();
        self.config.follow_args = args;
        self
    }

    /// 재시작 백오프를 설정합니다.
    pub fn backoff_ms(mut self, initial: u64, max: u64) -> Self {
        self.config.backoff_initial_ms = initial;
        self.config.backoff_max_ms = max;
        self
    }

    /// 설정을 검증하고 반환합니다.
    pub fn build(self) -> Result<NginxSourceConfig, NginxSourceError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
