//! 이벤트 시스템 — 소스와 싱크 사이를 흐르는 데이터
//!
//! [`RateLimitEvent`]는 로그 한 줄을 디코딩한 불변 값이고,
//! [`MatchedEvent`]는 필터와 중복 제거를 통과한 이벤트에 추적 정보를 붙여
//! 소스 → 싱크 채널로 전달되는 단위입니다.

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::types::IpNet;

// --- 모듈명 상수 ---

/// nginx 레이트 리밋 소스 모듈명
pub const MODULE_NGINX_SOURCE: &str = "nginx-ratelimit";
/// ipset 싱크 모듈명
pub const MODULE_IPSET_SINK: &str = "linux-ipset";

// --- 이벤트 타입 상수 ---

/// 레이트 리밋 이벤트 타입
pub const EVENT_TYPE_RATELIMIT: &str = "ratelimit";

/// 레이트 리밋을 보고한 nginx 서브시스템
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LimitKind {
    /// `limit_req` 모듈
    #[serde(alias = "requests")]
    Requests,
    /// `limit_conn` 모듈
    #[serde(alias = "connections")]
    Connections,
}

impl LimitKind {
    /// 로그 라인의 토큰(`requests`, `connections`)에서 변환합니다.
    pub fn from_log_token(token: &str) -> Option<Self> {
        match token {
            "requests" => Some(Self::Requests),
            "connections" => Some(Self::Connections),
            _ => None,
        }
    }

    /// 설정/레이블용 대문자 이름
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requests => "REQUESTS",
            Self::Connections => "CONNECTIONS",
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "REQUESTS" => Ok(Self::Requests),
            "CONNECTIONS" => Ok(Self::Connections),
            _ => Err(format!("unknown ratelimit type '{s}'")),
        }
    }
}

/// 요청에 적용된 조치
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LimitAction {
    /// 거부 (`limiting`)
    #[serde(alias = "limit")]
    Limit,
    /// 지연 (`delaying`)
    #[serde(alias = "delay")]
    Delay,
}

impl LimitAction {
    /// 로그 라인의 토큰(`limiting`, `delaying`)에서 변환합니다.
    pub fn from_log_token(token: &str) -> Option<Self> {
        match token {
            "limiting" => Some(Self::Limit),
            "delaying" => Some(Self::Delay),
            _ => None,
        }
    }

    /// 설정/레이블용 대문자 이름
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Limit => "LIMIT",
            Self::Delay => "DELAY",
        }
    }
}

impl fmt::Display for LimitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LIMIT" => Ok(Self::Limit),
            "DELAY" => Ok(Self::Delay),
            _ => Err(format!("unknown ratelimit action '{s}'")),
        }
    }
}

/// 로그 한 줄에서 디코딩된 레이트 리밋 이벤트
///
/// 필수 필드(kind/action, excess, zone, address)가 모두 있을 때만 생성됩니다.
/// 동일한 입력에서 디코딩하면 항상 같은 값이 나오도록 식별자나 시각은 담지 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitEvent {
    /// 보고한 서브시스템
    pub kind: LimitKind,
    /// 적용된 조치
    pub action: LimitAction,
    /// 리밋 zone 이름
    pub zone: String,
    /// 초과 비율 (정보용)
    pub excess: f64,
    /// dry run 모드에서 기록된 이벤트인지 여부
    pub dry_run: bool,
    /// 클라이언트 주소
    pub address: IpNet,
}

impl fmt::Display for RateLimitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} zone={} excess={:.3} client={}{}",
            self.action,
            self.kind,
            self.zone,
            self.excess,
            self.address,
            if self.dry_run { " (dry run)" } else { "" },
        )
    }
}

/// 이벤트 메타데이터 — 소스와 싱크의 로그를 연결하는 추적 정보
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// 이벤트 발생 시각
    pub timestamp: SystemTime,
    /// 이벤트를 생성한 모듈명
    pub source_module: String,
    /// 추적 ID
    pub trace_id: String,
}

impl EventMetadata {
    /// 기존 trace_id를 사용하여 새 메타데이터를 생성합니다.
    pub fn new(source_module: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            source_module: source_module.into(),
            trace_id: trace_id.into(),
        }
    }

    /// 새로운 UUID v4 trace_id로 메타데이터를 만듭니다.
    pub fn with_new_trace(source_module: impl Into<String>) -> Self {
        Self::new(source_module, uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for EventMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self
            .timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs().to_string())
            .unwrap_or_else(|_| "unknown".to_owned());
        write!(
            f,
            "[{secs}] source={} trace={}",
            self.source_module, self.trace_id
        )
    }
}

/// 채널로 전달되는 모든 이벤트가 구현하는 trait
///
/// `Send + Sync + 'static` 바운드로 `tokio::mpsc` 채널 전송을 보장합니다.
pub trait Event: Send + Sync + 'static {
    /// 이벤트 고유 ID (UUID v4)
    fn event_id(&self) -> &str;

    /// 이벤트 메타데이터
    fn metadata(&self) -> &EventMetadata;

    /// 이벤트 타입명 (로깅에 사용)
    fn event_type(&self) -> &str;
}

/// 필터와 중복 제거를 통과하여 싱크로 전달되는 이벤트
///
/// 하나의 소스가 여러 싱크로 팬아웃할 때 같은 `id`의 복제본이 각 채널로 전달됩니다.
#[derive(Debug, Clone)]
pub struct MatchedEvent {
    /// 이벤트 고유 ID
    pub id: String,
    /// 이벤트 메타데이터
    pub metadata: EventMetadata,
    /// 디코딩된 이벤트
    pub event: RateLimitEvent,
}

impl MatchedEvent {
    /// 새 trace로 매칭 이벤트를 생성합니다.
    pub fn new(source_module: impl Into<String>, event: RateLimitEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::with_new_trace(source_module),
            event,
        }
    }
}

impl Event for MatchedEvent {
    fn event_id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn event_type(&self) -> &str {
        EVENT_TYPE_RATELIMIT
    }
}

impl fmt::Display for MatchedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MatchedEvent[{}] {}",
            &self.id[..8.min(self.id.len())],
            self.event
        )
    }
}
