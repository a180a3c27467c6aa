//! 에러 타입 — 도메인별 에러 정의

/// Ratewarden 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum RatewardenError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 플러그인 관리 에러
    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 탐색 경로 어디에서도 설정 파일을 찾지 못함
    #[error("no config file found; tried: {}", .attempted.join("; "))]
    NoConfigFound { attempted: Vec<String> },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 이미 실행 중
    #[error("pipeline already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline not running")]
    NotRunning,
}

/// 플러그인 관리 에러
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// 같은 이름의 플러그인이 이미 등록됨
    #[error("plugin already registered: {name}")]
    AlreadyRegistered { name: String },

    /// 플러그인을 찾을 수 없음
    #[error("plugin not found: {name}")]
    NotFound { name: String },

    /// 알 수 없는 플러그인 유형
    #[error("plugin \"{type_name}\" not found")]
    UnknownType { type_name: String },

    /// 플러그인 역할 불일치 (소스 자리에 싱크 등)
    #[error("plugin \"{type_name}\" is a {actual}, expected a {expected}")]
    RoleMismatch {
        type_name: String,
        expected: String,
        actual: String,
    },

    /// 하나 이상의 플러그인 정지 실패
    #[error("failed to stop plugins: {0}")]
    StopFailed(String),
}
