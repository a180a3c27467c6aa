//! Ratewarden 공통 크레이트
//!
//! 소스/싱크 플러그인과 데몬이 공유하는 타입, trait, 에러, 설정을 정의합니다.
//!
//! # 모듈 구성
//!
//! - [`event`]: 레이트 리밋 이벤트 모델과 채널로 전달되는 [`MatchedEvent`]
//! - [`types`]: IP 네트워크([`IpNet`])와 주소 버전([`IpVersion`])
//! - [`config`]: `ratewarden.toml` 파싱, 탐색, 환경변수 오버라이드
//! - [`plugin`]: 플러그인 생명주기 trait 및 레지스트리
//! - [`pipeline`]: 헬스 상태와 boxed future 타입
//! - [`metrics`]: 메트릭 이름 상수
//! - [`error`]: 도메인 에러 타입

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod pipeline;
pub mod plugin;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, PipelineError, PluginError, RatewardenError};

// 설정
pub use config::{PluginSpec, RatewardenConfig, SourceSpec};

// 이벤트
pub use event::{Event, EventMetadata, LimitAction, LimitKind, MatchedEvent, RateLimitEvent};

// 파이프라인 / 플러그인
pub use pipeline::{BoxFuture, HealthStatus};
pub use plugin::{
    DynPlugin, Plugin, PluginContext, PluginInfo, PluginRegistry, PluginState, PluginType,
    WorkerFailure,
};

// 도메인 타입
pub use types::{IpNet, IpVersion};
