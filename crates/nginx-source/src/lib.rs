//! Ratewarden nginx 레이트 리밋 소스
//!
//! nginx error log를 외부 팔로워 프로세스로 따라가며 `limit_req`/`limit_conn`
//! 라인을 디코딩하고, 매칭 조건과 중복 제거를 통과한 이벤트를 싱크 채널로 보냅니다.
//!
//! # 모듈 구성
//!
//! - [`follower`]: 외부 팔로워 프로세스 감독 (재시작, 지수 백오프, SIGINT 정지)
//! - [`decoder`]: 로그 라인 → [`RateLimitEvent`](ratewarden_core::RateLimitEvent) 디코딩
//! - [`filter`]: 유형/조치/zone/dry run/무시 대역 매칭 조건
//! - [`dedup`]: TTL 기반 주소 중복 제거 캐시
//! - [`selector`]: 디코딩 → 필터 → 중복 제거 판단 단계
//! - [`source`]: `NGINX_RATELIMIT` 플러그인 (Plugin trait 구현)
//! - [`config`]: 소스 설정
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! tail -n 0 -F ──▶ LineFollower ──▶ Selector ──▶ sink 채널
//!                   stdout/stderr    decode → filter → dedup
//! ```

pub mod config;
pub mod decoder;
pub mod dedup;
pub mod error;
pub mod filter;
pub mod follower;
pub mod selector;
pub mod source;

// --- 주요 타입 re-export ---

// 소스
pub use source::{NginxRatelimitSource, NginxRatelimitSourceBuilder};

// 설정
pub use config::{NginxSourceConfig, NginxSourceConfigBuilder};

// 에러
pub use error::NginxSourceError;

// 구성 요소
pub use decoder::{DecodeStage, Decoded, RatelimitLineDecoder};
pub use dedup::DedupCache;
pub use filter::{MatchCriteria, Rejection};
pub use follower::{Backoff, FollowerConfig, FollowerStats, LineFollower};
pub use selector::{Selection, Selector};
