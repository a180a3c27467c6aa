//! Ratewarden Linux ipset 싱크
//!
//! 소스가 보낸 [`MatchedEvent`](ratewarden_core::MatchedEvent)의 주소를
//! `ipset -exist add`로 커널 집합에 추가합니다.
//!
//! # 모듈 구성
//!
//! - [`sink`]: `LINUX_IPSET` 플러그인 (Plugin trait 구현, 이벤트별 처리)
//! - [`ipset`]: 명령 구성, 코멘트 렌더링, `list -terse` 파싱
//! - [`executor`]: 외부 명령 실행 추상화
//! - [`config`]: 싱크 설정
//! - [`error`]: 도메인 에러 타입

pub mod config;
pub mod error;
pub mod executor;
pub mod ipset;
pub mod sink;

pub use config::LinuxIpsetSinkConfig;
pub use error::IpsetSinkError;
pub use executor::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use ipset::{SetHeader, SetInfo};
pub use sink::{
    IgnoreReason, LinuxIpsetSink, LinuxIpsetSinkBuilder, Outcome, SinkStats, SinkWorker,
    detect_set_version,
};
