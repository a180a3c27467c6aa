//! 이벤트 필터 — 디코딩된 이벤트가 소스의 매칭 조건에 맞는지 판단합니다.
//!
//! 값 비교(유형, 조치, zone, dry run)를 먼저 수행하고, 마지막에 무시 대역과의
//! 겹침을 확인합니다. 주소는 디코더에서 이미 파싱되어 있습니다.

use std::fmt;

use ratewarden_core::event::{LimitAction, LimitKind, RateLimitEvent};
use ratewarden_core::types::{IpNet, find_overlapping};

/// 소스별 매칭 조건
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCriteria {
    /// 원하는 리밋 유형
    pub kind: LimitKind,
    /// 원하는 조치
    pub action: LimitAction,
    /// 정확히 일치해야 하는 zone 이름
    pub zone: String,
    /// dry run 이벤트 무시 여부
    pub ignore_dry_run: bool,
    /// 무시할 네트워크 목록
    pub ignore_cidrs: Vec<IpNet>,
}

/// 이벤트가 거부된 사유
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// 유형 불일치
    Kind,
    /// 조치 불일치
    Action,
    /// zone 불일치
    Zone,
    /// dry run 이벤트
    DryRun,
    /// 무시 대역과 겹침
    IgnoredCidr(IpNet),
}

impl Rejection {
    /// 메트릭 레이블용 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kind => "kind",
            Self::Action => "action",
            Self::Zone => "zone",
            Self::DryRun => "dry_run",
            Self::IgnoredCidr(_) => "ignored_cidr",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IgnoredCidr(net) => write!(f, "ignored_cidr({net})"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl MatchCriteria {
    /// 이벤트를 평가하고, 거부되면 첫 번째 실패 사유를 반환합니다.
    pub fn evaluate(&self, event: &RateLimitEvent) -> Result<(), Rejection> {
        if event.kind != self.kind {
            return Err(Rejection::Kind);
        }
        if event.action != self.action {
            return Err(Rejection::Action);
        }
        if event.zone != self.zone {
            return Err(Rejection::Zone);
        }
        if event.dry_run && self.ignore_dry_run {
            return Err(Rejection::DryRun);
        }
        if let Some(cidr) = find_overlapping(&event.address, &self.ignore_cidrs) {
            return Err(Rejection::IgnoredCidr(*cidr));
        }
        Ok(())
    }

    /// 이벤트가 모든 조건을 만족하는지 확인합니다.
    pub fn matches(&self, event: &RateLimitEvent) -> bool {
        self.evaluate(event).is_ok()
    }
}
