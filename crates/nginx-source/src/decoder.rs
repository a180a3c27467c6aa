//! nginx 레이트 리밋 라인 디코더
//!
//! `ngx_http_limit_req_module` / `ngx_http_limit_conn_module`이 error log에 남기는
//! 라인을 [`RateLimitEvent`]로 변환합니다.
//!
//! 필드마다 독립된 정규식을 순서대로 적용합니다:
//! 1. `limiting|delaying requests|connections`
//! 2. `excess: <decimal>`
//! 3. `zone "<name>"`
//! 4. `client: <address>,`
//!
//! 어느 단계든 실패하면 [`Decoded::NotAnEvent`]에 실패 단계를 담아 반환합니다.
//! `dry run` 표시는 선택 사항이며 없으면 `false`입니다 (nginx 1.17.1 이상).
//!
//! # 예시 라인
//! ```text
//! 2024/01/01 00:00:00 [error] 1#1: *1 limiting requests, excess: 2.500 by zone "api",
//!     client: 10.0.0.5, server: example.com, request: "GET / HTTP/1.1"
//! ```

use std::fmt;

use regex::Regex;

use ratewarden_core::event::{LimitAction, LimitKind, RateLimitEvent};
use ratewarden_core::types::IpNet;

use crate::error::NginxSourceError;

/// 디코딩 실패 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeStage {
    /// 조치/유형 토큰이 없음
    KindAction,
    /// excess 값이 없거나 숫자가 아님
    Excess,
    /// zone 이름이 없음
    Zone,
    /// 클라이언트 주소가 없거나 IP가 아님
    Address,
}

impl DecodeStage {
    /// 메트릭 레이블용 이름
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KindAction => "kind_action",
            Self::Excess => "excess",
            Self::Zone => "zone",
            Self::Address => "address",
        }
    }
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 디코딩 결과
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// 모든 필수 필드가 채워진 이벤트
    Event(RateLimitEvent),
    /// 레이트 리밋 이벤트가 아님 (실패 단계 포함)
    NotAnEvent(DecodeStage),
}

/// 레이트 리밋 라인 디코더
///
/// 정규식은 생성 시 한 번만 컴파일됩니다. 상태가 없으므로 같은 입력에 대해
/// 항상 같은 결과를 반환합니다.
#[derive(Debug, Clone)]
pub struct RatelimitLineDecoder {
    kind_action: Regex,
    excess: Regex,
    zone: Regex,
    dry_run: Regex,
    client: Regex,
}

impl RatelimitLineDecoder {
    /// 디코더를 생성합니다.
    pub fn new() -> Result<Self, NginxSourceError> {
        Ok(Self {
            kind_action: Regex::new(r"\b(limiting|delaying) (requests|connections)\b")?,
            excess: Regex::new(r"\bexcess: ([\d.]+)")?,
            zone: Regex::new(r#"\bzone "([^"]+)""#)?,
            dry_run: Regex::new(r"\bdry run\b")?,
            client: Regex::new(r"\bclient: ([^,]+),")?,
        })
    }

    /// 한 줄을 디코딩합니다.
    ///
    /// 줄 끝의 개행 문자는 무시됩니다.
    pub fn decode(&self, line: &str) -> Decoded {
        let line = line.trim_end_matches(['\r', '\n']);

        let Some((kind, action)) = self.capture_kind_action(line) else {
            return Decoded::NotAnEvent(DecodeStage::KindAction);
        };

        let Some(excess) = self
            .capture(&self.excess, line)
            .and_then(|s| s.parse::<f64>().ok())
        else {
            return Decoded::NotAnEvent(DecodeStage::Excess);
        };

        let Some(zone) = self.capture(&self.zone, line) else {
            return Decoded::NotAnEvent(DecodeStage::Zone);
        };

        let dry_run = self.dry_run.is_match(line);

        let Some(address) = self
            .capture(&self.client, line)
            .and_then(|s| s.trim().parse::<IpNet>().ok())
        else {
            return Decoded::NotAnEvent(DecodeStage::Address);
        };

        Decoded::Event(RateLimitEvent {
            kind,
            action,
            zone: zone.to_owned(),
            excess,
            dry_run,
            address,
        })
    }

    fn capture_kind_action(&self, line: &str) -> Option<(LimitKind, LimitAction)> {
        let caps = self.kind_action.captures(line)?;
        let action = LimitAction::from_log_token(caps.get(1)?.as_str())?;
        let kind = LimitKind::from_log_token(caps.get(2)?.as_str())?;
        Some((kind, action))
    }

    fn capture<'l>(&self, re: &Regex, line: &'l str) -> Option<&'l str> {
        re.captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}
