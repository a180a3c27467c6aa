//! 라인 선택기 — 디코더, 필터, 중복 제거 캐시를 하나의 판단 단계로 묶습니다.
//!
//! ```text
//! raw line ─▶ decode ─▶ evaluate ─▶ dedup ─▶ Deliver
//!               │          │          │
//!               ▼          ▼          ▼
//!         Undecodable   Rejected   Suppressed
//! ```
//!
//! 주소는 디코딩 단계에서 한 번 파싱되어 필터와 전달에 그대로 재사용됩니다.

use ratewarden_core::event::RateLimitEvent;
use ratewarden_core::metrics as m;

use crate::decoder::{DecodeStage, Decoded, RatelimitLineDecoder};
use crate::dedup::DedupCache;
use crate::filter::{MatchCriteria, Rejection};

/// 한 라인에 대한 판단 결과
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// 레이트 리밋 이벤트가 아님
    Undecodable(DecodeStage),
    /// 매칭 조건 불일치
    Rejected(Rejection),
    /// TTL 안에 이미 전달된 주소
    Suppressed,
    /// 싱크로 전달할 이벤트
    Deliver(RateLimitEvent),
}

/// 소스 처리 태스크가 소유하는 선택기
#[derive(Debug)]
pub struct Selector {
    source: String,
    decoder: RatelimitLineDecoder,
    criteria: MatchCriteria,
    dedup: DedupCache,
}

impl Selector {
    /// 선택기를 생성합니다. `source`는 메트릭 레이블로 사용됩니다.
    pub fn new(
        source: impl Into<String>,
        decoder: RatelimitLineDecoder,
        criteria: MatchCriteria,
        dedup: DedupCache,
    ) -> Self {
        Self {
            source: source.into(),
            decoder,
            criteria,
            dedup,
        }
    }

    /// 한 라인을 판단하고 결과별 카운터를 갱신합니다.
    pub fn select(&mut self, line: &str) -> Selection {
        metrics::counter!(m::SOURCE_LINES_TOTAL, m::LABEL_SOURCE => self.source.clone())
            .increment(1);

        let event = match self.decoder.decode(line) {
            Decoded::Event(event) => event,
            Decoded::NotAnEvent(stage) => {
                metrics::counter!(
                    m::SOURCE_UNDECODABLE_TOTAL,
                    m::LABEL_SOURCE => self.source.clone(),
                    m::LABEL_STAGE => stage.as_str()
                )
                .increment(1);
                return Selection::Undecodable(stage);
            }
        };

        if let Err(reason) = self.criteria.evaluate(&event) {
            metrics::counter!(
                m::SOURCE_REJECTED_TOTAL,
                m::LABEL_SOURCE => self.source.clone(),
                m::LABEL_REASON => reason.as_str()
            )
            .increment(1);
            return Selection::Rejected(reason);
        }

        if !self.dedup.should_deliver(event.address) {
            metrics::counter!(m::SOURCE_SUPPRESSED_TOTAL, m::LABEL_SOURCE => self.source.clone())
                .increment(1);
            return Selection::Suppressed;
        }

        metrics::gauge!(m::SOURCE_DEDUP_ENTRIES, m::LABEL_SOURCE => self.source.clone())
            .set(self.dedup.len() as f64);
        Selection::Deliver(event)
    }

    /// 매칭 조건
    pub fn criteria(&self) -> &MatchCriteria {
        &self.criteria
    }

    /// 중복 제거 캐시에 보관 중인 주소 수
    pub fn dedup_len(&self) -> usize {
        self.dedup.len()
    }
}
