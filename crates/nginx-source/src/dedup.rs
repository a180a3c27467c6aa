//! 주소 기반 중복 제거 캐시
//!
//! 같은 주소에 대한 이벤트를 TTL 동안 한 번만 전달합니다.
//! 용량이 가득 차면 TTL과 무관하게 가장 먼저 삽입된 주소를 내보내므로,
//! 부하가 높을 때는 실제 억제 구간이 TTL보다 짧아질 수 있습니다.
//!
//! 캐시는 소스의 처리 태스크 하나만 소유하므로 동기화가 필요 없습니다.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use ratewarden_core::types::IpNet;

/// 시간 윈도우 기반 중복 제거 캐시
#[derive(Debug)]
pub struct DedupCache {
    capacity: usize,
    ttl: Duration,
    /// 주소 → 마지막 전달 시각
    entries: HashMap<IpNet, Instant>,
    /// 삽입 순서 (재삽입 시 이전 레코드는 시각 불일치로 무시)
    order: VecDeque<(IpNet, Instant)>,
}

impl DedupCache {
    /// 캐시를 생성합니다. 용량 0은 중복 제거 비활성을 뜻합니다.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: HashMap::with_capacity(capacity.min(4096)),
            order: VecDeque::new(),
        }
    }

    /// 주소를 전달해야 하는지 판단하고, 전달한다면 현재 시각으로 기록합니다.
    pub fn should_deliver(&mut self, address: IpNet) -> bool {
        self.should_deliver_at(address, Instant::now())
    }

    /// [`should_deliver`](Self::should_deliver)의 시각 지정 버전
    pub fn should_deliver_at(&mut self, address: IpNet, now: Instant) -> bool {
        if self.capacity == 0 {
            return true;
        }

        let suppressed = self
            .entries
            .get(&address)
            .is_some_and(|seen| now.saturating_duration_since(*seen) < self.ttl);
        if suppressed {
            return false;
        }

        self.purge_expired(now);
        if !self.entries.contains_key(&address) {
            while self.entries.len() >= self.capacity {
                if !self.evict_oldest() {
                    break;
                }
            }
        }

        self.entries.insert(address, now);
        self.order.push_back((address, now));
        true
    }

    /// 현재 보관 중인 주소 수
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 설정된 용량
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 설정된 TTL
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn purge_expired(&mut self, now: Instant) {
        while let Some(&(address, inserted)) = self.order.front() {
            if now.saturating_duration_since(inserted) < self.ttl {
                break;
            }
            self.order.pop_front();
            if self.entries.get(&address) == Some(&inserted) {
                self.entries.remove(&address);
            }
        }
    }

    fn evict_oldest(&mut self) -> bool {
        while let Some((address, inserted)) = self.order.pop_front() {
            if self.entries.get(&address) == Some(&inserted) {
                self.entries.remove(&address);
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    #[test]
    fn repeat_within_ttl_is_suppressed() {
        let mut cache = DedupCache::new(10, Duration::from_secs(60));
        let t0 = Instant::now();

        assert!(cache.should_deliver_at(addr("10.0.0.5"), t0));
        assert!(!cache.should_deliver_at(addr("10.0.0.5"), t0 + Duration::from_secs(59)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn repeat_after_ttl_is_delivered_and_resets_timer() {
        let mut cache = DedupCache::new(10, Duration::from_secs(60));
        let t0 = Instant::now();

        assert!(cache.should_deliver_at(addr("10.0.0.5"), t0));
        let t1 = t0 + Duration::from_secs(60);
        assert!(cache.should_deliver_at(addr("10.0.0.5"), t1));
        assert!(!cache.should_deliver_at(addr("10.0.0.5"), t1 + Duration::from_secs(30)));
        assert!(cache.should_deliver_at(addr("10.0.0.5"), t1 + Duration::from_secs(61)));
    }

    #[test]
    fn capacity_evicts_earliest_inserted() {
        let mut cache = DedupCache::new(3, Duration::from_secs(60));
        let t0 = Instant::now();

        for (i, a) in ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"].iter().enumerate() {
            assert!(cache.should_deliver_at(addr(a), t0 + Duration::from_millis(i as u64)));
        }
        assert_eq!(cache.len(), 3);

        let later = t0 + Duration::from_secs(1);
        // 가장 먼저 들어간 주소는 밀려났으므로 다시 전달됨
        assert!(cache.should_deliver_at(addr("10.0.0.1"), later));
        // 나머지는 여전히 억제
        assert!(!cache.should_deliver_at(addr("10.0.0.3"), later));
        assert!(!cache.should_deliver_at(addr("10.0.0.4"), later));
    }

    #[test]
    fn reinserted_address_is_not_evicted_by_stale_record() {
        let mut cache = DedupCache::new(2, Duration::from_secs(10));
        let t0 = Instant::now();

        assert!(cache.should_deliver_at(addr("10.0.0.1"), t0));
        assert!(cache.should_deliver_at(addr("10.0.0.2"), t0 + Duration::from_secs(5)));
        // 10.0.0.1 만료 후 재삽입 (purge가 이전 레코드를 제거)
        assert!(cache.should_deliver_at(addr("10.0.0.1"), t0 + Duration::from_secs(11)));
        // 새 주소 삽입 → 가장 오래된 살아있는 항목(10.0.0.2) 제거
        assert!(cache.should_deliver_at(addr("10.0.0.3"), t0 + Duration::from_secs(12)));
        assert!(!cache.should_deliver_at(addr("10.0.0.1"), t0 + Duration::from_secs(13)));
        assert!(cache.should_deliver_at(addr("10.0.0.2"), t0 + Duration::from_secs(13)));
    }

    #[test]
    fn expired_entries_are_purged_on_insert() {
        let mut cache = DedupCache::new(100, Duration::from_secs(1));
        let t0 = Instant::now();
        for i in 0..10 {
            assert!(cache.should_deliver_at(addr(&format!("10.0.1.{i}")), t0));
        }
        assert!(cache.should_deliver_at(addr("10.0.2.1"), t0 + Duration::from_secs(2)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn zero_capacity_disables_dedup() {
        let mut cache = DedupCache::new(0, Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(cache.should_deliver_at(addr("10.0.0.5"), t0));
        assert!(cache.should_deliver_at(addr("10.0.0.5"), t0));
        assert!(cache.is_empty());
    }

    #[test]
    fn wall_clock_api_suppresses_immediate_repeat() {
        let mut cache = DedupCache::new(10, Duration::from_secs(60));
        assert!(cache.should_deliver(addr("192.0.2.1")));
        assert!(!cache.should_deliver(addr("192.0.2.1")));
        assert_eq!(cache.capacity(), 10);
        assert_eq!(cache.ttl(), Duration::from_secs(60));
    }
}
