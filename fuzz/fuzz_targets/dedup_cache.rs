#![no_main]

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use ratewarden_core::types::IpNet;
use ratewarden_nginx_source::DedupCache;

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    /// 캐시 용량 (작게 제한)
    capacity: u8,
    /// TTL (밀리초)
    ttl_ms: u16,
    /// (마지막 옥텟, 이전 호출로부터 경과 밀리초)
    ops: Vec<(u8, u16)>,
}

fuzz_target!(|input: FuzzInput| {
    let capacity = usize::from(input.capacity % 16);
    let ttl = Duration::from_millis(u64::from(input.ttl_ms));
    let mut cache = DedupCache::new(capacity, ttl);

    let start = Instant::now();
    let mut now = start;
    for (octet, advance_ms) in input.ops.into_iter().take(256) {
        now += Duration::from_millis(u64::from(advance_ms));
        let address = IpNet::host(IpAddr::V4(Ipv4Addr::new(10, 0, 0, octet)));

        let delivered = cache.should_deliver_at(address, now);
        if capacity == 0 || ttl.is_zero() {
            assert!(delivered);
        }
        // 방금 전달된 주소는 TTL 안에서 바로 억제됨
        if delivered && capacity > 0 && !ttl.is_zero() {
            assert!(!cache.should_deliver_at(address, now));
        }
        assert!(cache.len() <= capacity);
    }
});
