//! 라인 디코더 벤치마크
//!
//! 레이트 리밋 라인과 일반 error log 라인의 디코딩 처리량을 측정합니다.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ratewarden_nginx_source::RatelimitLineDecoder;

/// limit_req 거부 라인
const LIMIT_REQ: &str = r#"2024/03/01 12:00:00 [error] 1234#1234: *5678 limiting requests, excess: 2.500 by zone "api", client: 10.0.0.5, server: example.com, request: "GET /v1/items?page=2 HTTP/1.1", host: "example.com""#;

/// limit_conn dry run 라인 (IPv6)
const LIMIT_CONN_DRY_RUN: &str = r#"2024/03/01 12:00:00 [warn] 1234#1234: *5679 limiting connections, dry run, excess: 1.000 by zone "perip", client: 2001:db8::7, server: example.com"#;

/// 레이트 리밋과 무관한 라인 (첫 단계에서 실패)
const UNRELATED: &str = r#"2024/03/01 12:00:00 [error] 1234#1234: *5680 upstream timed out (110: Connection timed out) while reading response header from upstream, client: 10.0.0.5, server: example.com"#;

fn bench_decode(c: &mut Criterion) {
    let decoder = RatelimitLineDecoder::new().unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));

    group.bench_function("limit_req", |b| {
        b.iter(|| decoder.decode(black_box(LIMIT_REQ)))
    });
    group.bench_function("limit_conn_dry_run_v6", |b| {
        b.iter(|| decoder.decode(black_box(LIMIT_CONN_DRY_RUN)))
    });
    group.bench_function("unrelated", |b| {
        b.iter(|| decoder.decode(black_box(UNRELATED)))
    });

    // 실제 error log는 레이트 리밋 라인과 잡음이 섞여 있음
    group.throughput(Throughput::Elements(1000));
    group.bench_function("mixed_1000", |b| {
        b.iter(|| {
            for i in 0..1000 {
                let line = if i % 4 == 0 { UNRELATED } else { LIMIT_REQ };
                black_box(decoder.decode(black_box(line)));
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
