//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 크레이트는 이 상수로 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `ratewarden_`
//! - 모듈명: `source_`, `sink_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(ratewarden_core::metrics::SOURCE_LINES_TOTAL, "source" => name).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 소스 인스턴스 레이블 키
pub const LABEL_SOURCE: &str = "source";

/// 싱크 인스턴스 레이블 키
pub const LABEL_SINK: &str = "sink";

/// 디코딩 실패 단계 레이블 키 (kind_action, excess, zone, address)
pub const LABEL_STAGE: &str = "stage";

/// 거부/무시 사유 레이블 키
pub const LABEL_REASON: &str = "reason";

// ─── Source 메트릭 ─────────────────────────────────────────────────

/// Source: 팔로워가 읽은 전체 라인 수 (counter)
pub const SOURCE_LINES_TOTAL: &str = "ratewarden_source_lines_total";

/// Source: 이벤트가 아닌 라인 수 (counter, label: stage)
pub const SOURCE_UNDECODABLE_TOTAL: &str = "ratewarden_source_undecodable_total";

/// Source: 필터에서 거부된 이벤트 수 (counter, label: reason)
pub const SOURCE_REJECTED_TOTAL: &str = "ratewarden_source_rejected_total";

/// Source: 중복 제거로 억제된 이벤트 수 (counter)
pub const SOURCE_SUPPRESSED_TOTAL: &str = "ratewarden_source_suppressed_total";

/// Source: 싱크로 전달된 이벤트 수 (counter)
pub const SOURCE_DELIVERED_TOTAL: &str = "ratewarden_source_delivered_total";

/// Source: 팔로워 재시작 횟수 (counter)
pub const SOURCE_FOLLOWER_RESTARTS_TOTAL: &str = "ratewarden_source_follower_restarts_total";

/// Source: 중복 제거 캐시 엔트리 수 (gauge)
pub const SOURCE_DEDUP_ENTRIES: &str = "ratewarden_source_dedup_entries";

// ─── Sink 메트릭 ───────────────────────────────────────────────────

/// Sink: ipset에 추가된 엔트리 수 (counter)
pub const SINK_ENTRIES_ADDED_TOTAL: &str = "ratewarden_sink_entries_added_total";

/// Sink: 무시된 이벤트 수 (counter, label: reason)
pub const SINK_IGNORED_TOTAL: &str = "ratewarden_sink_ignored_total";

/// Sink: dry run으로 실행하지 않은 명령 수 (counter)
pub const SINK_DRY_RUN_TOTAL: &str = "ratewarden_sink_dry_run_total";

/// Sink: 실패한 명령 수 (counter)
pub const SINK_COMMAND_FAILURES_TOTAL: &str = "ratewarden_sink_command_failures_total";

/// Sink: 명령 실행 시간 (histogram, 초)
pub const SINK_COMMAND_DURATION_SECONDS: &str = "ratewarden_sink_command_duration_seconds";

// ─── Daemon 메트릭 ─────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "ratewarden_daemon_uptime_seconds";

/// Daemon: 등록된 플러그인 수 (gauge)
pub const DAEMON_PLUGINS_REGISTERED: &str = "ratewarden_daemon_plugins_registered";

/// Daemon: 빌드 정보 (gauge, 항상 1)
pub const DAEMON_BUILD_INFO: &str = "ratewarden_daemon_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 외부 명령 실행 시간 히스토그램 버킷 (초)
///
/// 1ms ~ 2s 범위 (기본 명령 타임아웃이 2초)
pub const COMMAND_DURATION_BUCKETS: [f64; 9] =
    [0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 2.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명을 등록합니다.
///
/// 전역 레코더 설치 후 데몬 시작 시점에 한 번 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Source
    describe_counter!(
        SOURCE_LINES_TOTAL,
        "Total number of lines read from followed error logs"
    );
    describe_counter!(
        SOURCE_UNDECODABLE_TOTAL,
        "Lines that are not rate-limit events, by failed decode stage"
    );
    describe_counter!(
        SOURCE_REJECTED_TOTAL,
        "Decoded events rejected by match criteria, by reason"
    );
    describe_counter!(
        SOURCE_SUPPRESSED_TOTAL,
        "Matched events suppressed by the dedup window"
    );
    describe_counter!(
        SOURCE_DELIVERED_TOTAL,
        "Matched events delivered to sink channels"
    );
    describe_counter!(
        SOURCE_FOLLOWER_RESTARTS_TOTAL,
        "Number of unexpected follower process exits followed by a restart"
    );
    describe_gauge!(
        SOURCE_DEDUP_ENTRIES,
        "Number of addresses currently held in the dedup cache"
    );

    // Sink
    describe_counter!(
        SINK_ENTRIES_ADDED_TOTAL,
        "Number of addresses added to ipsets"
    );
    describe_counter!(
        SINK_IGNORED_TOTAL,
        "Events ignored by a sink, by reason"
    );
    describe_counter!(
        SINK_DRY_RUN_TOTAL,
        "Commands built but not executed because of dry run"
    );
    describe_counter!(
        SINK_COMMAND_FAILURES_TOTAL,
        "ipset invocations that exited non-zero or timed out"
    );
    describe_histogram!(
        SINK_COMMAND_DURATION_SECONDS,
        "ipset invocation latency in seconds"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Ratewarden daemon uptime in seconds");
    describe_gauge!(
        DAEMON_PLUGINS_REGISTERED,
        "Number of sources and sinks registered in the daemon"
    );
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}
