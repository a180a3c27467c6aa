//! Health aggregation tests.

use ratewarden_core::pipeline::HealthStatus;
use ratewarden_core::plugin::PluginState;
use ratewarden_daemon::health::{DaemonHealth, PluginHealth, aggregate_status};

fn plugin(name: &str, status: HealthStatus) -> PluginHealth {
    PluginHealth {
        name: name.to_owned(),
        state: PluginState::Running,
        status,
    }
}

#[test]
fn all_healthy_is_healthy() {
    let plugins = vec![
        plugin("api-limit", HealthStatus::Healthy),
        plugin("api-limit/linux_ipset-0", HealthStatus::Healthy),
    ];
    assert!(aggregate_status(&plugins).is_healthy());
}

#[test]
fn empty_registry_is_healthy() {
    assert!(aggregate_status(&[]).is_healthy());
}

#[test]
fn degraded_reasons_are_prefixed_with_plugin_name() {
    let plugins = vec![
        plugin("api-limit", HealthStatus::Degraded("follower restarted".to_owned())),
        plugin("api-limit/linux_ipset-0", HealthStatus::Healthy),
    ];
    assert_eq!(
        aggregate_status(&plugins),
        HealthStatus::Degraded("api-limit: follower restarted".to_owned())
    );
}

#[test]
fn unhealthy_wins_and_hides_degraded_reasons() {
    let plugins = vec![
        plugin("a", HealthStatus::Degraded("slow".to_owned())),
        plugin("b", HealthStatus::Unhealthy("stopped".to_owned())),
        plugin("c", HealthStatus::Unhealthy("failed".to_owned())),
    ];
    assert_eq!(
        aggregate_status(&plugins),
        HealthStatus::Unhealthy("b: stopped; c: failed".to_owned())
    );
}

#[test]
fn report_serializes_to_json() {
    let plugins = vec![plugin("api-limit", HealthStatus::Healthy)];
    let health = DaemonHealth {
        status: aggregate_status(&plugins),
        uptime_secs: 42,
        plugins,
    };

    let json = serde_json::to_value(&health).unwrap();
    assert_eq!(json["uptime_secs"], 42);
    assert_eq!(json["status"], "Healthy");
    assert_eq!(json["plugins"][0]["name"], "api-limit");
    assert_eq!(json["plugins"][0]["state"], "Running");
}
