//! Aggregated health reporting.
//!
//! The orchestrator polls every plugin's `health_check()` and folds the
//! results into one [`DaemonHealth`]. The overall status is the worst
//! status among all plugins.
//!
//! # Aggregation Rule
//!
//! - All Healthy -> Healthy
//! - Any Degraded, none Unhealthy -> Degraded(reason)
//! - Any Unhealthy -> Unhealthy(reason)

use serde::Serialize;

use ratewarden_core::pipeline::HealthStatus;
use ratewarden_core::plugin::PluginState;

/// Aggregated health report for the entire daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Overall daemon health status (worst of all plugins).
    pub status: HealthStatus,
    /// Daemon uptime in seconds since start.
    pub uptime_secs: u64,
    /// Per-plugin health reports, in registration order.
    pub plugins: Vec<PluginHealth>,
}

/// Health status for a single plugin instance.
#[derive(Debug, Clone, Serialize)]
pub struct PluginHealth {
    /// Instance name (e.g., "api-limit", "api-limit/linux_ipset-0").
    pub name: String,
    /// Lifecycle state.
    pub state: PluginState,
    /// Current health status.
    pub status: HealthStatus,
}

/// Aggregate plugin health statuses into a single status.
///
/// Returns the worst status found: Unhealthy > Degraded > Healthy.
/// Reasons of the winning severity are joined with `"; "`.
pub fn aggregate_status(plugins: &[PluginHealth]) -> HealthStatus {
    let mut degraded = Vec::new();
    let mut unhealthy = Vec::new();

    for plugin in plugins {
        match &plugin.status {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded(reason) => degraded.push(format!("{}: {reason}", plugin.name)),
            HealthStatus::Unhealthy(reason) => {
                unhealthy.push(format!("{}: {reason}", plugin.name))
            }
        }
    }

    if !unhealthy.is_empty() {
        HealthStatus::Unhealthy(unhealthy.join("; "))
    } else if !degraded.is_empty() {
        HealthStatus::Degraded(degraded.join("; "))
    } else {
        HealthStatus::Healthy
    }
}

/// Log an aggregated report at a level matching its severity.
pub fn log_health(health: &DaemonHealth) {
    match &health.status {
        HealthStatus::Healthy => tracing::info!(
            uptime_secs = health.uptime_secs,
            plugins = health.plugins.len(),
            "daemon healthy"
        ),
        HealthStatus::Degraded(reason) => tracing::warn!(
            uptime_secs = health.uptime_secs,
            reason = %reason,
            "daemon degraded"
        ),
        HealthStatus::Unhealthy(reason) => tracing::error!(
            uptime_secs = health.uptime_secs,
            reason = %reason,
            "daemon unhealthy"
        ),
    }
}
