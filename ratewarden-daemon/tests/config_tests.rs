//! Pipeline validation tests -- plugin lookup and option checks without
//! starting any worker.

use ratewarden_core::config::RatewardenConfig;
use ratewarden_daemon::orchestrator::{build_pipeline, validate_pipeline};
use ratewarden_core::plugin::{PluginContext, PluginState, PluginType};

fn parse(toml: &str) -> RatewardenConfig {
    RatewardenConfig::parse(toml).unwrap()
}

const TWO_SINKS: &str = r#"
[pipeline]
channel_capacity = 16

[[sources]]
type = "NGINX_RATELIMIT"
name = "api-limit"
[sources.config]
error_log_file_path = "/var/log/nginx/error.log"
ratelimit_zone_name = "api"

[[sources.sinks]]
type = "linux_ipset"
[sources.sinks.config]
ipset_name = "ratelimited"

[[sources.sinks]]
type = "Linux_Ipset"
name = "v6"
[sources.sinks.config]
ipset_name = "ratelimited6"
ip_version = 6

[[sources]]
type = "nginx_ratelimit"
[sources.config]
error_log_file_path = "/var/log/nginx/login.log"
ratelimit_zone_name = "login"
ratelimit_type = "CONNECTIONS"
"#;

#[test]
fn valid_graph_resolves_every_plugin() {
    let config = parse(TWO_SINKS);
    assert_eq!(validate_pipeline(&config).unwrap(), (2, 2));
}

#[test]
fn sources_are_registered_before_sinks() {
    let config = parse(TWO_SINKS);
    let (ctx, _failures) = PluginContext::new(std::time::Duration::from_millis(200));
    let registry = build_pipeline(&config, &ctx).unwrap();

    let plugins: Vec<_> = registry
        .list()
        .into_iter()
        .map(|info| (info.name.clone(), info.plugin_type))
        .collect();
    assert_eq!(
        plugins,
        [
            ("api-limit".to_owned(), PluginType::Source),
            ("nginx_ratelimit-1".to_owned(), PluginType::Source),
            ("api-limit/linux_ipset-0".to_owned(), PluginType::Sink),
            ("api-limit/v6".to_owned(), PluginType::Sink),
        ]
    );
    for info in registry.list() {
        assert_eq!(registry.get(&info.name).unwrap().state(), PluginState::Created);
    }
}

#[test]
fn unknown_source_type_is_rejected() {
    let config = parse(
        r#"
[[sources]]
type = "apache_ratelimit"
"#,
    );
    let err = validate_pipeline(&config).unwrap_err().to_string();
    assert!(err.contains("sources[0]"), "got: {err}");
    assert!(err.contains("apache_ratelimit"), "got: {err}");
}

#[test]
fn sink_in_source_position_is_role_mismatch() {
    let config = parse(
        r#"
[[sources]]
type = "linux_ipset"
[sources.config]
ipset_name = "ratelimited"
"#,
    );
    let err = validate_pipeline(&config).unwrap_err().to_string();
    assert!(err.contains("expected a source"), "got: {err}");
}

#[test]
fn unknown_sink_type_is_rejected() {
    let config = parse(
        r#"
[[sources]]
type = "nginx_ratelimit"
[sources.config]
error_log_file_path = "/var/log/nginx/error.log"
ratelimit_zone_name = "api"

[[sources.sinks]]
type = "nftables"
"#,
    );
    let err = validate_pipeline(&config).unwrap_err().to_string();
    assert!(err.contains("sources[0].sinks[0]"), "got: {err}");
}

#[test]
fn invalid_plugin_options_are_rejected() {
    // zone 누락
    let config = parse(
        r#"
[[sources]]
type = "nginx_ratelimit"
[sources.config]
error_log_file_path = "/var/log/nginx/error.log"
"#,
    );
    assert!(validate_pipeline(&config).is_err());

    // 알 수 없는 싱크 옵션
    let config = parse(
        r#"
[[sources]]
type = "nginx_ratelimit"
[sources.config]
error_log_file_path = "/var/log/nginx/error.log"
ratelimit_zone_name = "api"

[[sources.sinks]]
type = "linux_ipset"
[sources.sinks.config]
ipset_name = "ratelimited"
ipset_timeout = 5
"#,
    );
    let err = validate_pipeline(&config).unwrap_err().to_string();
    assert!(err.contains("ipset_timeout"), "got: {err}");
}

#[test]
fn duplicate_instance_names_are_rejected() {
    let config = parse(
        r#"
[[sources]]
type = "nginx_ratelimit"
name = "api"
[sources.config]
error_log_file_path = "/var/log/nginx/a.log"
ratelimit_zone_name = "api"

[[sources]]
type = "nginx_ratelimit"
name = "api"
[sources.config]
error_log_file_path = "/var/log/nginx/b.log"
ratelimit_zone_name = "api"
"#,
    );
    let err = validate_pipeline(&config).unwrap_err().to_string();
    assert!(err.contains("already registered"), "got: {err}");
}

#[test]
fn empty_sources_fail_global_validation() {
    let config = parse("[general]\nlog_level = \"info\"\n");
    assert!(validate_pipeline(&config).is_err());
}
