//! Compiled-in plugin lookup table.
//!
//! Maps a configuration type name to a source or sink factory. The table is
//! fixed at build time; lookup is case-insensitive.
//!
//! | Type name         | Role   | Implementation                               |
//! |-------------------|--------|----------------------------------------------|
//! | `NGINX_RATELIMIT` | source | `ratewarden_nginx_source::NginxRatelimitSource` |
//! | `LINUX_IPSET`     | sink   | `ratewarden_ipset_sink::LinuxIpsetSink`      |

use tokio::sync::mpsc;

use ratewarden_core::error::{PluginError, RatewardenError};
use ratewarden_core::event::MatchedEvent;
use ratewarden_core::plugin::{DynPlugin, PluginContext, PluginType};
use ratewarden_ipset_sink::{LinuxIpsetSinkBuilder, LinuxIpsetSinkConfig, SystemCommandRunner};
use ratewarden_nginx_source::{NginxRatelimitSourceBuilder, NginxSourceConfig};

/// Arguments handed to a source factory.
pub struct SourceArgs<'a> {
    /// Instance name.
    pub name: String,
    /// Raw `config` table from the source entry.
    pub config: &'a toml::Table,
    /// Config location used in error messages (e.g. `sources[0].config`).
    pub field: String,
    /// One sender per downstream sink.
    pub outputs: Vec<mpsc::Sender<MatchedEvent>>,
    /// Shared execution context.
    pub ctx: PluginContext,
}

/// Arguments handed to a sink factory.
pub struct SinkArgs<'a> {
    /// Instance name.
    pub name: String,
    /// Raw `config` table from the sink entry.
    pub config: &'a toml::Table,
    /// Config location used in error messages.
    pub field: String,
    /// Receiving end of the source→sink channel.
    pub input: mpsc::Receiver<MatchedEvent>,
    /// Shared execution context.
    pub ctx: PluginContext,
}

/// Builds a source plugin.
pub type SourceFactory = fn(SourceArgs<'_>) -> Result<Box<dyn DynPlugin>, RatewardenError>;

/// Builds a sink plugin.
pub type SinkFactory = fn(SinkArgs<'_>) -> Result<Box<dyn DynPlugin>, RatewardenError>;

/// Factory for one plugin type.
#[derive(Clone, Copy)]
pub enum Factory {
    Source(SourceFactory),
    Sink(SinkFactory),
}

impl Factory {
    /// Role this factory produces.
    pub fn role(&self) -> PluginType {
        match self {
            Self::Source(_) => PluginType::Source,
            Self::Sink(_) => PluginType::Sink,
        }
    }
}

/// One row of the lookup table.
pub struct PluginEntry {
    /// Canonical type name.
    pub type_name: &'static str,
    /// Constructor.
    pub factory: Factory,
}

/// Every plugin type this build knows about.
pub const PLUGINS: &[PluginEntry] = &[
    PluginEntry {
        type_name: "NGINX_RATELIMIT",
        factory: Factory::Source(build_nginx_ratelimit),
    },
    PluginEntry {
        type_name: "LINUX_IPSET",
        factory: Factory::Sink(build_linux_ipset),
    },
];

/// Look up a plugin type by name, ignoring case.
pub fn lookup(type_name: &str) -> Result<&'static PluginEntry, PluginError> {
    let wanted = type_name.trim();
    PLUGINS
        .iter()
        .find(|entry| entry.type_name.eq_ignore_ascii_case(wanted))
        .ok_or_else(|| PluginError::UnknownType {
            type_name: type_name.to_owned(),
        })
}

/// Look up a source factory.
pub fn source_factory(type_name: &str) -> Result<SourceFactory, PluginError> {
    match lookup(type_name)?.factory {
        Factory::Source(factory) => Ok(factory),
        other => Err(role_mismatch(type_name, PluginType::Source, other.role())),
    }
}

/// Look up a sink factory.
pub fn sink_factory(type_name: &str) -> Result<SinkFactory, PluginError> {
    match lookup(type_name)?.factory {
        Factory::Sink(factory) => Ok(factory),
        other => Err(role_mismatch(type_name, PluginType::Sink, other.role())),
    }
}

fn role_mismatch(type_name: &str, expected: PluginType, actual: PluginType) -> PluginError {
    PluginError::RoleMismatch {
        type_name: type_name.to_owned(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

fn build_nginx_ratelimit(args: SourceArgs<'_>) -> Result<Box<dyn DynPlugin>, RatewardenError> {
    let config = NginxSourceConfig::from_table(args.config, &args.field)?;
    let builder = args.outputs.into_iter().fold(
        NginxRatelimitSourceBuilder::new()
            .name(args.name)
            .config(config)
            .context(args.ctx),
        |builder, tx| builder.output(tx),
    );
    Ok(Box::new(builder.build()?))
}

fn build_linux_ipset(args: SinkArgs<'_>) -> Result<Box<dyn DynPlugin>, RatewardenError> {
    let config = LinuxIpsetSinkConfig::from_table(args.config, &args.field)?;
    let runner = SystemCommandRunner::new(config.command_timeout());
    let sink = LinuxIpsetSinkBuilder::new()
        .name(args.name)
        .config(config)
        .runner(runner)
        .input(args.input)
        .context(args.ctx)
        .build()?;
    Ok(Box::new(sink))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(lookup("nginx_ratelimit").unwrap().type_name, "NGINX_RATELIMIT");
        assert_eq!(lookup("Linux_Ipset").unwrap().type_name, "LINUX_IPSET");
        assert!(source_factory("NGINX_RATELIMIT").is_ok());
        assert!(sink_factory("linux_ipset").is_ok());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = lookup("REDIS").err().unwrap();
        assert!(matches!(err, PluginError::UnknownType { ref type_name } if type_name == "REDIS"));
    }

    #[test]
    fn role_mismatch_is_rejected() {
        let err = source_factory("linux_ipset").err().unwrap();
        assert_eq!(
            err.to_string(),
            "plugin \"linux_ipset\" is a sink, expected a source"
        );
        assert!(sink_factory("nginx_ratelimit").is_err());
    }

    #[test]
    fn sink_factory_decodes_options() {
        let table: toml::Table = toml::from_str(
            r#"
ipset_name = "ratelimited"
ip_version = 4
dry_run = true
"#,
        )
        .unwrap();
        let (_tx, rx) = mpsc::channel(1);
        let plugin = sink_factory("LINUX_IPSET").unwrap()(SinkArgs {
            name: "api/linux_ipset-0".to_owned(),
            config: &table,
            field: "sources[0].sinks[0].config".to_owned(),
            input: rx,
            ctx: PluginContext::new(Duration::from_millis(200)).0,
        })
        .unwrap();
        assert_eq!(plugin.info().name, "api/linux_ipset-0");
        assert_eq!(plugin.info().plugin_type, PluginType::Sink);
    }

    #[test]
    fn source_factory_reports_bad_options() {
        let table: toml::Table = toml::from_str("cache_size = \"many\"").unwrap();
        let result = source_factory("NGINX_RATELIMIT").unwrap()(SourceArgs {
            name: "api".to_owned(),
            config: &table,
            field: "sources[0].config".to_owned(),
            outputs: Vec::new(),
            ctx: PluginContext::new(Duration::from_millis(200)).0,
        });
        let err = result.err().unwrap();
        assert!(err.to_string().contains("sources[0].config"));
    }
}
