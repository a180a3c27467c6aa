//! CLI argument definitions for ratewarden-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// nginx rate-limit log to ipset firewall daemon.
///
/// Follows nginx error logs, picks out `limit_req`/`limit_conn` events
/// and adds the offending clients to Linux ipsets.
#[derive(Parser, Debug)]
#[command(name = "ratewarden-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to ratewarden.toml.
    ///
    /// When omitted, `./ratewarden.toml`, `~/.config/ratewarden/ratewarden.toml`
    /// and `/etc/ratewarden/ratewarden.toml` are tried in order.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration and plugin types, then exit without starting workers.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path (takes precedence over config file).
    #[arg(long)]
    pub pid_file: Option<String>,
}

impl DaemonCli {
    /// Apply CLI overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut ratewarden_core::RatewardenConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }
        if let Some(pid_file) = &self.pid_file {
            config.general.pid_file = pid_file.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_flags() {
        let cli = DaemonCli::try_parse_from([
            "ratewarden-daemon",
            "--config",
            "/tmp/rw.toml",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--validate",
            "--pid-file",
            "/run/rw.pid",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/rw.toml")));
        assert!(cli.validate);

        let mut config = ratewarden_core::RatewardenConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.log_format, "pretty");
        assert_eq!(config.general.pid_file, "/run/rw.pid");
    }

    #[test]
    fn config_path_is_optional() {
        let cli = DaemonCli::try_parse_from(["ratewarden-daemon"]).unwrap();
        assert!(cli.config.is_none());
        assert!(!cli.validate);
    }
}
