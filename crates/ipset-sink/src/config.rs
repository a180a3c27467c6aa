//! ipset 싱크 설정
//!
//! [`LinuxIpsetSinkConfig`]는 `[sources.sinks.config]` 테이블을 역직렬화한 값입니다.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use ratewarden_core::config::decode_plugin_config;
use ratewarden_core::types::{IpNet, IpVersion, default_ignore_cidrs};

use crate::error::IpsetSinkError;

/// ipset 집합 이름 최대 길이 (IPSET_MAXNAMELEN - 1)
const MAX_SET_NAME_LEN: usize = 31;

/// 명령 타임아웃 상한 (밀리초)
const MAX_COMMAND_TIMEOUT_MS: u64 = 60_000;

/// Linux ipset 싱크 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinuxIpsetSinkConfig {
    /// 대상 집합 이름 (필수)
    pub ipset_name: String,
    /// ipset 실행 파일
    pub ipset_command: String,
    /// 엔트리 타임아웃 (초). 없으면 집합 기본값 사용
    pub entry_default_timeout_seconds: Option<u32>,
    /// 엔트리 코멘트 템플릿. 없으면 `added_at=<timestamp>`
    pub entry_default_comment: Option<String>,
    /// 무시할 네트워크 목록
    pub ignore_cidrs: Vec<IpNet>,
    /// 집합의 주소 버전 (4 또는 6). 없으면 `ipset list`로 감지
    pub ip_version: Option<u8>,
    /// 명령 타임아웃 (밀리초)
    pub command_timeout_ms: u64,
    /// true면 명령을 구성해 로그만 남기고 실행하지 않음
    pub dry_run: bool,
}

impl Default for LinuxIpsetSinkConfig {
    fn default() -> Self {
        Self {
            ipset_name: String::new(),
            ipset_command: "ipset".to_owned(),
            entry_default_timeout_seconds: None,
            entry_default_comment: None,
            ignore_cidrs: default_ignore_cidrs(),
            ip_version: None,
            command_timeout_ms: 2000,
            dry_run: false,
        }
    }
}

impl LinuxIpsetSinkConfig {
    /// 플러그인 옵션 테이블에서 설정을 만들고 검증합니다.
    pub fn from_table(table: &toml::Table, field: &str) -> Result<Self, IpsetSinkError> {
        let config: Self = decode_plugin_config(table, field)
            .map_err(|e| IpsetSinkError::config(field, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), IpsetSinkError> {
        // 명령에는 설정값이 그대로 전달되므로 앞뒤 공백도 거부함
        let name = self.ipset_name.as_str();
        if name.trim().is_empty() {
            return Err(IpsetSinkError::config("ipset_name", "must not be empty"));
        }
        if name.len() > MAX_SET_NAME_LEN {
            return Err(IpsetSinkError::config(
                "ipset_name",
                format!("must be at most {MAX_SET_NAME_LEN} characters"),
            ));
        }
        if name.starts_with('-') || name.chars().any(char::is_whitespace) {
            return Err(IpsetSinkError::config(
                "ipset_name",
                format!("'{name}' is not a valid set name"),
            ));
        }

        if self.ipset_command.trim().is_empty() {
            return Err(IpsetSinkError::config("ipset_command", "must not be empty"));
        }

        if let Some(version) = self.ip_version {
            if IpVersion::from_number(version).is_none() {
                return Err(IpsetSinkError::config(
                    "ip_version",
                    format!("must be 4 or 6, got {version}"),
                ));
            }
        }

        if self.command_timeout_ms == 0 || self.command_timeout_ms > MAX_COMMAND_TIMEOUT_MS {
            return Err(IpsetSinkError::config(
                "command_timeout_ms",
                format!("must be between 1 and {MAX_COMMAND_TIMEOUT_MS}"),
            ));
        }

        Ok(())
    }

    /// 설정된 주소 버전
    pub fn ip_version(&self) -> Option<IpVersion> {
        self.ip_version.and_then(IpVersion::from_number)
    }

    /// 명령 타임아웃
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<LinuxIpsetSinkConfig, IpsetSinkError> {
        let table = toml_str.parse::<toml::Table>().unwrap();
        LinuxIpsetSinkConfig::from_table(&table, "sources[0].sinks[0].config")
    }

    #[test]
    fn defaults_apply_when_only_name_given() {
        let config = parse(r#"ipset_name = "ratelimited""#).unwrap();
        assert_eq!(config.ipset_command, "ipset");
        assert_eq!(config.entry_default_timeout_seconds, None);
        assert_eq!(config.entry_default_comment, None);
        assert_eq!(config.ignore_cidrs, default_ignore_cidrs());
        assert_eq!(config.ip_version(), None);
        assert_eq!(config.command_timeout(), Duration::from_secs(2));
        assert!(!config.dry_run);
    }

    #[test]
    fn parses_full_table() {
        let config = parse(
            r#"
ipset_name = "ratelimited6"
ipset_command = "/usr/sbin/ipset"
entry_default_timeout_seconds = 3600
entry_default_comment = "zone={zone}"
ignore_cidrs = ["2001:db8::/32"]
ip_version = 6
command_timeout_ms = 500
dry_run = true
"#,
        )
        .unwrap();
        assert_eq!(config.entry_default_timeout_seconds, Some(3600));
        assert_eq!(config.ip_version(), Some(IpVersion::V6));
        assert_eq!(config.ignore_cidrs.len(), 1);
        assert!(config.dry_run);
    }

    #[test]
    fn rejects_missing_or_malformed_name() {
        assert!(parse("").unwrap_err().to_string().contains("ipset_name"));
        assert!(parse(r#"ipset_name = "-exist""#).is_err());
        assert!(parse(r#"ipset_name = "two words""#).is_err());
        assert!(parse(&format!(r#"ipset_name = "{}""#, "x".repeat(32))).is_err());
    }

    #[test]
    fn rejects_surrounding_whitespace_in_name() {
        let err = parse(r#"ipset_name = " ratelimited""#).unwrap_err();
        assert!(err.to_string().contains("ipset_name"));
        assert!(parse("ipset_name = \"ratelimited\\t\"").is_err());
    }

    #[test]
    fn rejects_bad_ip_version_and_timeout() {
        let err = parse("ipset_name = \"s\"\nip_version = 5").unwrap_err();
        assert!(err.to_string().contains("ip_version"));

        let err = parse("ipset_name = \"s\"\ncommand_timeout_ms = 0").unwrap_err();
        assert!(err.to_string().contains("command_timeout_ms"));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(parse("ipset_name = \"s\"\ntimeout = 5").is_err());
    }
}
