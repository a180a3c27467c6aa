//! ipset 명령 구성과 `ipset list -terse` 출력 파싱
//!
//! # 엔트리 추가
//! ```text
//! ipset -exist add <set> <address> [timeout <n>] comment <text>
//! ```
//! `-exist`로 이미 있는 엔트리를 다시 추가해도 에러가 나지 않습니다 (타임아웃은 갱신됨).
//!
//! # 메타데이터 조회
//! ```text
//! $ ipset list ratelimited -terse
//! Name: ratelimited
//! Type: hash:net
//! Revision: 6
//! Header: family inet hashsize 1024 maxelem 65536 timeout 3600 counters comment
//! Size in memory: 1044
//! References: 1
//! Number of entries: 3
//! ```

use chrono::{DateTime, SecondsFormat, Utc};

use ratewarden_core::event::RateLimitEvent;
use ratewarden_core::types::{IpNet, IpVersion};

use crate::error::IpsetSinkError;

/// 커널이 허용하는 코멘트 최대 길이 (IPSET_MAX_COMMENT_SIZE)
pub const MAX_COMMENT_LEN: usize = 255;

/// `-exist add` 명령 벡터를 만듭니다.
pub fn add_command(
    ipset_command: &str,
    set: &str,
    address: &IpNet,
    timeout_seconds: Option<u32>,
    comment: &str,
) -> Vec<String> {
    let mut argv = vec![
        ipset_command.to_owned(),
        "-exist".to_owned(),
        "add".to_owned(),
        set.to_owned(),
        address.to_string(),
    ];
    if let Some(timeout) = timeout_seconds {
        argv.push("timeout".to_owned());
        argv.push(timeout.to_string());
    }
    argv.push("comment".to_owned());
    argv.push(comment.to_owned());
    argv
}

/// `list <set> -terse` 명령 벡터를 만듭니다.
pub fn list_command(ipset_command: &str, set: &str) -> Vec<String> {
    vec![
        ipset_command.to_owned(),
        "list".to_owned(),
        set.to_owned(),
        "-terse".to_owned(),
    ]
}

/// 엔트리 코멘트를 만듭니다.
///
/// 템플릿이 없으면 `added_at=<RFC 3339 UTC>`를 사용합니다. 템플릿에서는
/// `{added_at}`, `{address}`, `{zone}`, `{kind}`, `{action}`이 치환됩니다.
/// 결과는 [`MAX_COMMENT_LEN`] 바이트로 잘립니다.
pub fn render_comment(
    template: Option<&str>,
    event: &RateLimitEvent,
    now: DateTime<Utc>,
) -> String {
    let added_at = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    let comment = match template {
        None => format!("added_at={added_at}"),
        Some(template) => template
            .replace("{added_at}", &added_at)
            .replace("{address}", &event.address.to_string())
            .replace("{zone}", &event.zone)
            .replace("{kind}", event.kind.as_str())
            .replace("{action}", event.action.as_str()),
    };
    truncate_on_char_boundary(comment, MAX_COMMENT_LEN)
}

fn truncate_on_char_boundary(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

/// `Header:` 줄의 내용
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetHeader {
    /// 주소 패밀리 (`inet`, `inet6`)
    pub family: Option<String>,
    /// 해시 크기
    pub hashsize: Option<u64>,
    /// 최대 엔트리 수
    pub maxelem: Option<u64>,
    /// 기본 타임아웃 (초)
    pub timeout: Option<u64>,
    /// 카운터 지원 여부
    pub counters: bool,
    /// 코멘트 지원 여부
    pub comment: bool,
}

/// `ipset list -terse`로 얻은 집합 메타데이터
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetInfo {
    /// 집합 이름
    pub name: Option<String>,
    /// 집합 타입 (예: `hash:net`)
    pub set_type: Option<String>,
    /// 리비전
    pub revision: Option<u32>,
    /// 헤더
    pub header: Option<SetHeader>,
    /// 메모리 사용량 (바이트)
    pub memory_size: Option<u64>,
    /// 참조 수
    pub references: Option<u64>,
    /// 엔트리 수
    pub entry_count: Option<u64>,
}

impl SetInfo {
    /// 집합 패밀리에서 주소 버전을 얻습니다.
    pub fn ip_version(&self) -> Result<IpVersion, String> {
        let family = self
            .header
            .as_ref()
            .and_then(|h| h.family.as_deref())
            .ok_or_else(|| "header has no family".to_owned())?;
        IpVersion::from_family(family).ok_or_else(|| format!("unknown family '{family}'"))
    }
}

/// `ipset list -terse` 출력을 파싱합니다.
///
/// 알 수 없는 줄과 헤더 토큰은 무시합니다. 숫자 필드가 숫자가 아니면 에러입니다.
pub fn parse_list_output(output: &str) -> Result<SetInfo, IpsetSinkError> {
    let mut info = SetInfo::default();

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim() {
            "Name" => info.name = Some(value.to_owned()),
            "Type" => info.set_type = Some(value.to_owned()),
            "Revision" => info.revision = Some(parse_number(key, value)?),
            "Header" => info.header = Some(parse_header(value)?),
            "Size in memory" => info.memory_size = Some(parse_number(key, value)?),
            "References" => info.references = Some(parse_number(key, value)?),
            "Number of entries" => info.entry_count = Some(parse_number(key, value)?),
            _ => {}
        }
    }

    Ok(info)
}

fn parse_header(value: &str) -> Result<SetHeader, IpsetSinkError> {
    let mut header = SetHeader::default();
    let mut tokens = value.split_whitespace();

    while let Some(token) = tokens.next() {
        match token {
            "family" | "hashsize" | "maxelem" | "timeout" => {
                let val = tokens.next().ok_or_else(|| {
                    IpsetSinkError::ListParse(format!("header key '{token}' has no value"))
                })?;
                match token {
                    "family" => header.family = Some(val.to_owned()),
                    "hashsize" => header.hashsize = Some(parse_number(token, val)?),
                    "maxelem" => header.maxelem = Some(parse_number(token, val)?),
                    _ => header.timeout = Some(parse_number(token, val)?),
                }
            }
            "counters" => header.counters = true,
            "comment" => header.comment = true,
            _ => {}
        }
    }

    Ok(header)
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, IpsetSinkError> {
    value
        .trim()
        .parse()
        .map_err(|_| IpsetSinkError::ListParse(format!("'{}' is not a number: '{value}'", key.trim())))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use ratewarden_core::event::{LimitAction, LimitKind};

    use super::*;

    const TERSE: &str = "Name: set1
Type: hash:net
Revision: 6
Header: family inet hashsize 1024 maxelem 9000 timeout 9001 counters comment
Size in memory: 1044
References: 0
Number of entries: 1
";

    fn event(address: &str) -> RateLimitEvent {
        RateLimitEvent {
            kind: LimitKind::Requests,
            action: LimitAction::Limit,
            zone: "api".to_owned(),
            excess: 2.5,
            dry_run: false,
            address: address.parse().unwrap(),
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn add_command_with_timeout() {
        let argv = add_command("ipset", "ratelimited", &"10.0.0.5".parse().unwrap(), Some(3600), "c");
        assert_eq!(
            argv,
            ["ipset", "-exist", "add", "ratelimited", "10.0.0.5", "timeout", "3600", "comment", "c"]
        );
    }

    #[test]
    fn add_command_without_timeout_keeps_network_prefix() {
        let argv = add_command("ipset", "nets", &"10.1.0.0/16".parse().unwrap(), None, "c");
        assert_eq!(argv, ["ipset", "-exist", "add", "nets", "10.1.0.0/16", "comment", "c"]);
    }

    #[test]
    fn list_command_is_terse() {
        assert_eq!(list_command("ipset", "s"), ["ipset", "list", "s", "-terse"]);
    }

    #[test]
    fn default_comment_is_added_at_utc() {
        let comment = render_comment(None, &event("10.0.0.5"), fixed_now());
        assert_eq!(comment, "added_at=2024-03-01T12:00:00Z");
    }

    #[test]
    fn template_placeholders_are_substituted() {
        let comment = render_comment(
            Some("ratewarden {action} {kind} zone={zone} addr={address} at {added_at}"),
            &event("2001:db8::1"),
            fixed_now(),
        );
        assert_eq!(
            comment,
            "ratewarden LIMIT REQUESTS zone=api addr=2001:db8::1 at 2024-03-01T12:00:00Z"
        );
    }

    #[test]
    fn long_comment_is_truncated_on_char_boundary() {
        let template = "é".repeat(200);
        let comment = render_comment(Some(&template), &event("10.0.0.5"), fixed_now());
        assert!(comment.len() <= MAX_COMMENT_LEN);
        assert_eq!(comment.len(), 254);
    }

    #[test]
    fn parses_terse_listing() {
        let info = parse_list_output(TERSE).unwrap();
        assert_eq!(info.name.as_deref(), Some("set1"));
        assert_eq!(info.set_type.as_deref(), Some("hash:net"));
        assert_eq!(info.revision, Some(6));
        assert_eq!(info.memory_size, Some(1044));
        assert_eq!(info.references, Some(0));
        assert_eq!(info.entry_count, Some(1));

        let header = info.header.clone().unwrap();
        assert_eq!(header.family.as_deref(), Some("inet"));
        assert_eq!(header.hashsize, Some(1024));
        assert_eq!(header.maxelem, Some(9000));
        assert_eq!(header.timeout, Some(9001));
        assert!(header.counters);
        assert!(header.comment);

        assert_eq!(info.ip_version(), Ok(IpVersion::V4));
    }

    #[test]
    fn inet6_family_maps_to_v6() {
        let info = parse_list_output("Name: s6\nHeader: family inet6 hashsize 1024 maxelem 65536\n").unwrap();
        assert_eq!(info.ip_version(), Ok(IpVersion::V6));
        assert!(!info.header.unwrap().comment);
    }

    #[test]
    fn missing_or_unknown_family_is_detection_failure() {
        let info = parse_list_output("Name: s\nType: hash:ip\n").unwrap();
        assert!(info.ip_version().is_err());

        let info = parse_list_output("Header: family bridge\n").unwrap();
        assert_eq!(info.ip_version(), Err("unknown family 'bridge'".to_owned()));
    }

    #[test]
    fn malformed_numbers_and_dangling_keys_are_errors() {
        assert!(parse_list_output("Revision: six\n").is_err());
        assert!(parse_list_output("Header: family inet hashsize\n").is_err());
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        let info = parse_list_output("Members:\nWarning: something\n\n").unwrap();
        assert_eq!(info, SetInfo::default());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn parse_arbitrary_text_does_not_panic(text in "(?s).{0,500}") {
                let _ = parse_list_output(&text);
            }
        }
    }
}
