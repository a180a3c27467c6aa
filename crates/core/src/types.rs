//! 도메인 타입 — 시스템 전역에서 사용되는 공통 타입
//!
//! 소스와 싱크가 모두 사용하는 IP 네트워크 표현을 정의합니다.
//! 클라이언트 주소는 소스에서 한 번만 파싱되고, 이후 단계에서는
//! 파싱된 [`IpNet`]을 그대로 재사용합니다.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// IP 주소 버전
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpVersion {
    /// IPv4 (ipset family `inet`)
    V4,
    /// IPv6 (ipset family `inet6`)
    V6,
}

impl IpVersion {
    /// 설정 값(4 또는 6)에서 버전을 만듭니다.
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            4 => Some(Self::V4),
            6 => Some(Self::V6),
            _ => None,
        }
    }

    /// ipset family 이름(`inet`, `inet6`)에서 버전을 만듭니다.
    pub fn from_family(family: &str) -> Option<Self> {
        match family {
            "inet" => Some(Self::V4),
            "inet6" => Some(Self::V6),
            _ => None,
        }
    }

    /// 숫자 표현 (4 또는 6)
    pub fn number(self) -> u8 {
        match self {
            Self::V4 => 4,
            Self::V6 => 6,
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ipv{}", self.number())
    }
}

/// IP 네트워크 파싱 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid ip network '{input}': {reason}")]
pub struct IpNetParseError {
    /// 입력 문자열
    pub input: String,
    /// 실패 사유
    pub reason: String,
}

/// IP 네트워크 (주소 + 프리픽스 길이)
///
/// 호스트 비트가 설정된 입력도 허용하며, 파싱 시 네트워크 주소로 마스킹합니다.
/// 프리픽스가 없는 주소는 전체 길이 프리픽스(/32, /128)로 취급합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpNet {
    network: IpAddr,
    prefix_len: u8,
}

impl IpNet {
    /// 주소와 프리픽스 길이로 네트워크를 생성합니다.
    ///
    /// 프리픽스 길이가 주소 버전의 최대값을 넘으면 `None`을 반환합니다.
    pub fn new(addr: IpAddr, prefix_len: u8) -> Option<Self> {
        let max = max_prefix_len(&addr);
        if prefix_len > max {
            return None;
        }
        Some(Self {
            network: mask(addr, prefix_len),
            prefix_len,
        })
    }

    /// 단일 호스트 네트워크를 생성합니다.
    pub fn host(addr: IpAddr) -> Self {
        Self {
            network: addr,
            prefix_len: max_prefix_len(&addr),
        }
    }

    /// 네트워크 주소
    pub fn network(&self) -> IpAddr {
        self.network
    }

    /// 프리픽스 길이
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// 주소 버전
    pub fn version(&self) -> IpVersion {
        match self.network {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }

    /// 단일 호스트(전체 길이 프리픽스)인지 확인합니다.
    pub fn is_host(&self) -> bool {
        self.prefix_len == max_prefix_len(&self.network)
    }

    /// 주소가 이 네트워크에 속하는지 확인합니다.
    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => {
                mask(*addr, self.prefix_len) == self.network
            }
            _ => false,
        }
    }

    /// 두 네트워크가 겹치는지 확인합니다.
    ///
    /// 버전이 다르면 겹치지 않습니다.
    pub fn overlaps(&self, other: &IpNet) -> bool {
        self.contains(&other.network) || other.contains(&self.network)
    }
}

impl FromStr for IpNet {
    type Err = IpNetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let err = |reason: &str| IpNetParseError {
            input: input.to_owned(),
            reason: reason.to_owned(),
        };

        match input.split_once('/') {
            Some((addr, prefix)) => {
                let addr: IpAddr = addr.parse().map_err(|_| err("invalid address"))?;
                let prefix_len: u8 = prefix.parse().map_err(|_| err("invalid prefix length"))?;
                Self::new(addr, prefix_len).ok_or_else(|| err("prefix length out of range"))
            }
            None => {
                let addr: IpAddr = input.parse().map_err(|_| err("invalid address"))?;
                Ok(Self::host(addr))
            }
        }
    }
}

impl fmt::Display for IpNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_host() {
            write!(f, "{}", self.network)
        } else {
            write!(f, "{}/{}", self.network, self.prefix_len)
        }
    }
}

impl Serialize for IpNet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IpNet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 기본 무시 대역 (루프백)
pub fn default_ignore_cidrs() -> Vec<IpNet> {
    vec![
        IpNet::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 0)), 8)
            .unwrap_or_else(|| IpNet::host(IpAddr::V4(Ipv4Addr::LOCALHOST))),
        IpNet::host(IpAddr::V6(Ipv6Addr::LOCALHOST)),
    ]
}

/// 주소가 무시 대역 중 하나와 겹치면 해당 대역을 반환합니다.
pub fn find_overlapping<'a>(net: &IpNet, cidrs: &'a [IpNet]) -> Option<&'a IpNet> {
    cidrs.iter().find(|cidr| net.overlaps(cidr))
}

fn max_prefix_len(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn mask(addr: IpAddr, prefix_len: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let bits = u32::from(v4);
            let mask = if prefix_len == 0 {
                0
            } else {
                u32::MAX << (32 - u32::from(prefix_len))
            };
            IpAddr::V4(Ipv4Addr::from(bits & mask))
        }
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            let mask = if prefix_len == 0 {
                0
            } else {
                u128::MAX << (128 - u32::from(prefix_len))
            };
            IpAddr::V6(Ipv6Addr::from(bits & mask))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    #[test]
    fn bare_address_is_host_network() {
        let n = net("10.0.0.5");
        assert!(n.is_host());
        assert_eq!(n.prefix_len(), 32);
        assert_eq!(n.to_string(), "10.0.0.5");
    }

    #[test]
    fn host_bits_are_masked() {
        let n = net("10.0.0.5/24");
        assert_eq!(n.network(), "10.0.0.0".parse::<IpAddr>().unwrap());
        assert_eq!(n.to_string(), "10.0.0.0/24");
    }

    #[test]
    fn ipv6_parsing() {
        let n = net("::1");
        assert_eq!(n.version(), IpVersion::V6);
        assert_eq!(n.prefix_len(), 128);

        let n = net("2001:db8::1/32");
        assert_eq!(n.to_string(), "2001:db8::/32");
    }

    #[test]
    fn rejects_invalid_input() {
        assert!("not-an-ip".parse::<IpNet>().is_err());
        assert!("10.0.0.0/33".parse::<IpNet>().is_err());
        assert!("10.0.0.0/abc".parse::<IpNet>().is_err());
        assert!("".parse::<IpNet>().is_err());
    }

    #[test]
    fn overlap_in_both_directions() {
        let loopback = net("127.0.0.0/8");
        assert!(net("127.0.0.1").overlaps(&loopback));
        assert!(loopback.overlaps(&net("127.0.0.1")));
        assert!(net("127.0.0.0/4").overlaps(&loopback));
        assert!(!net("10.0.0.5").overlaps(&loopback));
    }

    #[test]
    fn different_versions_never_overlap() {
        assert!(!net("::1").overlaps(&net("127.0.0.0/8")));
        assert!(!net("0.0.0.0/0").overlaps(&net("::/0")));
    }

    #[test]
    fn zero_prefix_contains_everything_of_same_version() {
        let all = net("0.0.0.0/0");
        assert!(all.contains(&"203.0.113.7".parse().unwrap()));
        assert!(!all.contains(&"2001:db8::7".parse().unwrap()));
    }

    #[test]
    fn default_ignore_cidrs_cover_loopback() {
        let cidrs = default_ignore_cidrs();
        assert!(find_overlapping(&net("127.0.0.1"), &cidrs).is_some());
        assert!(find_overlapping(&net("::1"), &cidrs).is_some());
        assert!(find_overlapping(&net("192.0.2.1"), &cidrs).is_none());
    }

    #[test]
    fn ip_version_conversions() {
        assert_eq!(IpVersion::from_number(4), Some(IpVersion::V4));
        assert_eq!(IpVersion::from_number(5), None);
        assert_eq!(IpVersion::from_family("inet6"), Some(IpVersion::V6));
        assert_eq!(IpVersion::from_family("bridge"), None);
        assert_eq!(IpVersion::V4.to_string(), "ipv4");
    }

    #[test]
    fn serde_uses_string_form() {
        let n = net("192.0.2.0/24");
        let json = serde_json::to_string(&n).unwrap();
        assert_eq!(json, "\"192.0.2.0/24\"");
        let back: IpNet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, n);
    }
}
