use std::net::IpAddr;
use std::str::FromStr;

use reqwest::Url;

use crate::error::{Error, Result};

/// One entry of a host list: `example.com`, `*.example.com` or `10.0.0.0/8`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    Exact(String),
    /// `*.example.com`: the domain itself or any subdomain of it.
    Suffix(String),
    Cidr { network: IpAddr, prefix: u8 },
}

impl FromStr for HostPattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s.is_empty() {
            return Err(Error::InvalidConfiguration("empty host pattern".to_string()));
        }
        if let Some(domain) = s.strip_prefix("*.") {
            return Ok(HostPattern::Suffix(domain.to_string()));
        }
        if let Some((addr, prefix)) = s.split_once('/') {
            let invalid = || Error::InvalidConfiguration(format!("invalid CIDR {s}"));
            let network: IpAddr = addr.parse().map_err(|_| invalid())?;
            let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
            let max = if network.is_ipv4() { 32 } else { 128 };
            if prefix > max {
                return Err(invalid());
            }
            return Ok(HostPattern::Cidr { network, prefix });
        }
        Ok(HostPattern::Exact(s))
    }
}

impl HostPattern {
    /// Parses a comma separated list, skipping blanks.
    pub fn parse_list(list: &str) -> Result<Vec<HostPattern>> {
        list.split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .collect()
    }

    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        match self {
            HostPattern::Exact(expected) => host == expected,
            HostPattern::Suffix(domain) => {
                host == domain || host.strip_suffix(domain.as_str()).is_some_and(|rest| rest.ends_with('.'))
            }
            HostPattern::Cidr { network, prefix } => host
                .parse::<IpAddr>()
                .is_ok_and(|ip| cidr_contains(*network, *prefix, ip)),
        }
    }
}

fn cidr_contains(network: IpAddr, prefix: u8, ip: IpAddr) -> bool {
    match (network, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            let mask = u32::MAX.checked_shl(32 - prefix as u32).unwrap_or(0);
            u32::from(net) & mask == u32::from(ip) & mask
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            let mask = u128::MAX.checked_shl(128 - prefix as u32).unwrap_or(0);
            u128::from(net) & mask == u128::from(ip) & mask
        }
        _ => false,
    }
}

fn any_matches(patterns: &[HostPattern], url: &Url) -> bool {
    patterns.iter().any(|p| p.matches(url))
}

/// Which targets may be proxied, and for which referring pages.
///
/// Empty lists impose no restriction.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    pub allow_hosts: Vec<HostPattern>,
    pub deny_hosts: Vec<HostPattern>,
    pub referrers: Vec<HostPattern>,
}

impl AccessPolicy {
    pub fn check(&self, target: &Url, referer: Option<&str>) -> Result<()> {
        if !self.allow_hosts.is_empty() && !any_matches(&self.allow_hosts, target) {
            return Err(Error::Forbidden("requested URL is not allowed".to_string()));
        }
        if any_matches(&self.deny_hosts, target) {
            return Err(Error::Forbidden("request contains a denied host".to_string()));
        }
        if !self.referrers.is_empty() {
            let allowed = referer
                .and_then(|r| Url::parse(r).ok())
                .is_some_and(|r| any_matches(&self.referrers, &r));
            if !allowed {
                return Err(Error::Forbidden(
                    "request does not contain an allowed referrer".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn patterns(list: &str) -> Vec<HostPattern> {
        HostPattern::parse_list(list).unwrap()
    }

    #[test]
    fn parses_pattern_kinds() {
        assert_eq!(
            patterns(" Example.com, *.cdn.net ,,10.0.0.0/8"),
            vec![
                HostPattern::Exact("example.com".to_string()),
                HostPattern::Suffix("cdn.net".to_string()),
                HostPattern::Cidr {
                    network: "10.0.0.0".parse().unwrap(),
                    prefix: 8
                },
            ]
        );
        assert!(HostPattern::parse_list("10.0.0.0/33").is_err());
        assert!(HostPattern::parse_list("nonsense/8").is_err());
    }

    #[test]
    fn suffix_respects_label_boundaries() {
        let pattern: HostPattern = "*.example.com".parse().unwrap();
        assert!(pattern.matches(&url("https://example.com/a.zip")));
        assert!(pattern.matches(&url("https://files.example.com/a.zip")));
        assert!(!pattern.matches(&url("https://badexample.com/a.zip")));
    }

    #[test]
    fn cidr_matches_ip_literals_only() {
        let v4: HostPattern = "192.168.1.0/24".parse().unwrap();
        assert!(v4.matches(&url("http://192.168.1.77:8080/x.tar")));
        assert!(!v4.matches(&url("http://192.168.2.1/x.tar")));
        assert!(!v4.matches(&url("http://example.com/x.tar")));

        let v6: HostPattern = "fd00::/8".parse().unwrap();
        assert!(v6.matches(&url("http://[fd12::1]/x.tar")));
        assert!(!v6.matches(&url("http://[2001:db8::1]/x.tar")));

        let everything: HostPattern = "0.0.0.0/0".parse().unwrap();
        assert!(everything.matches(&url("http://8.8.8.8/")));
    }

    #[test]
    fn allow_and_deny_lists() {
        let policy = AccessPolicy {
            allow_hosts: patterns("*.example.com"),
            deny_hosts: patterns("secret.example.com"),
            ..Default::default()
        };
        assert!(policy.check(&url("https://cdn.example.com/a.zip"), None).is_ok());
        assert!(matches!(
            policy.check(&url("https://other.org/a.zip"), None),
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            policy.check(&url("https://secret.example.com/a.zip"), None),
            Err(Error::Forbidden(_))
        ));

        // A deny list alone blocks only what it names.
        let policy = AccessPolicy {
            deny_hosts: patterns("blocked.org"),
            ..Default::default()
        };
        assert!(policy.check(&url("https://fine.org/a.zip"), None).is_ok());
        assert!(policy.check(&url("https://blocked.org/a.zip"), None).is_err());
    }

    #[test]
    fn referrer_list() {
        let policy = AccessPolicy {
            referrers: patterns("app.example.com"),
            ..Default::default()
        };
        let target = url("https://files.org/a.zip");
        assert!(policy.check(&target, Some("https://app.example.com/page")).is_ok());
        assert!(policy.check(&target, Some("https://evil.org/")).is_err());
        assert!(policy.check(&target, Some("not a url")).is_err());
        assert!(policy.check(&target, None).is_err());
    }

    #[test]
    fn empty_policy_allows_everything() {
        assert!(AccessPolicy::default().check(&url("http://anything/x"), None).is_ok());
    }
}
