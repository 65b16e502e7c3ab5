use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use reqwest::header::HeaderName;

use crate::error::{Error, Result};
use crate::io::{ForwardHeaders, ReaderConfig};
use crate::server::{AccessPolicy, HostPattern, ProxyConfig};

#[derive(Parser, Debug)]
#[command(name = "archive-proxy")]
#[command(version)]
#[command(about = "List and extract entries of remote archives over HTTP Range requests", long_about = None)]
#[command(after_help = "Every option can also be set through its ARCHIVE_* environment variable.\n\n\
Examples:\n  \
  archive-proxy --port 9000 --allow-hosts '*.example.com'\n  \
  curl 'localhost:8080/list?url=https://example.com/a.zip'\n  \
  curl 'localhost:8080/stream/docs/readme.txt?url=https://example.com/a.zip'")]
pub struct Cli {
    /// Address to listen on
    #[arg(long, env = "ARCHIVE_IP", default_value = "0.0.0.0")]
    pub ip: IpAddr,

    /// Port to listen on
    #[arg(long, env = "ARCHIVE_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Comma separated list of allowed remote hosts (exact, *.suffix or CIDR)
    #[arg(long, env = "ARCHIVE_ALLOW_HOSTS", default_value = "")]
    pub allow_hosts: String,

    /// Comma separated list of denied remote hosts
    #[arg(long, env = "ARCHIVE_DENY_HOSTS", default_value = "")]
    pub deny_hosts: String,

    /// Comma separated list of allowed referring hosts
    #[arg(long, env = "ARCHIVE_REFERRERS", default_value = "")]
    pub referrers: String,

    /// Include the Referer header in remote requests
    #[arg(long, env = "ARCHIVE_INCLUDE_REFERER", default_value_t = true, action = clap::ArgAction::Set)]
    pub include_referer: bool,

    /// Comma separated list of request headers to pass to the remote server
    #[arg(long, env = "ARCHIVE_PASS_REQUEST_HEADERS", default_value = "")]
    pub pass_request_headers: String,

    /// Ring buffer size per request, in bytes
    #[arg(long, env = "ARCHIVE_BUFFER_SIZE", default_value_t = crate::io::DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Size of one range request, in bytes
    #[arg(long, env = "ARCHIVE_FETCH_SIZE", default_value_t = crate::io::DEFAULT_FETCH_SIZE)]
    pub fetch_size: usize,

    /// Range requests in flight per refill
    #[arg(long, env = "ARCHIVE_FANOUT", default_value_t = crate::io::DEFAULT_FANOUT)]
    pub fanout: usize,

    /// Timeout of one origin request, in seconds
    #[arg(long, env = "ARCHIVE_TIMEOUT", default_value_t = 30)]
    pub timeout: u64,

    /// Retries of a failed range fetch
    #[arg(long, env = "ARCHIVE_MAX_RETRY", default_value_t = 3)]
    pub max_retry: u32,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "ARCHIVE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

impl Cli {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn proxy_config(&self) -> Result<ProxyConfig> {
        let reader = ReaderConfig {
            buffer_size: self.buffer_size,
            fetch_size: self.fetch_size,
            fanout: self.fanout,
        };
        reader.validate()?;

        let names = split_list(&self.pass_request_headers)
            .map(|name| {
                HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| Error::InvalidConfiguration(format!("invalid header name {name}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ProxyConfig {
            reader,
            policy: AccessPolicy {
                allow_hosts: HostPattern::parse_list(&self.allow_hosts)?,
                deny_hosts: HostPattern::parse_list(&self.deny_hosts)?,
                referrers: HostPattern::parse_list(&self.referrers)?,
            },
            forward: ForwardHeaders {
                include_referer: self.include_referer,
                names,
            },
            max_retry: self.max_retry,
        })
    }
}
