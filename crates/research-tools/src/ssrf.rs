use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlValidationError {
    #[error("could not parse URL: {0}")]
    Malformed(String),
    #[error("unsupported scheme {0:?}, only http/https are allowed")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("host {0:?} resolves to a private, loopback or reserved address")]
    PrivateAddress(String),
    #[error("host {0:?} is blocklisted")]
    BlockedHost(String),
}

const BLOCKED_HOSTS: &[&str] = &["localhost", "metadata.google.internal", "metadata"];

/// Reject any URL a task/search result shouldn't be allowed to fetch: non-
/// http(s) schemes, loopback/private/link-local/reserved addresses (guards
/// against SSRF into the engine's own host or cloud metadata endpoints), and
/// a short hostname blocklist for names that never resolve to something
/// worth scraping.
pub fn validate_url(raw: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(raw).map_err(|e| UrlValidationError::Malformed(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlValidationError::UnsupportedScheme(url.scheme().to_string()));
    }

    let host = url.host_str().ok_or(UrlValidationError::MissingHost)?;
    let host_lower = host.to_ascii_lowercase();
    if BLOCKED_HOSTS.contains(&host_lower.as_str()) {
        return Err(UrlValidationError::BlockedHost(host.to_string()));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_disallowed_ip(ip) {
            return Err(UrlValidationError::PrivateAddress(host.to_string()));
        }
    }

    Ok(url)
}

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_disallowed_v4(v4),
        IpAddr::V6(v6) => is_disallowed_v6(v6),
    }
}

fn is_disallowed_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_unspecified()
        || ip.octets()[0] == 0
        // 169.254.169.254 and friends are covered by is_link_local already.
        || (ip.octets()[0] == 100 && (64..=127).contains(&ip.octets()[1])) // carrier-grade NAT, 100.64.0.0/10
}

fn is_disallowed_v6(ip: Ipv6Addr) -> bool {
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_unique_local()
        || (ip.segments()[0] & 0xffc0) == 0xfe80 // link-local
        || ip.to_ipv4_mapped().is_some_and(is_disallowed_v4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_https_url() {
        assert!(validate_url("https://example.com/article").is_ok());
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert_eq!(
            validate_url("file:///etc/passwd").unwrap_err(),
            UrlValidationError::UnsupportedScheme("file".into())
        );
    }

    #[test]
    fn rejects_loopback_and_private_literals() {
        assert!(validate_url("http://127.0.0.1/admin").is_err());
        assert!(validate_url("http://192.168.1.1/").is_err());
        assert!(validate_url("http://169.254.169.254/latest/meta-data").is_err());
        assert!(validate_url("http://[::1]/").is_err());
    }

    #[test]
    fn rejects_blocklisted_hostnames() {
        assert!(validate_url("http://localhost:8080/").is_err());
    }
}
