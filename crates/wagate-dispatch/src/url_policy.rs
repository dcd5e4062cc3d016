//! Webhook target validation.
//!
//! A webhook URL must parse, use `https`, and point at a public address.
//! Literal IPs and well-known local names are rejected up front; hostnames
//! are then resolved and rejected if any address is private. The sender runs
//! the same checks again before every POST, so a name that later resolves
//! somewhere private is caught. `allow_loopback` lifts the address checks and
//! permits plain `http` for local development.

use std::net::IpAddr;
use tracing::{debug, warn};
use url::{Host, Url};
use wagate_core::error::GatewayError;

/// Private, loopback, link-local, unspecified, and `0.0.0.0/8` ranges.
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.octets()[0] == 0
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_ip(&IpAddr::V4(mapped));
            }
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

fn is_local_name(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    host == "localhost" || host.ends_with(".localhost") || host == "0.0.0.0"
}

/// Checks that need no DNS: syntax, scheme, literal address, local names.
pub fn check_url(raw: &str, allow_loopback: bool) -> Result<Url, GatewayError> {
    let url = Url::parse(raw.trim()).map_err(|e| GatewayError::InvalidUrl(format!("{raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(GatewayError::InvalidUrl(format!(
            "scheme must be http or https, got {}",
            url.scheme()
        )));
    }
    let host = url
        .host()
        .ok_or_else(|| GatewayError::InvalidUrl(format!("{raw}: missing host")))?;
    if allow_loopback {
        return Ok(url);
    }
    if url.scheme() == "http" {
        return Err(GatewayError::InvalidUrl(format!(
            "{raw}: plain http is only allowed with allow_loopback"
        )));
    }
    let blocked = match &host {
        Host::Ipv4(v4) => is_private_ip(&IpAddr::V4(*v4)),
        Host::Ipv6(v6) => is_private_ip(&IpAddr::V6(*v6)),
        Host::Domain(name) => is_local_name(name),
    };
    if blocked {
        return Err(GatewayError::InvalidUrl(format!(
            "{raw}: private or loopback targets are not allowed"
        )));
    }
    Ok(url)
}

/// Full validation including DNS. Returns the normalized URL string.
///
/// A hostname that fails to resolve is accepted; resolution is re-attempted
/// on every delivery and a dead target only produces failed deliveries.
pub async fn validate_webhook_url(raw: &str, allow_loopback: bool) -> Result<String, GatewayError> {
    let url = check_url(raw, allow_loopback)?;
    if allow_loopback {
        return Ok(url.to_string());
    }
    if let Some(Host::Domain(name)) = url.host() {
        let port = url.port_or_known_default().unwrap_or(443);
        match tokio::net::lookup_host((name, port)).await {
            Ok(addrs) => {
                for addr in addrs {
                    if is_private_ip(&addr.ip()) {
                        warn!(host = name, ip = %addr.ip(), "webhook host resolves to a private address");
                        return Err(GatewayError::InvalidUrl(format!(
                            "{raw}: host resolves to private address {}",
                            addr.ip()
                        )));
                    }
                }
            }
            Err(e) => debug!(host = name, "webhook host did not resolve: {e}"),
        }
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_private_ranges() {
        for ip in [
            "127.0.0.1",
            "10.0.0.1",
            "172.16.5.4",
            "192.168.1.1",
            "169.254.169.254",
            "0.1.2.3",
            "0.0.0.0",
        ] {
            let ip: IpAddr = ip.parse().unwrap();
            assert!(is_private_ip(&ip), "{ip} should be private");
        }
        assert!(is_private_ip(&IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert!(is_private_ip(&"fd00::1".parse().unwrap()));
        assert!(is_private_ip(&"fe80::1".parse().unwrap()));
        assert!(is_private_ip(&"::ffff:10.0.0.1".parse().unwrap()));
        assert!(!is_private_ip(&"8.8.8.8".parse().unwrap()));
        assert!(!is_private_ip(&"2606:4700::1111".parse().unwrap()));
    }

    #[test]
    fn test_rejects_local_targets() {
        for url in [
            "http://localhost/hook",
            "http://LOCALHOST:8080/hook",
            "http://10.0.0.1/hook",
            "http://127.0.0.1:9000/",
            "http://[::1]/hook",
            "http://0.0.0.0/",
        ] {
            assert!(
                matches!(check_url(url, false), Err(GatewayError::InvalidUrl(_))),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_bad_scheme_and_syntax() {
        assert!(check_url("ftp://example.com/x", false).is_err());
        assert!(check_url("not a url", false).is_err());
        assert!(check_url("file:///etc/passwd", false).is_err());
    }

    #[test]
    fn test_public_http_needs_loopback_flag() {
        assert!(matches!(
            check_url("http://example.com/hook", false),
            Err(GatewayError::InvalidUrl(_))
        ));
        assert!(check_url("https://example.com/hook", false).is_ok());
        assert!(check_url("http://example.com/hook", true).is_ok());
    }

    #[test]
    fn test_loopback_allowed_when_configured() {
        assert!(check_url("http://127.0.0.1:9000/hook", true).is_ok());
        assert!(check_url("http://localhost/hook", true).is_ok());
        assert!(check_url("ftp://localhost/hook", true).is_err());
    }

    #[tokio::test]
    async fn test_public_url_accepted_and_idempotent() {
        let first = validate_webhook_url("https://example.com/hook", false)
            .await
            .unwrap();
        let second = validate_webhook_url("https://example.com/hook", false)
            .await
            .unwrap();
        assert_eq!(first, "https://example.com/hook");
        assert_eq!(first, second);
    }
}
