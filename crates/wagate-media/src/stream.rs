//! Proxying stored objects whose URL is only reachable from inside the deployment.

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use std::net::IpAddr;
use wagate_core::error::GatewayError;

/// Object body being relayed to an API client.
pub struct ProxiedObject {
    pub content_type: String,
    pub content_length: Option<u64>,
    pub stream: BoxStream<'static, Result<Bytes, GatewayError>>,
}

/// True when clients outside the deployment cannot reach `url` directly:
/// localhost, private or loopback addresses, `*.local`, and dotless
/// hostnames such as container service names.
pub fn is_local_url(url: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    match parsed.host() {
        Some(url::Host::Ipv4(ip)) => is_private(&IpAddr::V4(ip)),
        Some(url::Host::Ipv6(ip)) => is_private(&IpAddr::V6(ip)),
        Some(url::Host::Domain(host)) => {
            let host = host.to_ascii_lowercase();
            host == "localhost"
                || host.ends_with(".localhost")
                || host.ends_with(".local")
                || !host.contains('.')
        }
        None => false,
    }
}

fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            let seg0 = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (seg0 & 0xfe00) == 0xfc00
                || (seg0 & 0xffc0) == 0xfe80
        }
    }
}

/// Open `url` and hand back its body as a stream.
pub async fn stream_object(
    http: &reqwest::Client,
    url: &str,
    fallback_mime: &str,
) -> Result<ProxiedObject, GatewayError> {
    let resp = http
        .get(url)
        .send()
        .await
        .map_err(|e| GatewayError::DownloadFailed(format!("proxy {url}: {e}")))?;
    if !resp.status().is_success() {
        return Err(GatewayError::DownloadFailed(format!(
            "proxy {url}: HTTP {}",
            resp.status()
        )));
    }
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(fallback_mime)
        .to_string();
    let content_length = resp.content_length();
    let stream = resp
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| GatewayError::DownloadFailed(e.to_string())))
        .boxed();
    Ok(ProxiedObject {
        content_type,
        content_length,
        stream,
    })
}
