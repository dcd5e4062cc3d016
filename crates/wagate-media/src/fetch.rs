//! Resolve caller-supplied media (base64, URL, or raw upload) into bytes.

use base64::{engine::general_purpose::STANDARD, Engine};
use std::time::Duration;
use tracing::debug;
use wagate_core::{config::MediaConfig, error::GatewayError};

use crate::keys::sniff_mime;

/// Where outbound media comes from.
#[derive(Debug, Clone)]
pub enum MediaSource {
    /// Plain base64 or a `data:<mime>;base64,` URL.
    Base64(String),
    /// Public URL fetched server-side.
    Url(String),
    /// Bytes from a multipart upload.
    Bytes {
        data: Vec<u8>,
        mime: Option<String>,
        file_name: Option<String>,
    },
}

/// Media bytes plus whatever metadata the source revealed.
#[derive(Debug, Clone)]
pub struct ResolvedMedia {
    pub data: Vec<u8>,
    pub mime: Option<String>,
    pub file_name: Option<String>,
}

/// Fetches remote media with a timeout and a hard size cap.
#[derive(Clone)]
pub struct MediaFetcher {
    http: reqwest::Client,
    max_bytes: u64,
}

impl MediaFetcher {
    pub fn new(config: &MediaConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            http,
            max_bytes: config.max_fetch_bytes,
        })
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub async fn resolve(&self, source: MediaSource) -> Result<ResolvedMedia, GatewayError> {
        let resolved = match source {
            MediaSource::Base64(input) => decode_base64(&input)?,
            MediaSource::Url(url) => self.fetch(&url).await?,
            MediaSource::Bytes {
                data,
                mime,
                file_name,
            } => ResolvedMedia {
                data,
                mime,
                file_name,
            },
        };
        if resolved.data.is_empty() {
            return Err(GatewayError::InvalidRequest("media is empty".into()));
        }
        if resolved.data.len() as u64 > self.max_bytes {
            return Err(GatewayError::FileTooLarge(format!(
                "{} bytes exceeds the {} byte limit",
                resolved.data.len(),
                self.max_bytes
            )));
        }
        Ok(resolved)
    }

    /// GET a URL, reading at most `max_bytes`.
    pub async fn fetch(&self, url: &str) -> Result<ResolvedMedia, GatewayError> {
        let parsed =
            url::Url::parse(url).map_err(|e| GatewayError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(GatewayError::InvalidUrl(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        let mut resp = self.http.get(parsed.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::DownloadFailed(format!("timed out fetching {url}"))
            } else {
                GatewayError::DownloadFailed(format!("fetch {url}: {e}"))
            }
        })?;
        if !resp.status().is_success() {
            return Err(GatewayError::DownloadFailed(format!(
                "fetch {url}: HTTP {}",
                resp.status()
            )));
        }
        if let Some(len) = resp.content_length() {
            if len > self.max_bytes {
                return Err(GatewayError::FileTooLarge(format!(
                    "declared {len} bytes exceeds the {} byte limit",
                    self.max_bytes
                )));
            }
        }

        let mime = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let file_name = parsed
            .path_segments()
            .and_then(|mut s| s.next_back())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let mut data = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| GatewayError::DownloadFailed(format!("read {url}: {e}")))?
        {
            if (data.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(GatewayError::FileTooLarge(format!(
                    "body exceeds the {} byte limit",
                    self.max_bytes
                )));
            }
            data.extend_from_slice(&chunk);
        }
        debug!(url, size = data.len(), "fetched remote media");

        Ok(ResolvedMedia {
            mime: mime.or_else(|| sniff_mime(&data).map(str::to_string)),
            data,
            file_name,
        })
    }
}

/// Decode plain base64 or a data URL.
pub fn decode_base64(input: &str) -> Result<ResolvedMedia, GatewayError> {
    let input = input.trim();
    let (mime, payload) = match input.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| GatewayError::InvalidBase64("malformed data URL".into()))?;
            let mime = header
                .strip_suffix(";base64")
                .ok_or_else(|| GatewayError::InvalidBase64("data URL is not base64".into()))?;
            (Some(mime.to_string()).filter(|m| !m.is_empty()), payload)
        }
        None => (None, input),
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let data = STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| GatewayError::InvalidBase64(e.to_string()))?;
    Ok(ResolvedMedia {
        mime: mime.or_else(|| sniff_mime(&data).map(str::to_string)),
        data,
        file_name: None,
    })
}
