mod defaults;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::GatewayError;
use defaults::*;

/// Largest batch a single media scan may pick up.
pub const MAX_MEDIA_BATCH: u32 = 50;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub sse: SseConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// General process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for daily-rolling log files. Empty = stdout only.
    #[serde(default)]
    pub log_dir: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            log_dir: String::new(),
        }
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Key checked against the `apikey` header or query parameter. Empty = no auth.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_body_mb")]
    pub max_body_mb: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            api_key: String::new(),
            max_body_mb: default_max_body_mb(),
        }
    }
}

/// Relational store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Object store configuration (S3-compatible).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `"s3"` or `"memory"`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    /// Endpoint for S3-compatible stores such as MinIO. Empty = AWS.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_true")]
    pub use_ssl: bool,
    /// Base URL objects are publicly reachable under. Empty = derived from endpoint.
    #[serde(default)]
    pub public_url: String,
    #[serde(default = "default_presign_ttl")]
    pub presign_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            endpoint: String::new(),
            region: default_region(),
            bucket: default_bucket(),
            access_key: String::new(),
            secret_key: String::new(),
            use_ssl: true,
            public_url: String::new(),
            presign_ttl_secs: default_presign_ttl(),
        }
    }
}

/// Outbound webhook delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
    /// Upper bound on in-flight webhook POSTs across all sessions.
    #[serde(default = "default_webhook_concurrency")]
    pub max_concurrency: usize,
    /// Accept `http://localhost`-style URLs (development only).
    #[serde(default)]
    pub allow_loopback: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_webhook_timeout(),
            max_concurrency: default_webhook_concurrency(),
            allow_loopback: false,
            user_agent: default_user_agent(),
        }
    }
}

/// Media pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Run the background download scanner.
    #[serde(default = "default_true")]
    pub auto_download: bool,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_parallel_downloads")]
    pub max_parallel_per_session: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    /// Timeout for fetching media from caller-supplied URLs.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_fetch_bytes")]
    pub max_fetch_bytes: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            auto_download: true,
            scan_interval_secs: default_scan_interval(),
            batch_size: default_batch_size(),
            max_parallel_per_session: default_parallel_downloads(),
            max_attempts: default_max_attempts(),
            fetch_timeout_secs: default_fetch_timeout(),
            max_fetch_bytes: default_max_fetch_bytes(),
        }
    }
}

/// Live event stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseConfig {
    #[serde(default = "default_sse_buffer")]
    pub client_buffer: usize,
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            client_buffer: default_sse_buffer(),
            keepalive_secs: default_keepalive(),
        }
    }
}

/// Per-session event mailbox settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

impl Config {
    /// Apply `WAGATE_*` environment overrides on top of file values.
    pub fn apply_env(&mut self) -> Result<(), GatewayError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), GatewayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("WAGATE_DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = lookup("WAGATE_HOST") {
            self.api.host = v;
        }
        if let Some(v) = lookup("WAGATE_PORT") {
            self.api.port = v
                .parse()
                .map_err(|e| GatewayError::Config(format!("WAGATE_PORT '{v}': {e}")))?;
        }
        if let Some(v) = lookup("WAGATE_API_KEY") {
            self.api.api_key = v;
        }
        if let Some(v) = lookup("WAGATE_S3_ENDPOINT") {
            self.storage.endpoint = v;
        }
        if let Some(v) = lookup("WAGATE_S3_ACCESS_KEY") {
            self.storage.access_key = v;
        }
        if let Some(v) = lookup("WAGATE_S3_SECRET_KEY") {
            self.storage.secret_key = v;
        }
        if let Some(v) = lookup("WAGATE_S3_BUCKET") {
            self.storage.bucket = v;
        }
        if let Some(v) = lookup("WAGATE_S3_REGION") {
            self.storage.region = v;
        }
        if let Some(v) = lookup("WAGATE_S3_USE_SSL") {
            self.storage.use_ssl = parse_bool("WAGATE_S3_USE_SSL", &v)?;
        }
        if let Some(v) = lookup("WAGATE_S3_PUBLIC_URL") {
            self.storage.public_url = v;
        }
        if let Some(v) = lookup("WAGATE_WEBHOOK_TIMEOUT_SECS") {
            self.webhook.timeout_secs = v.parse().map_err(|e| {
                GatewayError::Config(format!("WAGATE_WEBHOOK_TIMEOUT_SECS '{v}': {e}"))
            })?;
        }
        if let Some(v) = lookup("WAGATE_ALLOW_LOOPBACK_WEBHOOKS") {
            self.webhook.allow_loopback = parse_bool("WAGATE_ALLOW_LOOPBACK_WEBHOOKS", &v)?;
        }
        Ok(())
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.api.port == 0 {
            return Err(GatewayError::Config("api.port must not be 0".into()));
        }
        if self.media.batch_size == 0 || self.media.batch_size > MAX_MEDIA_BATCH {
            return Err(GatewayError::Config(format!(
                "media.batch_size must be between 1 and {MAX_MEDIA_BATCH}"
            )));
        }
        if self.media.max_parallel_per_session == 0 {
            return Err(GatewayError::Config(
                "media.max_parallel_per_session must be at least 1".into(),
            ));
        }
        if self.sse.client_buffer == 0 {
            return Err(GatewayError::Config(
                "sse.client_buffer must be at least 1".into(),
            ));
        }
        if self.dispatch.mailbox_capacity == 0 {
            return Err(GatewayError::Config(
                "dispatch.mailbox_capacity must be at least 1".into(),
            ));
        }
        match self.storage.backend.as_str() {
            "s3" if self.storage.bucket.trim().is_empty() => Err(GatewayError::Config(
                "storage.bucket is required for the s3 backend".into(),
            )),
            "s3" | "memory" => Ok(()),
            other => Err(GatewayError::Config(format!(
                "unsupported storage backend: {other}"
            ))),
        }
    }

    /// Database URL with `~` expanded.
    pub fn database_url(&self) -> String {
        match self.database.url.strip_prefix("sqlite:") {
            Some(path) => format!("sqlite:{}", shellexpand(path)),
            None => self.database.url.clone(),
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, GatewayError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(GatewayError::Config(format!(
            "{key}: expected a boolean, got '{value}'"
        ))),
    }
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file, then apply environment overrides.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, GatewayError> {
    let file = Path::new(path);
    let mut config = if file.exists() {
        let content = std::fs::read_to_string(file).map_err(|e| {
            GatewayError::Config(format!("failed to read {}: {}", file.display(), e))
        })?;
        toml::from_str::<Config>(&content)
            .map_err(|e| GatewayError::Config(format!("failed to parse config: {}", e)))?
    } else {
        info!(
            "Config file not found at {}, using defaults",
            file.display()
        );
        Config::default()
    };

    config.apply_env()?;
    config.validate()?;
    Ok(config)
}
