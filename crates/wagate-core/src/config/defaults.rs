//! Default value functions used by serde for config deserialization.

pub fn default_name() -> String {
    "wagate".to_string()
}

pub fn default_data_dir() -> String {
    "~/.wagate".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_true() -> bool {
    true
}

pub fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

pub fn default_api_port() -> u16 {
    8080
}

pub fn default_max_body_mb() -> usize {
    110
}

pub fn default_database_url() -> String {
    "sqlite:~/.wagate/data/wagate.db".to_string()
}

pub fn default_max_connections() -> u32 {
    8
}

pub fn default_storage_backend() -> String {
    "s3".to_string()
}

pub fn default_region() -> String {
    "us-east-1".to_string()
}

pub fn default_bucket() -> String {
    "wagate-media".to_string()
}

pub fn default_presign_ttl() -> u64 {
    3600
}

pub fn default_webhook_timeout() -> u64 {
    10
}

pub fn default_webhook_concurrency() -> usize {
    64
}

pub fn default_user_agent() -> String {
    concat!("wagate/", env!("CARGO_PKG_VERSION")).to_string()
}

pub fn default_scan_interval() -> u64 {
    60
}

pub fn default_batch_size() -> u32 {
    20
}

pub fn default_parallel_downloads() -> usize {
    3
}

pub fn default_max_attempts() -> i64 {
    3
}

pub fn default_fetch_timeout() -> u64 {
    30
}

pub fn default_max_fetch_bytes() -> u64 {
    100 * 1024 * 1024
}

pub fn default_sse_buffer() -> usize {
    64
}

pub fn default_keepalive() -> u64 {
    30
}

pub fn default_mailbox_capacity() -> usize {
    1024
}
