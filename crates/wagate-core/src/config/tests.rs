use super::*;
use std::collections::HashMap;

#[test]
fn test_defaults_are_valid() {
    let cfg = Config::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.webhook.timeout_secs, 10);
    assert_eq!(cfg.media.max_parallel_per_session, 3);
    assert_eq!(cfg.media.max_attempts, 3);
    assert_eq!(cfg.media.max_fetch_bytes, 100 * 1024 * 1024);
    assert_eq!(cfg.sse.client_buffer, 64);
    assert_eq!(cfg.sse.keepalive_secs, 30);
}

#[test]
fn test_partial_toml_uses_defaults() {
    let toml_str = r#"
        [api]
        port = 9000
        api_key = "secret"

        [storage]
        backend = "memory"
    "#;
    let cfg: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(cfg.api.port, 9000);
    assert_eq!(cfg.api.api_key, "secret");
    assert_eq!(cfg.api.host, "0.0.0.0");
    assert_eq!(cfg.storage.backend, "memory");
    assert_eq!(cfg.media.batch_size, 20);
}

#[test]
fn test_env_overrides() {
    let env: HashMap<&str, &str> = [
        ("WAGATE_PORT", "7070"),
        ("WAGATE_API_KEY", "k"),
        ("WAGATE_S3_BUCKET", "media"),
        ("WAGATE_S3_USE_SSL", "false"),
        ("WAGATE_ALLOW_LOOPBACK_WEBHOOKS", "1"),
    ]
    .into_iter()
    .collect();

    let mut cfg = Config::default();
    cfg.apply_env_from(|k| env.get(k).map(|v| v.to_string()))
        .unwrap();
    assert_eq!(cfg.api.port, 7070);
    assert_eq!(cfg.api.api_key, "k");
    assert_eq!(cfg.storage.bucket, "media");
    assert!(!cfg.storage.use_ssl);
    assert!(cfg.webhook.allow_loopback);
}

#[test]
fn test_env_bad_port_rejected() {
    let mut cfg = Config::default();
    let result = cfg.apply_env_from(|k| (k == "WAGATE_PORT").then(|| "abc".to_string()));
    assert!(result.is_err());
}

#[test]
fn test_validate_batch_size_bounds() {
    let mut cfg = Config::default();
    cfg.media.batch_size = 51;
    assert!(cfg.validate().is_err());
    cfg.media.batch_size = 0;
    assert!(cfg.validate().is_err());
    cfg.media.batch_size = 50;
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_validate_storage_backend() {
    let mut cfg = Config::default();
    cfg.storage.backend = "ftp".into();
    assert!(cfg.validate().is_err());
    cfg.storage.backend = "s3".into();
    cfg.storage.bucket = "  ".into();
    assert!(cfg.validate().is_err());
}

#[test]
fn test_database_url_expands_home() {
    let mut cfg = Config::default();
    cfg.database.url = "sqlite::memory:".into();
    assert_eq!(cfg.database_url(), "sqlite::memory:");
}

#[test]
fn test_load_missing_file_falls_back_to_defaults() {
    let cfg = load("/nonexistent/wagate-config.toml").unwrap();
    assert_eq!(cfg.gateway.name, "wagate");
}
