use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client as S3Client;
use std::time::Duration;
use tracing::{debug, warn};
use wagate_core::{
    config::StorageConfig,
    error::GatewayError,
    traits::{ObjectStore, StoredObject},
};

/// Longest presign lifetime S3 accepts.
const MAX_PRESIGN: Duration = Duration::from_secs(7 * 24 * 3600);

/// S3-compatible object store (AWS, MinIO, R2, ...).
#[derive(Clone)]
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    region: String,
    /// Prefix every public object URL starts with, bucket included.
    base_url: String,
}

impl S3ObjectStore {
    pub async fn from_config(cfg: &StorageConfig) -> Result<Self, GatewayError> {
        if cfg.bucket.trim().is_empty() {
            return Err(GatewayError::Config("object storage bucket is required".into()));
        }
        let region = Region::new(cfg.region.clone());
        let region_provider = RegionProviderChain::first_try(region.clone());
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);

        if !cfg.access_key.is_empty() && !cfg.secret_key.is_empty() {
            let credentials = Credentials::new(
                cfg.access_key.clone(),
                cfg.secret_key.clone(),
                None,
                None,
                "static-credentials",
            );
            loader = loader.credentials_provider(credentials);
        }
        let aws_cfg = loader.load().await;

        let endpoint = endpoint_url(cfg);
        let mut builder = S3ConfigBuilder::from(&aws_cfg).region(region);
        if let Some(ep) = &endpoint {
            // Custom endpoints are S3-compatible stores that expect path-style addressing.
            builder = builder.endpoint_url(ep.clone()).force_path_style(true);
        }
        let client = S3Client::from_conf(builder.build());

        Ok(Self {
            client,
            bucket: cfg.bucket.clone(),
            region: cfg.region.clone(),
            base_url: public_base_url(cfg, endpoint.as_deref()),
        })
    }

    fn bucket_policy(&self) -> String {
        serde_json::json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": {"AWS": ["*"]},
                "Action": ["s3:GetObject"],
                "Resource": [format!("arn:aws:s3:::{}/*", self.bucket)]
            }]
        })
        .to_string()
    }
}

/// Endpoint with a scheme, or `None` for AWS itself.
fn endpoint_url(cfg: &StorageConfig) -> Option<String> {
    let ep = cfg.endpoint.trim().trim_end_matches('/');
    if ep.is_empty() {
        return None;
    }
    if ep.starts_with("http://") || ep.starts_with("https://") {
        return Some(ep.to_string());
    }
    let scheme = if cfg.use_ssl { "https" } else { "http" };
    Some(format!("{scheme}://{ep}"))
}

/// `{public_url}/{bucket}` when configured, else derived from the endpoint.
fn public_base_url(cfg: &StorageConfig, endpoint: Option<&str>) -> String {
    let public = cfg.public_url.trim().trim_end_matches('/');
    if !public.is_empty() {
        return format!("{public}/{}", cfg.bucket);
    }
    match endpoint {
        Some(ep) => format!("{ep}/{}", cfg.bucket),
        None => format!("https://{}.s3.{}.amazonaws.com", cfg.bucket, cfg.region),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &str {
        "s3"
    }

    async fn ensure_bucket(&self) -> Result<(), GatewayError> {
        if self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok()
        {
            return Ok(());
        }

        let mut req = self.client.create_bucket().bucket(&self.bucket);
        if self.region != "us-east-1" {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        if let Err(e) = req.send().await {
            let already = e
                .as_service_error()
                .map(|se| se.is_bucket_already_owned_by_you() || se.is_bucket_already_exists())
                .unwrap_or(false);
            if !already {
                return Err(GatewayError::StorageUnavailable(format!(
                    "create bucket {}: {e}",
                    self.bucket
                )));
            }
        }

        if let Err(e) = self
            .client
            .put_bucket_policy()
            .bucket(&self.bucket)
            .policy(self.bucket_policy())
            .send()
            .await
        {
            warn!(bucket = %self.bucket, "could not apply public-read policy: {e}");
        }
        Ok(())
    }

    async fn upload(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, GatewayError> {
        let size = data.len() as u64;
        debug!(key, bucket = %self.bucket, size, "uploading object");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| GatewayError::UploadFailed(format!("put {key}: {e}")))?;
        Ok(StoredObject {
            key: key.to_string(),
            url: self.public_url(key),
            size,
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, GatewayError> {
        let out = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| GatewayError::DownloadFailed(format!("get {key}: {e}")))?;
        let body = out
            .body
            .collect()
            .await
            .map_err(|e| GatewayError::DownloadFailed(format!("read {key}: {e}")))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn delete(&self, key: &str) -> Result<(), GatewayError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| GatewayError::StorageUnavailable(format!("delete {key}: {e}")))?;
        Ok(())
    }

    async fn presign(&self, key: &str, ttl: Duration) -> Result<String, GatewayError> {
        let ttl = ttl.clamp(Duration::from_secs(1), MAX_PRESIGN);
        let config = PresigningConfig::expires_in(ttl)
            .map_err(|e| GatewayError::Internal(format!("invalid presign config: {e}")))?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| GatewayError::StorageUnavailable(format!("presign {key}: {e}")))?;
        Ok(presigned.uri().to_string())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{key}", self.base_url)
    }
}
