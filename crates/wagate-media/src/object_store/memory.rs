use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use wagate_core::{
    error::GatewayError,
    traits::{ObjectStore, StoredObject},
};

/// Process-local object store for development and tests.
pub struct MemoryObjectStore {
    bucket: String,
    objects: RwLock<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryObjectStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Content type recorded for a key.
    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().await.get(key).map(|(_, ct)| ct.clone())
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ensure_bucket(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn upload(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, GatewayError> {
        let size = data.len() as u64;
        self.objects
            .write()
            .await
            .insert(key.to_string(), (data, content_type.to_string()));
        Ok(StoredObject {
            key: key.to_string(),
            url: self.public_url(key),
            size,
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, GatewayError> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| GatewayError::DownloadFailed(format!("object not found: {key}")))
    }

    async fn delete(&self, key: &str) -> Result<(), GatewayError> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn presign(&self, key: &str, ttl: Duration) -> Result<String, GatewayError> {
        Ok(format!("{}?expires={}", self.public_url(key), ttl.as_secs()))
    }

    fn public_url(&self, key: &str) -> String {
        format!("memory://{}/{key}", self.bucket)
    }
}
