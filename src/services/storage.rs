use std::collections::HashMap;

use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Content-addressable blob storage for videos and results documents.
///
/// Keys are opaque to callers; use [`video_key`] and [`results_key`] to
/// build them. Presigned URLs let clients upload/download directly
/// without the payload passing through the API process.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Time-limited URL a client can PUT an object to.
    async fn presign_put(&self, key: &str, expires_secs: u32) -> Result<String, StorageError>;

    /// Time-limited URL a client can GET an object from.
    async fn presign_get(&self, key: &str, expires_secs: u32) -> Result<String, StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("stored document is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("storage configuration error: {0}")]
    Config(String),
}

/// Serialize a value and store it as one JSON object.
pub async fn put_json<T: Serialize>(
    store: &dyn BlobStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let body = serde_json::to_vec(value)?;
    store.put(key, &body, "application/json").await
}

/// Fetch and parse a JSON object. A missing key is `None`; a present
/// but unparseable document is an explicit error, never `None`.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn BlobStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(key).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(StorageError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Blob key for an uploaded video: stable per-job prefix, randomized
/// object name to avoid collisions, original extension preserved.
pub fn video_key(job_id: Uuid, filename: &str) -> String {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| format!(".{ext}"))
        .unwrap_or_else(|| ".mp4".to_string());
    format!("videos/{job_id}/{}{ext}", Uuid::new_v4().simple())
}

/// Deterministic blob key for a job's results document.
pub fn results_key(job_id: Uuid) -> String {
    format!("results/{job_id}.json")
}

/// Client for Cloudflare R2 object storage (S3-compatible).
pub struct R2Client {
    bucket: Box<Bucket>,
}

impl R2Client {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }
}

#[async_trait]
impl BlobStore for R2Client {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        self.bucket
            .put_object_with_content_type(key, data, content_type)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        match self.bucket.get_object(key).await {
            Ok(response) if response.status_code() == 404 => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Ok(response) => Ok(response.to_vec()),
            Err(s3::error::S3Error::HttpFailWithBody(404, _)) => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn presign_put(&self, key: &str, expires_secs: u32) -> Result<String, StorageError> {
        Ok(self.bucket.presign_put(key, expires_secs, None, None).await?)
    }

    async fn presign_get(&self, key: &str, expires_secs: u32) -> Result<String, StorageError> {
        Ok(self.bucket.presign_get(key, expires_secs, None).await?)
    }
}

/// In-process blob store for tests and single-node deployments where
/// no object storage is configured.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: &[u8], _content_type: &str) -> Result<(), StorageError> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn presign_put(&self, key: &str, _expires_secs: u32) -> Result<String, StorageError> {
        Ok(format!("memory://{key}"))
    }

    async fn presign_get(&self, key: &str, _expires_secs: u32) -> Result<String, StorageError> {
        Ok(format!("memory://{key}"))
    }
}
