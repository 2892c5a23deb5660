//! The object storage seam and its backends.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;

/// Errors from the object storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend could not be constructed from its configuration.
    #[error("Storage configuration error: {0}")]
    Config(String),

    /// The upload itself failed.
    #[error("Storage upload failed: {0}")]
    Upload(String),
}

/// Write-side interface to an object store.
///
/// Implementations return the public URL of the stored object so the
/// caller can persist it alongside the storage path.
#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` at `path`, returning the object's public URL.
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> Result<String, StorageError>;
}

// ---------------------------------------------------------------------------
// S3 backend
// ---------------------------------------------------------------------------

/// Connection settings for the S3-compatible backend.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Endpoint URL, e.g. `https://s3.us-east-1.amazonaws.com` or a
    /// MinIO address in development.
    pub endpoint_url: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    /// Base URL objects are served from, e.g. a CDN domain. Object
    /// paths are appended directly to this.
    pub public_base_url: String,
}

/// S3-compatible object storage backend.
pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_base_url: String,
}

impl S3Storage {
    /// Build a client from static credentials and an explicit endpoint.
    pub async fn connect(config: S3Config) -> Result<Self, StorageError> {
        if config.bucket.is_empty() {
            return Err(StorageError::Config("bucket must not be empty".into()));
        }

        let credentials =
            Credentials::new(config.access_key, config.secret_key, None, None, "env");
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .load()
            .await;

        Ok(Self {
            client: aws_sdk_s3::Client::new(&sdk_config),
            bucket: config.bucket,
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl ObjectStorage for S3Storage {
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> Result<String, StorageError> {
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .cache_control(cache_control)
            .send()
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;

        tracing::debug!(path, size, content_type, "object stored");
        Ok(format!("{}/{}", self.public_base_url, path))
    }
}

// ---------------------------------------------------------------------------
// In-memory backend (tests)
// ---------------------------------------------------------------------------

/// In-memory storage for tests. Records every stored object and can be
/// switched into a failing mode to exercise upload-failure paths.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
    fail_uploads: Mutex<bool>,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub cache_control: String,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail.
    pub fn fail_uploads(&self, fail: bool) {
        *self.fail_uploads.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    pub fn get(&self, path: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait::async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> Result<String, StorageError> {
        if *self.fail_uploads.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(StorageError::Upload("simulated upload failure".into()));
        }
        self.objects.lock().unwrap_or_else(PoisonError::into_inner).insert(
            path.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
                cache_control: cache_control.to_string(),
            },
        );
        Ok(format!("memory://{path}"))
    }
}
