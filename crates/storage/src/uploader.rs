//! Uploads generation output using the platform path and content-type
//! conventions.

use std::sync::Arc;

use atelier_core::error::CoreError;
use atelier_core::object_path::{
    build_storage_path, content_type_for_extension, OUTPUT_CACHE_CONTROL,
};
use atelier_core::types::{DbId, Timestamp};

use crate::store::ObjectStorage;

/// Result of a successful upload: what to persist on the record.
#[derive(Debug, Clone)]
pub struct UploadedObject {
    pub public_url: String,
    pub storage_path: String,
}

/// Applies the path convention and content-type mapping on top of an
/// [`ObjectStorage`] backend.
#[derive(Clone)]
pub struct Uploader {
    storage: Arc<dyn ObjectStorage>,
}

impl Uploader {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self { storage }
    }

    /// Upload a generation's output bytes.
    ///
    /// Errors are surfaced to the caller so the record can be failed
    /// instead of being marked complete without a stored object.
    pub async fn upload(
        &self,
        owner_id: DbId,
        generation_id: DbId,
        bytes: Vec<u8>,
        extension: &str,
    ) -> Result<UploadedObject, CoreError> {
        self.upload_at(owner_id, generation_id, bytes, extension, chrono::Utc::now())
            .await
    }

    /// Like [`Uploader::upload`] with an explicit upload time.
    pub async fn upload_at(
        &self,
        owner_id: DbId,
        generation_id: DbId,
        bytes: Vec<u8>,
        extension: &str,
        uploaded_at: Timestamp,
    ) -> Result<UploadedObject, CoreError> {
        let storage_path = build_storage_path(owner_id, generation_id, uploaded_at, extension)?;
        let content_type = content_type_for_extension(extension);

        let public_url = self
            .storage
            .put(&storage_path, bytes, content_type, OUTPUT_CACHE_CONTROL)
            .await
            .map_err(|e| {
                tracing::error!(
                    generation_id,
                    path = %storage_path,
                    error = %e,
                    "output upload failed"
                );
                CoreError::Internal(format!("output upload failed: {e}"))
            })?;

        Ok(UploadedObject {
            public_url,
            storage_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStorage;
    use chrono::TimeZone;

    fn fixed_date() -> Timestamp {
        chrono::Utc.with_ymd_and_hms(2026, 8, 27, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn upload_stores_bytes_under_convention_path() {
        let storage = Arc::new(MemoryStorage::new());
        let uploader = Uploader::new(storage.clone());

        let uploaded = uploader
            .upload_at(42, 1001, vec![0xDE, 0xAD], "png", fixed_date())
            .await
            .unwrap();

        assert_eq!(uploaded.storage_path, "42/2026-08-27/1001.png");
        assert_eq!(uploaded.public_url, "memory://42/2026-08-27/1001.png");

        let object = storage.get("42/2026-08-27/1001.png").unwrap();
        assert_eq!(object.bytes, vec![0xDE, 0xAD]);
        assert_eq!(object.content_type, "image/png");
        assert_eq!(object.cache_control, OUTPUT_CACHE_CONTROL);
    }

    #[tokio::test]
    async fn unknown_extension_gets_fallback_content_type() {
        let storage = Arc::new(MemoryStorage::new());
        let uploader = Uploader::new(storage.clone());

        let uploaded = uploader
            .upload_at(1, 2, vec![1], "bin", fixed_date())
            .await
            .unwrap();

        let object = storage.get(&uploaded.storage_path).unwrap();
        assert_eq!(object.content_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn upload_failure_is_reported_and_nothing_is_stored() {
        let storage = Arc::new(MemoryStorage::new());
        storage.fail_uploads(true);
        let uploader = Uploader::new(storage.clone());

        let err = uploader
            .upload_at(1, 2, vec![1], "png", fixed_date())
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Internal(_)));
        assert_eq!(storage.object_count(), 0);
    }

    #[tokio::test]
    async fn invalid_extension_rejected_before_any_backend_call() {
        let storage = Arc::new(MemoryStorage::new());
        let uploader = Uploader::new(storage.clone());

        let err = uploader
            .upload_at(1, 2, vec![1], "../etc", fixed_date())
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(storage.object_count(), 0);
    }
}
