//! Object storage for generation output: the storage seam, the S3
//! backend, and the uploader that applies the platform path and
//! content-type conventions.

pub mod store;
pub mod uploader;

pub use store::{MemoryStorage, ObjectStorage, S3Config, S3Storage, StorageError};
pub use uploader::{Uploader, UploadedObject};
