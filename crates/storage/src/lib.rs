//! Object storage for media blobs and derived artifacts
//!
//! The pipeline only depends on the [`ObjectStore`] trait: put/get/stat/
//! range-get/delete/exists plus presigned-URL generation. The bundled
//! filesystem backend covers single-node deployments and tests; an
//! S3-compatible backend implements the same trait without touching
//! callers.

pub mod fs_store;
pub mod range;

pub use fs_store::FsObjectStore;
pub use range::ByteRange;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid object name: {0}")]
    InvalidName(String),
}

/// Metadata returned by `stat`
#[derive(Debug, Clone)]
pub struct ObjectStat {
    pub size: u64,
    pub content_type: Option<String>,
}

/// A retrieved object with its facts
#[derive(Debug)]
pub struct ObjectBody {
    pub data: Bytes,
    pub size: u64,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object, overwriting any previous version
    async fn put(&self, name: &str, data: Bytes, content_type: &str)
        -> Result<(), StorageError>;

    /// Fetch a whole object
    async fn get(&self, name: &str) -> Result<ObjectBody, StorageError>;

    /// Fetch a byte range. The range has already been resolved against the
    /// object size via [`ByteRange::resolve`].
    async fn get_range(&self, name: &str, start: u64, length: u64)
        -> Result<Bytes, StorageError>;

    async fn stat(&self, name: &str) -> Result<ObjectStat, StorageError>;

    async fn exists(&self, name: &str) -> Result<bool, StorageError>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, name: &str) -> Result<(), StorageError>;

    /// Presigned download URL. Implementations rewrite internal hosts to
    /// the externally visible host when one is configured.
    fn presigned_url(&self, name: &str, expires_secs: u64) -> String;
}

/// Rewrite an internal endpoint host to the externally visible one.
/// Presigned URLs are produced against the internal endpoint; clients
/// outside the network need the public host substituted.
pub fn rewrite_presigned_host(url: &str, internal: &str, external: &str) -> String {
    url.replacen(internal, external, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_rewrite_replaces_only_the_endpoint() {
        let url = "http://minio:9000/media/abc?X-Amz-Expires=3600";
        assert_eq!(
            rewrite_presigned_host(url, "minio:9000", "media.example.com"),
            "http://media.example.com/media/abc?X-Amz-Expires=3600"
        );
    }
}
