//! Filesystem-backed object store
//!
//! Objects live under a root directory with a sidecar `.ctype` file for
//! the content type. Suitable for single-node deployments and tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::{ObjectBody, ObjectStat, ObjectStore, StorageError};

pub struct FsObjectStore {
    root: PathBuf,
    internal_host: Option<String>,
    external_host: Option<String>,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            internal_host: None,
            external_host: None,
        }
    }

    pub fn with_hosts(
        mut self,
        internal: Option<String>,
        external: Option<String>,
    ) -> Self {
        self.internal_host = internal;
        self.external_host = external;
        self
    }

    pub fn from_config(cfg: &transcribe_config::StorageConfig) -> Self {
        Self::new(&cfg.bucket).with_hosts(cfg.internal_host.clone(), cfg.external_host.clone())
    }

    fn object_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        // Reject traversal; object names are forward-slash keys
        if name.is_empty() || name.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    fn ctype_path(path: &Path) -> PathBuf {
        let mut p = path.as_os_str().to_owned();
        p.push(".ctype");
        PathBuf::from(p)
    }

    async fn read_content_type(path: &Path) -> Option<String> {
        tokio::fs::read_to_string(Self::ctype_path(path)).await.ok()
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(
        &self,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let path = self.object_path(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;
        tokio::fs::write(Self::ctype_path(&path), content_type).await?;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<ObjectBody, StorageError> {
        let path = self.object_path(name)?;
        let data = match tokio::fs::read(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(name.to_string()))
            },
            Err(e) => return Err(e.into()),
        };
        let size = data.len() as u64;
        Ok(ObjectBody {
            data: Bytes::from(data),
            size,
            content_type: Self::read_content_type(&path).await,
        })
    }

    async fn get_range(
        &self,
        name: &str,
        start: u64,
        length: u64,
    ) -> Result<Bytes, StorageError> {
        let path = self.object_path(name)?;
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(name.to_string()))
            },
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; length as usize];
        let mut read = 0;
        while read < buf.len() {
            let n = file.read(&mut buf[read..]).await?;
            if n == 0 {
                break;
            }
            read += n;
        }
        buf.truncate(read);
        Ok(Bytes::from(buf))
    }

    async fn stat(&self, name: &str) -> Result<ObjectStat, StorageError> {
        let path = self.object_path(name)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(name.to_string()))
            },
            Err(e) => return Err(e.into()),
        };
        Ok(ObjectStat {
            size: meta.len(),
            content_type: Self::read_content_type(&path).await,
        })
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        let path = self.object_path(name)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let path = self.object_path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => return Err(e.into()),
        }
        let _ = tokio::fs::remove_file(Self::ctype_path(&path)).await;
        Ok(())
    }

    fn presigned_url(&self, name: &str, expires_secs: u64) -> String {
        let url = format!(
            "file://{}?expires={}",
            self.root.join(name).display(),
            expires_secs
        );
        match (&self.internal_host, &self.external_host) {
            (Some(internal), Some(external)) => {
                crate::rewrite_presigned_host(&url, internal, external)
            },
            _ => url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ByteRange;

    async fn store() -> (tempfile::TempDir, FsObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let (_dir, store) = store().await;
        store
            .put("uploads/a.wav", Bytes::from_static(b"RIFFdata"), "audio/wav")
            .await
            .unwrap();

        let body = store.get("uploads/a.wav").await.unwrap();
        assert_eq!(&body.data[..], b"RIFFdata");
        assert_eq!(body.size, 8);
        assert_eq!(body.content_type.as_deref(), Some("audio/wav"));
        assert!(store.exists("uploads/a.wav").await.unwrap());
    }

    #[tokio::test]
    async fn range_reads_follow_resolved_offsets() {
        let (_dir, store) = store().await;
        store
            .put("blob", Bytes::from_static(b"0123456789"), "application/octet-stream")
            .await
            .unwrap();

        let stat = store.stat("blob").await.unwrap();
        let (start, len) = ByteRange::parse("bytes=2-5").unwrap().resolve(stat.size);
        let chunk = store.get_range("blob", start, len).await.unwrap();
        assert_eq!(&chunk[..], b"2345");

        let (start, len) = ByteRange::parse("bytes=-3").unwrap().resolve(stat.size);
        let chunk = store.get_range("blob", start, len).await.unwrap();
        assert_eq!(&chunk[..], b"789");
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let (_dir, store) = store().await;
        assert!(matches!(
            store.get("nope").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(!store.exists("nope").await.unwrap());
        // deleting a missing object is fine
        store.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn traversal_names_rejected() {
        let (_dir, store) = store().await;
        assert!(matches!(
            store.get("../etc/passwd").await,
            Err(StorageError::InvalidName(_))
        ));
    }
}
