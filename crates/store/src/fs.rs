//! Local filesystem backend.
//!
//! Buckets are directories directly under the root; object keys map to
//! relative paths inside them. Writes land in a sibling temp file and are
//! renamed into place, so a cancelled or failed copy leaves nothing behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mcbridge_credentials::Credentials;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::scan::scan_files;
use crate::validation::validate_object_key;
use crate::{ObjectInfo, ObjectStore, ProgressFn, StoreError, StoreFactory, StoreFuture};

const COPY_CHUNK_SIZE: usize = 256 * 1024;
const PARTIAL_SUFFIX: &str = ".mcbridge-part";

/// Object store backed by a local directory tree.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StoreError> {
        if bucket.contains('/') || bucket.contains('\\') {
            return Err(StoreError::InvalidKey(format!("invalid bucket name: {bucket}")));
        }
        validate_object_key(bucket)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        validate_object_key(key)?;
        Ok(self.bucket_dir(bucket)?.join(key))
    }

    fn existing_bucket(&self, bucket: &str) -> Result<PathBuf, StoreError> {
        let dir = self.bucket_dir(bucket)?;
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(StoreError::NoSuchBucket(bucket.to_string()))
        }
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        self.existing_bucket(bucket)?;
        let dest = self.object_path(bucket, key)?;
        let mut reader = tokio::fs::File::open(source).await?;
        let bytes = write_atomically(&mut reader, &dest, progress, cancel).await?;
        debug!(bucket, key, bytes, "stored object");
        Ok(bytes)
    }

    async fn get(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        self.existing_bucket(bucket)?;
        let src = self.object_path(bucket, key)?;
        if !src.is_file() {
            return Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        let mut reader = tokio::fs::File::open(&src).await?;
        write_atomically(&mut reader, dest, progress, cancel).await
    }
}

impl ObjectStore for FsObjectStore {
    fn bucket_exists<'a>(&'a self, bucket: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.bucket_dir(bucket)?.is_dir()) })
    }

    fn make_bucket<'a>(&'a self, bucket: &'a str, _region: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let dir = self.bucket_dir(bucket)?;
            tokio::fs::create_dir_all(&self.root).await?;
            match tokio::fs::create_dir(&dir).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    Err(StoreError::Backend {
                        operation: "make_bucket",
                        code: "BucketAlreadyOwnedByYou".into(),
                        message: format!("bucket {bucket} already exists"),
                    })
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn stat_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> StoreFuture<'a, Option<ObjectInfo>> {
        Box::pin(async move {
            let path = self.object_path(bucket, key)?;
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => Ok(Some(ObjectInfo {
                    key: key.to_string(),
                    size: meta.len(),
                })),
                Ok(_) => Ok(None),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
    ) -> StoreFuture<'a, Vec<ObjectInfo>> {
        Box::pin(async move {
            let dir = self.existing_bucket(bucket)?;
            let objects = scan_files(&dir)?
                .into_iter()
                .filter(|f| f.relative_path.starts_with(prefix))
                .filter(|f| !f.relative_path.ends_with(PARTIAL_SUFFIX))
                .map(|f| ObjectInfo {
                    key: f.relative_path,
                    size: f.size,
                })
                .collect();
            Ok(objects)
        })
    }

    fn put_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        source: &'a Path,
        progress: ProgressFn<'a>,
        cancel: &'a CancellationToken,
    ) -> StoreFuture<'a, u64> {
        Box::pin(self.put(bucket, key, source, progress, cancel))
    }

    fn get_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        dest: &'a Path,
        progress: ProgressFn<'a>,
        cancel: &'a CancellationToken,
    ) -> StoreFuture<'a, u64> {
        Box::pin(self.get(bucket, key, dest, progress, cancel))
    }
}

/// Copies `reader` into `dest` through a temp file, renaming on success.
pub(crate) async fn write_atomically<R>(
    reader: &mut R,
    dest: &Path,
    progress: ProgressFn<'_>,
    cancel: &CancellationToken,
) -> Result<u64, StoreError>
where
    R: AsyncRead + Unpin,
{
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut partial = dest.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);

    let mut writer = tokio::fs::File::create(&partial).await?;
    let result = copy_with_progress(reader, &mut writer, progress, cancel).await;
    drop(writer);

    match result {
        Ok(bytes) => {
            tokio::fs::rename(&partial, dest).await?;
            Ok(bytes)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            Err(e)
        }
    }
}

async fn copy_with_progress<R, W>(
    reader: &mut R,
    writer: &mut W,
    progress: ProgressFn<'_>,
    cancel: &CancellationToken,
) -> Result<u64, StoreError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
        progress(n as u64);
    }
    writer.flush().await?;
    Ok(total)
}

/// Factory returning [`FsObjectStore`]s rooted at one directory,
/// regardless of endpoint or credentials.
#[derive(Debug, Clone)]
pub struct FsStoreFactory {
    root: PathBuf,
}

impl FsStoreFactory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl StoreFactory for FsStoreFactory {
    fn connect(
        &self,
        _endpoint: &str,
        _credentials: &Credentials,
    ) -> Result<Arc<dyn ObjectStore>, StoreError> {
        Ok(Arc::new(FsObjectStore::new(self.root.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn store() -> (tempfile::TempDir, FsObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path().join("data"));
        (dir, store)
    }

    #[tokio::test]
    async fn make_bucket_then_exists() {
        let (_dir, store) = store();
        assert!(!store.bucket_exists("render-user").await.unwrap());
        store.make_bucket("render-user", "us-east-1").await.unwrap();
        assert!(store.bucket_exists("render-user").await.unwrap());
    }

    #[tokio::test]
    async fn make_bucket_twice_is_backend_error() {
        let (_dir, store) = store();
        store.make_bucket("b", "us-east-1").await.unwrap();
        let err = store.make_bucket("b", "us-east-1").await.unwrap_err();
        assert!(matches!(err, StoreError::Backend { .. }));
    }

    #[tokio::test]
    async fn put_get_round_trip_reports_progress() {
        let (dir, store) = store();
        store.make_bucket("b", "us-east-1").await.unwrap();
        let src = dir.path().join("a.bin");
        std::fs::write(&src, vec![7u8; 100]).unwrap();

        let seen = AtomicU64::new(0);
        let progress = |n: u64| {
            seen.fetch_add(n, Ordering::SeqCst);
        };
        let cancel = CancellationToken::new();

        let sent = store
            .put_object("b", "jobs/a.bin", &src, &progress, &cancel)
            .await
            .unwrap();
        assert_eq!(sent, 100);
        assert_eq!(seen.load(Ordering::SeqCst), 100);

        let info = store.stat_object("b", "jobs/a.bin").await.unwrap().unwrap();
        assert_eq!(info.size, 100);

        let dest = dir.path().join("out").join("a.bin");
        let got = store
            .get_object("b", "jobs/a.bin", &dest, &progress, &cancel)
            .await
            .unwrap();
        assert_eq!(got, 100);
        assert_eq!(std::fs::read(&dest).unwrap(), vec![7u8; 100]);
    }

    #[tokio::test]
    async fn put_into_missing_bucket_fails() {
        let (dir, store) = store();
        let src = dir.path().join("a.bin");
        std::fs::write(&src, b"x").unwrap();
        let err = store
            .put_object("nope", "a.bin", &src, &|_| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NoSuchBucket(_)));
    }

    #[tokio::test]
    async fn cancelled_put_leaves_nothing() {
        let (dir, store) = store();
        store.make_bucket("b", "us-east-1").await.unwrap();
        let src = dir.path().join("a.bin");
        std::fs::write(&src, b"payload").unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = store
            .put_object("b", "a.bin", &src, &|_| {}, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
        assert!(store.stat_object("b", "a.bin").await.unwrap().is_none());
        assert!(store.list_objects("b", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_missing_object_is_not_found() {
        let (dir, store) = store();
        store.make_bucket("b", "us-east-1").await.unwrap();
        let err = store
            .get_object(
                "b",
                "missing.bin",
                &dir.path().join("x"),
                &|_| {},
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let (dir, store) = store();
        store.make_bucket("b", "us-east-1").await.unwrap();
        let src = dir.path().join("f");
        std::fs::write(&src, b"123").unwrap();
        let cancel = CancellationToken::new();
        for key in ["job/a", "job/sub/b", "other/c"] {
            store.put_object("b", key, &src, &|_| {}, &cancel).await.unwrap();
        }

        let keys: Vec<String> = store
            .list_objects("b", "job/")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, ["job/a", "job/sub/b"]);
    }

    #[tokio::test]
    async fn rejects_traversal_keys() {
        let (_dir, store) = store();
        store.make_bucket("b", "us-east-1").await.unwrap();
        let err = store.stat_object("b", "../escape").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }
}
