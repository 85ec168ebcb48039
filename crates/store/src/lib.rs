//! Object-store seam used by the transfer pipeline.
//!
//! [`ObjectStore`] covers the handful of primitives the bridge needs:
//! bucket existence and creation, object stat and listing, and streamed
//! upload/download with a byte-progress callback and cooperative
//! cancellation. [`S3ObjectStore`] talks to an S3-compatible service;
//! [`FsObjectStore`] maps buckets onto local directories.

mod fs;
mod s3;
mod scan;
mod validation;

pub use fs::{FsObjectStore, FsStoreFactory};
pub use s3::{S3ObjectStore, S3Options, S3StoreFactory};
pub use scan::{ScannedFile, scan_files};
pub use validation::validate_object_key;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use mcbridge_credentials::Credentials;
use tokio_util::sync::CancellationToken;

/// Default multipart part size: 16 MiB.
pub const DEFAULT_PART_SIZE: u64 = 16 * 1024 * 1024;

/// Region used when creating buckets unless configured otherwise.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Errors produced by object-store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("bucket not found: {0}")]
    NoSuchBucket(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("{operation} failed: {code}: {message}")]
    Backend {
        operation: &'static str,
        code: String,
        message: String,
    },

    #[error("transfer cancelled")]
    Cancelled,
}

/// A boxed future returned by [`ObjectStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Callback invoked with the number of bytes moved since the last call.
pub type ProgressFn<'a> = &'a (dyn Fn(u64) + Send + Sync);

/// Metadata for one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

/// Abstract object-storage client.
///
/// Implementations must check `cancel` between chunks and return
/// [`StoreError::Cancelled`] once it fires, leaving no partial
/// destination behind.
pub trait ObjectStore: Send + Sync {
    fn bucket_exists<'a>(&'a self, bucket: &'a str) -> StoreFuture<'a, bool>;

    fn make_bucket<'a>(&'a self, bucket: &'a str, region: &'a str) -> StoreFuture<'a, ()>;

    /// Returns object metadata, or `None` when the key does not exist.
    fn stat_object<'a>(&'a self, bucket: &'a str, key: &'a str)
    -> StoreFuture<'a, Option<ObjectInfo>>;

    /// Lists every object under `prefix`, recursively, ordered by key.
    fn list_objects<'a>(&'a self, bucket: &'a str, prefix: &'a str)
    -> StoreFuture<'a, Vec<ObjectInfo>>;

    /// Uploads the local file at `source` and returns the bytes sent.
    fn put_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        source: &'a Path,
        progress: ProgressFn<'a>,
        cancel: &'a CancellationToken,
    ) -> StoreFuture<'a, u64>;

    /// Downloads an object into the local file at `dest` and returns the
    /// bytes received. Parent directories are created as needed.
    fn get_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        dest: &'a Path,
        progress: ProgressFn<'a>,
        cancel: &'a CancellationToken,
    ) -> StoreFuture<'a, u64>;
}

/// Builds a store client for one endpoint and credential set.
pub trait StoreFactory: Send + Sync {
    /// `endpoint` is a full URL such as `http://10.0.0.5:9000`.
    fn connect(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ObjectStore>, StoreError>;
}
