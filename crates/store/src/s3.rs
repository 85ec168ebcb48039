//! S3-compatible backend built on `aws-sdk-s3`.
//!
//! Uses path-style addressing against an explicit endpoint and the
//! temporary credential set issued by the identity provider. Uploads
//! larger than the configured part size go through a sequential
//! multipart upload that is aborted on failure or cancellation.

use std::path::Path;
use std::sync::Arc;

use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials as S3Credentials, Region};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration,
};
use mcbridge_credentials::Credentials;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    DEFAULT_PART_SIZE, DEFAULT_REGION, ObjectInfo, ObjectStore, ProgressFn, StoreError,
    StoreFactory, StoreFuture,
};

const CREDENTIAL_SOURCE: &str = "mcbridge-sts";

/// S3 rejects multipart uploads with more parts than this.
const MAX_PARTS: u64 = 10_000;

/// Part size for an upload of `size` bytes: the configured size, grown
/// just enough to stay within [`MAX_PARTS`].
fn part_size_for(configured: u64, size: u64) -> u64 {
    configured.max(size.div_ceil(MAX_PARTS))
}

/// Connection options shared by every S3 client the factory builds.
#[derive(Debug, Clone)]
pub struct S3Options {
    pub region: String,
    pub part_size: u64,
}

impl Default for S3Options {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            part_size: DEFAULT_PART_SIZE,
        }
    }
}

/// Extracts the S3 error code and message from an SDK error.
///
/// Service errors carry the S3 code (e.g. `AccessDenied`); transport
/// errors report `N/A` and the full error text.
fn extract_sdk_error_details<E: std::fmt::Display + ProvideErrorMetadata>(
    e: &SdkError<E>,
) -> (String, String) {
    if let Some(service_err) = e.as_service_error() {
        (
            service_err.code().unwrap_or("unknown").to_string(),
            service_err.message().unwrap_or("no message").to_string(),
        )
    } else {
        ("N/A".to_string(), e.to_string())
    }
}

fn backend_error<E: std::fmt::Display + ProvideErrorMetadata>(
    operation: &'static str,
    bucket: &str,
    key: &str,
    e: &SdkError<E>,
) -> StoreError {
    let (code, message) = extract_sdk_error_details(e);
    error!(
        bucket,
        key,
        s3_error_code = %code,
        s3_error_message = %message,
        "S3 {operation} failed"
    );
    StoreError::Backend {
        operation,
        code,
        message,
    }
}

/// Object store client for one S3 endpoint.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    part_size: u64,
}

impl S3ObjectStore {
    pub fn new(endpoint: &str, credentials: &Credentials, options: &S3Options) -> Self {
        let creds = S3Credentials::new(
            credentials.access_key.clone(),
            credentials.secret_key.clone(),
            Some(credentials.session_token.clone()),
            None,
            CREDENTIAL_SOURCE,
        );
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(options.region.clone()))
            .endpoint_url(endpoint)
            .credentials_provider(creds)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(config),
            part_size: options.part_size.max(1),
        }
    }

    async fn head_bucket(&self, bucket: &str) -> Result<bool, StoreError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(backend_error("HeadBucket", bucket, "", &e)),
        }
    }

    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<(), StoreError> {
        let mut req = self.client.create_bucket().bucket(bucket);
        if region != DEFAULT_REGION {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }
        req.send()
            .await
            .map_err(|e| backend_error("CreateBucket", bucket, "", &e))?;
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectInfo>, StoreError> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(out) => Ok(Some(ObjectInfo {
                key: key.to_string(),
                size: out.content_length().unwrap_or(0).max(0) as u64,
            })),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(None),
            Err(e) => Err(backend_error("HeadObject", bucket, key, &e)),
        }
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError> {
        let mut objects = Vec::new();
        let mut continuation_token = None;
        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| backend_error("ListObjectsV2", bucket, prefix, &e))?;

            for object in output.contents() {
                if let Some(key) = object.key() {
                    objects.push(ObjectInfo {
                        key: key.to_string(),
                        size: object.size().unwrap_or(0).max(0) as u64,
                    });
                }
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }
        Ok(objects)
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        let mut file = tokio::fs::File::open(source).await?;
        let size = file.metadata().await?.len();

        if size <= self.part_size {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            let mut buf = Vec::with_capacity(size as usize);
            file.read_to_end(&mut buf).await?;
            let sent = buf.len() as u64;
            self.client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(ByteStream::from(buf))
                .send()
                .await
                .map_err(|e| backend_error("PutObject", bucket, key, &e))?;
            progress(sent);
            return Ok(sent);
        }

        let upload = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| backend_error("CreateMultipartUpload", bucket, key, &e))?;
        let upload_id = upload
            .upload_id()
            .ok_or_else(|| StoreError::Backend {
                operation: "CreateMultipartUpload",
                code: "N/A".into(),
                message: "response carried no upload id".into(),
            })?
            .to_string();

        let part_size = part_size_for(self.part_size, size);
        debug!(bucket, key, size, part_size, "multipart upload started");

        match self
            .upload_parts(bucket, key, &upload_id, &mut file, part_size, progress, cancel)
            .await
        {
            Ok(sent) => Ok(sent),
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(bucket, key, error = %abort_err, "failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        file: &mut tokio::fs::File,
        part_size: u64,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        let mut parts = Vec::new();
        let mut sent = 0u64;
        let mut part_number = 1i32;

        loop {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            let mut buf = Vec::new();
            (&mut *file).take(part_size).read_to_end(&mut buf).await?;
            if buf.is_empty() {
                break;
            }
            let len = buf.len() as u64;

            let out = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buf))
                .send()
                .await
                .map_err(|e| backend_error("UploadPart", bucket, key, &e))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(out.e_tag().map(String::from))
                    .part_number(part_number)
                    .build(),
            );
            sent += len;
            progress(len);
            part_number += 1;
        }

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| backend_error("CompleteMultipartUpload", bucket, key, &e))?;

        Ok(sent)
    }

    async fn get(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        let resp = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(resp) => resp,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Err(StoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                });
            }
            Err(e) => return Err(backend_error("GetObject", bucket, key, &e)),
        };

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut partial = dest.as_os_str().to_owned();
        partial.push(".mcbridge-part");
        let partial = std::path::PathBuf::from(partial);

        let mut body = resp.body;
        let mut writer = tokio::fs::File::create(&partial).await?;
        let result: Result<u64, StoreError> = async {
            let mut received = 0u64;
            loop {
                if cancel.is_cancelled() {
                    return Err(StoreError::Cancelled);
                }
                let Some(chunk) = body.next().await else {
                    break;
                };
                let chunk = chunk.map_err(|e| StoreError::Backend {
                    operation: "GetObject",
                    code: "N/A".into(),
                    message: e.to_string(),
                })?;
                writer.write_all(&chunk).await?;
                received += chunk.len() as u64;
                progress(chunk.len() as u64);
            }
            writer.flush().await?;
            Ok(received)
        }
        .await;
        drop(writer);

        match result {
            Ok(received) => {
                tokio::fs::rename(&partial, dest).await?;
                Ok(received)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(e)
            }
        }
    }
}

impl ObjectStore for S3ObjectStore {
    fn bucket_exists<'a>(&'a self, bucket: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(self.head_bucket(bucket))
    }

    fn make_bucket<'a>(&'a self, bucket: &'a str, region: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(self.create_bucket(bucket, region))
    }

    fn stat_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> StoreFuture<'a, Option<ObjectInfo>> {
        Box::pin(self.head_object(bucket, key))
    }

    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
    ) -> StoreFuture<'a, Vec<ObjectInfo>> {
        Box::pin(self.list(bucket, prefix))
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

/// Builds [`S3ObjectStore`] clients with shared options.
#[derive(Debug, Clone, Default)]
pub struct S3StoreFactory {
    options: S3Options,
}

impl S3StoreFactory {
    pub fn new(options: S3Options) -> Self {
        Self { options }
    }
}

impl StoreFactory for S3StoreFactory {
    fn connect(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ObjectStore>, StoreError> {
        Ok(Arc::new(S3ObjectStore::new(endpoint, credentials, &self.options)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            access_key: "AK".into(),
            secret_key: "SK".into(),
            session_token: "TOKEN".into(),
        }
    }

    #[test]
    fn default_options() {
        let opts = S3Options::default();
        assert_eq!(opts.region, "us-east-1");
        assert_eq!(opts.part_size, 16 * 1024 * 1024);
    }

    #[tokio::test]
    async fn client_uses_configured_region() {
        let opts = S3Options {
            region: "eu-central-1".into(),
            ..S3Options::default()
        };
        let store = S3ObjectStore::new("http://127.0.0.1:9000", &creds(), &opts);
        let region = store.client.config().region().map(|r| r.as_ref().to_string());
        assert_eq!(region.as_deref(), Some("eu-central-1"));
    }

    #[tokio::test]
    async fn zero_part_size_is_clamped() {
        let opts = S3Options {
            part_size: 0,
            ..S3Options::default()
        };
        let store = S3ObjectStore::new("http://127.0.0.1:9000", &creds(), &opts);
        assert_eq!(store.part_size, 1);
    }

    #[test]
    fn part_size_grows_for_huge_objects() {
        const MIB: u64 = 1024 * 1024;
        assert_eq!(part_size_for(16 * MIB, 100 * MIB), 16 * MIB);
        assert_eq!(part_size_for(16 * MIB, 16 * MIB * MAX_PARTS), 16 * MIB);

        let size = 16 * MIB * MAX_PARTS + 1;
        let part = part_size_for(16 * MIB, size);
        assert!(part > 16 * MIB);
        assert!(size.div_ceil(part) <= MAX_PARTS);
    }
}
