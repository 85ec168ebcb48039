//! Transfer descriptor producer.
//!
//! Resolves each source/destination pair of a [`TransferRequest`] into
//! per-object [`TransferDescriptor`]s and streams them over a bounded
//! channel. The first resolution failure is sent as the final item and
//! ends the stream. Cancellation closes the channel without sending
//! anything further.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mcbridge_protocol::TransferMode;
use mcbridge_store::{ObjectStore, StoreError, scan_files, validate_object_key};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::progress::ProgressReader;
use crate::types::{
    DescriptorResult, MarkerLocation, RECURSIVE_SUFFIX, ResolveError, TransferDescriptor,
    TransferRequest,
};

/// Capacity of the descriptor channel between producer and consumer.
pub const CHANNEL_CAPACITY: usize = 10_000;

/// Spawns the producer task and returns the receiving end of its channel.
///
/// Each descriptor's size is added to `progress`'s total before it is sent.
pub fn spawn_producer(
    request: TransferRequest,
    store: Arc<dyn ObjectStore>,
    progress: Arc<dyn ProgressReader>,
    cancel: CancellationToken,
) -> (mpsc::Receiver<DescriptorResult>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let handle = tokio::spawn(async move {
        let producer = Producer {
            request: &request,
            store: store.as_ref(),
            progress: progress.as_ref(),
            tx: &tx,
            cancel: &cancel,
        };
        producer.run().await;
    });
    (rx, handle)
}

struct Producer<'a> {
    request: &'a TransferRequest,
    store: &'a dyn ObjectStore,
    progress: &'a dyn ProgressReader,
    tx: &'a mpsc::Sender<DescriptorResult>,
    cancel: &'a CancellationToken,
}

/// Why the producer stopped early.
enum Stop {
    Closed,
    Failed(ResolveError),
}

impl From<ResolveError> for Stop {
    fn from(e: ResolveError) -> Self {
        Stop::Failed(e)
    }
}

impl Producer<'_> {
    async fn run(&self) {
        for (source, destination) in &self.request.pairs {
            if self.cancel.is_cancelled() {
                debug!("producer cancelled");
                return;
            }
            let result = match self.request.mode {
                TransferMode::Put => self.resolve_put(source, destination).await,
                TransferMode::Get => self.resolve_get(source, destination).await,
            };
            match result {
                Ok(()) => {}
                Err(Stop::Closed) => return,
                Err(Stop::Failed(e)) => {
                    warn!(source = %source, error = %e, "source resolution failed");
                    let _ = self.send(Err(e)).await;
                    return;
                }
            }
        }
    }

    /// Sends one item, giving up if the session is cancelled or the
    /// consumer went away. A descriptor's size joins the total only once
    /// its channel slot is secured.
    async fn send(&self, item: DescriptorResult) -> Result<(), Stop> {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Stop::Closed),
            permit = self.tx.reserve() => permit.map_err(|_| Stop::Closed)?,
        };
        if let Ok(d) = &item {
            self.progress.add_total(d.size);
        }
        permit.send(item);
        Ok(())
    }

    /// Runs a resolution step unless the session is cancelled first.
    async fn until_cancelled<T>(&self, step: impl Future<Output = T>) -> Result<T, Stop> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Stop::Closed),
            out = step => Ok(out),
        }
    }

    async fn resolve_put(&self, source: &str, destination: &str) -> Result<(), Stop> {
        let (path_str, recursive) = split_recursive(source);
        let path = PathBuf::from(path_str);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| io_to_resolve(source, e))?;

        if meta.is_dir() {
            if !recursive {
                return Err(ResolveError::IsFolder(source.to_string()).into());
            }
            let root = path.clone();
            let files = self
                .until_cancelled(tokio::task::spawn_blocking(move || scan_files(&root)))
                .await?
                .map_err(|e| ResolveError::Other {
                    source_path: source.to_string(),
                    message: e.to_string(),
                })?
                .map_err(|e| io_to_resolve(source, e))?;

            for file in files {
                let key = join_key(destination, &file.relative_path);
                let descriptor = self.put_descriptor(&file.path, &key, file.size).await?;
                self.send(Ok(descriptor)).await?;
            }
            return Ok(());
        }

        let key = if destination.is_empty() || destination.ends_with('/') {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            join_key(destination, &name)
        } else {
            destination.to_string()
        };
        let descriptor = self.put_descriptor(&path, &key, meta.len()).await?;
        self.send(Ok(descriptor)).await
    }

    async fn put_descriptor(
        &self,
        local: &Path,
        key: &str,
        size: u64,
    ) -> Result<TransferDescriptor, ResolveError> {
        tokio::fs::File::open(local)
            .await
            .map_err(|e| io_to_resolve(&local.display().to_string(), e))?;

        let full_key = self.full_key(key)?;
        let marker_base = match &self.request.upload_markers {
            MarkerLocation::BesideLocal => local.to_path_buf(),
            MarkerLocation::Directory(dir) => local_join(dir, key),
        };
        Ok(TransferDescriptor {
            mode: TransferMode::Put,
            local: local.to_path_buf(),
            bucket: self.request.bucket.clone(),
            key: full_key,
            size,
            marker_base,
        })
    }

    async fn resolve_get(&self, source: &str, destination: &str) -> Result<(), Stop> {
        let (key, recursive) = split_recursive(source);
        let bucket = self.request.bucket.as_str();

        if recursive {
            let prefix = join_key(&self.request.key_prefix, key.trim_end_matches('/'));
            let objects = self
                .until_cancelled(self.store.list_objects(bucket, &prefix))
                .await?
                .map_err(|e| store_to_resolve(source, e))?;
            let dest_dir = PathBuf::from(destination);
            let mut found = false;
            for object in objects {
                // Folder placeholders carry no data.
                if object.key.ends_with('/') {
                    continue;
                }
                let Some(rel) = relative_key(&prefix, &object.key) else {
                    continue;
                };
                found = true;
                validate_object_key(rel)
                    .map_err(|_| ResolveError::InvalidKey(object.key.clone()))?;
                let local = local_join(&dest_dir, rel);
                self.send(Ok(get_descriptor(bucket, object.key.clone(), local, object.size)))
                    .await?;
            }
            if !found {
                return Err(ResolveError::NotFound(source.to_string()).into());
            }
            return Ok(());
        }

        let full_key = self.full_key(key)?;
        let info = self
            .until_cancelled(self.store.stat_object(bucket, &full_key))
            .await?
            .map_err(|e| store_to_resolve(source, e))?;

        let Some(info) = info else {
            let folder = format!("{full_key}/");
            let children = self
                .until_cancelled(self.store.list_objects(bucket, &folder))
                .await?
                .map_err(|e| store_to_resolve(source, e))?;
            return Err(if children.is_empty() {
                ResolveError::NotFound(source.to_string())
            } else {
                ResolveError::IsFolder(source.to_string())
            }
            .into());
        };

        let dest = PathBuf::from(destination);
        let local = if destination.ends_with('/') || destination.ends_with('\\') || dest.is_dir() {
            dest.join(base_name(&full_key))
        } else {
            dest
        };
        self.send(Ok(get_descriptor(bucket, full_key, local, info.size)))
            .await
    }

    fn full_key(&self, key: &str) -> Result<String, ResolveError> {
        let full = join_key(&self.request.key_prefix, key);
        validate_object_key(&full).map_err(|_| ResolveError::InvalidKey(full.clone()))?;
        Ok(full)
    }
}

fn get_descriptor(bucket: &str, key: String, local: PathBuf, size: u64) -> TransferDescriptor {
    TransferDescriptor {
        mode: TransferMode::Get,
        marker_base: local.clone(),
        local,
        bucket: bucket.to_string(),
        key,
        size,
    }
}

/// Strips a trailing `...` and reports whether it was present.
fn split_recursive(source: &str) -> (&str, bool) {
    match source.strip_suffix(RECURSIVE_SUFFIX) {
        Some(stripped) => (stripped, true),
        None => (source, false),
    }
}

/// Joins key segments with single slashes, dropping leading slashes.
fn join_key(prefix: &str, key: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let key = key.trim_start_matches('/');
    match (prefix.is_empty(), key.is_empty()) {
        (true, _) => key.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}/{key}"),
    }
}

/// Returns the part of `key` below `prefix`, treating `prefix` as a whole
/// path segment: `jobs/frames` covers `jobs/frames/a` but not
/// `jobs/frames-old/a`. A key equal to the prefix yields its base name.
fn relative_key<'k>(prefix: &str, key: &'k str) -> Option<&'k str> {
    if prefix.is_empty() {
        return Some(key);
    }
    let rest = key.strip_prefix(prefix)?;
    if rest.is_empty() {
        return Some(base_name(key));
    }
    rest.strip_prefix('/').filter(|r| !r.is_empty())
}

fn base_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Appends a `/`-separated relative key to a local directory.
fn local_join(dir: &Path, rel: &str) -> PathBuf {
    let mut path = dir.to_path_buf();
    for segment in rel.split('/').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    path
}

fn io_to_resolve(source: &str, e: std::io::Error) -> ResolveError {
    match e.kind() {
        std::io::ErrorKind::NotFound => ResolveError::NotFound(source.to_string()),
        std::io::ErrorKind::PermissionDenied => ResolveError::PermissionDenied(source.to_string()),
        _ => ResolveError::Other {
            source_path: source.to_string(),
            message: e.to_string(),
        },
    }
}

fn store_to_resolve(source: &str, e: StoreError) -> ResolveError {
    match e {
        StoreError::NotFound { .. } | StoreError::NoSuchBucket(_) => {
            ResolveError::NotFound(source.to_string())
        }
        StoreError::InvalidKey(key) => ResolveError::InvalidKey(key),
        other => ResolveError::Other {
            source_path: source.to_string(),
            message: other.to_string(),
        },
    }
}
