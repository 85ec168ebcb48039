//! Transfer executor: copies one descriptor and records its disposition.

use std::sync::Arc;

use mcbridge_protocol::TransferMode;
use mcbridge_store::{ObjectStore, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::marker;
use crate::progress::ProgressReader;
use crate::types::{Outcome, TransferDescriptor};

/// Per-session executor settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Skip objects already present at the destination (or already
    /// carrying an `.ok` marker), counting them as successes.
    pub if_not_exists: bool,
}

/// Performs copies through an [`ObjectStore`], one descriptor at a time.
pub struct Executor {
    store: Arc<dyn ObjectStore>,
    options: ExecutorOptions,
}

impl Executor {
    pub fn new(store: Arc<dyn ObjectStore>, options: ExecutorOptions) -> Self {
        Self { store, options }
    }

    /// Copies one object, updating `progress` as bytes move.
    ///
    /// Success writes `<marker_base>.ok`; a copy failure writes
    /// `<marker_base>.err` and returns the error. A cancelled copy leaves
    /// no marker. A marker that cannot be written is logged and does not
    /// change the outcome of a copy that already landed.
    pub async fn execute(
        &self,
        descriptor: &TransferDescriptor,
        progress: &dyn ProgressReader,
        cancel: &CancellationToken,
    ) -> Result<Outcome, TransferError> {
        if self.options.if_not_exists && self.already_present(descriptor).await? {
            progress.add_skipped(descriptor.size);
            record_ok(descriptor).await;
            progress.complete_object();
            info!(object = %descriptor, bytes = descriptor.size, "already present, skipped");
            return Ok(Outcome::Skipped(descriptor.size));
        }

        let on_bytes = |n: u64| progress.add(n);
        let result = match descriptor.mode {
            TransferMode::Put => {
                self.store
                    .put_object(
                        &descriptor.bucket,
                        &descriptor.key,
                        &descriptor.local,
                        &on_bytes,
                        cancel,
                    )
                    .await
            }
            TransferMode::Get => {
                self.store
                    .get_object(
                        &descriptor.bucket,
                        &descriptor.key,
                        &descriptor.local,
                        &on_bytes,
                        cancel,
                    )
                    .await
            }
        };

        match result {
            Ok(bytes) => {
                if bytes > descriptor.size {
                    progress.add_total(bytes - descriptor.size);
                }
                record_ok(descriptor).await;
                progress.complete_object();
                info!(object = %descriptor, bytes, "transfer succeeded");
                Ok(Outcome::Transferred(bytes))
            }
            Err(StoreError::Cancelled) => {
                debug!(object = %descriptor, "transfer cancelled");
                Err(TransferError::Cancelled)
            }
            Err(e) => {
                warn!(object = %descriptor, error = %e, "transfer failed");
                if let Err(marker_err) = marker::write_err(&descriptor.marker_base).await {
                    warn!(
                        marker = %descriptor.marker_base.display(),
                        error = %marker_err,
                        "failed to write .err marker"
                    );
                }
                Err(TransferError::Store(e))
            }
        }
    }

    async fn already_present(&self, d: &TransferDescriptor) -> Result<bool, TransferError> {
        if tokio::fs::try_exists(marker::ok_path(&d.marker_base)).await? {
            return Ok(true);
        }
        match d.mode {
            TransferMode::Put => Ok(self.store.stat_object(&d.bucket, &d.key).await?.is_some()),
            TransferMode::Get => Ok(tokio::fs::try_exists(&d.local).await?),
        }
    }
}

async fn record_ok(descriptor: &TransferDescriptor) {
    if let Err(e) = marker::write_ok(&descriptor.marker_base).await {
        warn!(
            marker = %descriptor.marker_base.display(),
            error = %e,
            "failed to write .ok marker"
        );
    }
}
