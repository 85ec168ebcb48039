//! Idempotent destination bucket provisioning.

use mcbridge_store::ObjectStore;
use tracing::{debug, info, warn};

use crate::SessionError;

/// Makes sure `bucket` exists: check, create if absent, and re-check if
/// creation fails (another actor may have created it concurrently).
pub async fn ensure_bucket(
    store: &dyn ObjectStore,
    bucket: &str,
    region: &str,
) -> Result<(), SessionError> {
    let exists = store
        .bucket_exists(bucket)
        .await
        .map_err(|source| SessionError::Provision {
            bucket: bucket.to_string(),
            source,
        })?;
    if exists {
        debug!(bucket, "bucket already exists");
        return Ok(());
    }

    let create_err = match store.make_bucket(bucket, region).await {
        Ok(()) => {
            info!(bucket, region, "bucket created");
            return Ok(());
        }
        Err(e) => e,
    };
    warn!(bucket, error = %create_err, "bucket creation failed, re-checking");

    match store.bucket_exists(bucket).await {
        Ok(true) => {
            info!(bucket, "bucket created concurrently");
            Ok(())
        }
        Ok(false) | Err(_) => Err(SessionError::Provision {
            bucket: bucket.to_string(),
            source: create_err,
        }),
    }
}
