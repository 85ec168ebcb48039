//! Transfer sessions and the bridge service that owns them.
//!
//! A [`Session`] provisions the destination bucket, then drives the
//! producer/consumer pipeline from `mcbridge-transfer` to a terminal
//! state. [`BridgeService`] holds the active identity, the credential
//! cache and the session list, and implements the four RPC operations.

mod provision;
mod service;
mod session;
mod types;

pub use provision::ensure_bucket;
pub use service::{BridgeService, OWNER_PLACEHOLDER, ServiceSettings, bucket_name_for};
pub use session::{Session, SessionOptions};
pub use types::{FailurePolicies, FailurePolicy, SessionSnapshot, SessionState};

use mcbridge_credentials::CredentialError;
use mcbridge_store::StoreError;
use mcbridge_transfer::TransferError;

/// Errors raised while setting up a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to provision bucket {bucket}: {source}")]
    Provision {
        bucket: String,
        #[source]
        source: StoreError,
    },
}

/// Errors returned by [`BridgeService`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("parameters have not been set")]
    NotConfigured,

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Session(#[from] SessionError),
}
