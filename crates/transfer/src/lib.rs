//! Object transfer pipeline: progress tracking, descriptor production,
//! per-object execution and completion markers.

mod executor;
pub mod marker;
mod producer;
mod progress;
mod types;

pub use executor::{Executor, ExecutorOptions};
pub use producer::{CHANNEL_CAPACITY, spawn_producer};
pub use progress::{
    Accounter, ProgressBar, ProgressMode, ProgressReader, ProgressState, SpeedCalculator,
};
pub use types::{
    DescriptorResult, MarkerLocation, Outcome, RECURSIVE_SUFFIX, ResolveError,
    TransferDescriptor, TransferRequest,
};

use mcbridge_protocol::TransferMode;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] mcbridge_store::StoreError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(
        "the number of sources ({sources}) and destinations ({destinations}) must be the same"
    )]
    LengthMismatch { sources: usize, destinations: usize },

    #[error("cancelled")]
    Cancelled,
}

impl TransferRequest {
    /// Pairs `sources` with `destinations`; the lists must be equally long.
    pub fn new(
        mode: TransferMode,
        bucket: impl Into<String>,
        sources: Vec<String>,
        destinations: Vec<String>,
    ) -> Result<Self, TransferError> {
        if sources.len() != destinations.len() {
            return Err(TransferError::LengthMismatch {
                sources: sources.len(),
                destinations: destinations.len(),
            });
        }
        Ok(Self {
            mode,
            bucket: bucket.into(),
            pairs: sources.into_iter().zip(destinations).collect(),
            key_prefix: String::new(),
            upload_markers: MarkerLocation::default(),
        })
    }
}
