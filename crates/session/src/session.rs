//! Session controller.
//!
//! A [`Session`] binds one transfer request to its own cancellation
//! scope, descriptor channel and progress tracker. [`Session::provision`]
//! makes sure the destination bucket exists; [`Session::run`] wires the
//! producer to the executor and drives the consumer loop to a terminal
//! state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use mcbridge_protocol::TransferMode;
use mcbridge_store::ObjectStore;
use mcbridge_transfer::{
    Executor, ExecutorOptions, ProgressMode, ProgressReader, TransferError, TransferRequest,
    spawn_producer,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::SessionError;
use crate::provision::ensure_bucket;
use crate::types::{FailurePolicies, FailurePolicy, SessionSnapshot, SessionState};

/// Per-session settings chosen by the host.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub progress: ProgressMode,
    pub executor: ExecutorOptions,
    pub failure_policies: FailurePolicies,
}

pub struct Session {
    id: String,
    mode: TransferMode,
    progress: Arc<dyn ProgressReader>,
    cancel: CancellationToken,
    state: Mutex<SessionState>,
    error: Mutex<Option<String>>,
    failed_objects: AtomicU64,
    options: SessionOptions,
}

impl Session {
    /// Creates an idle session. `cancel` is normally a child of the host's
    /// shutdown token.
    pub fn new(
        id: impl Into<String>,
        mode: TransferMode,
        options: SessionOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            mode,
            progress: options.progress.tracker(),
            cancel,
            state: Mutex::new(SessionState::Idle),
            error: Mutex::new(None),
            failed_objects: AtomicU64::new(0),
            options,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn progress(&self) -> &dyn ProgressReader {
        self.progress.as_ref()
    }

    /// Requests cancellation. A no-op once the session is terminal.
    pub fn stop(&self) {
        if self.state().is_terminal() {
            return;
        }
        debug!(session = %self.id, "stop requested");
        self.cancel.cancel();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            mode: self.mode,
            state: self.state(),
            progress: self.progress.snapshot(),
            failed_objects: self.failed_objects.load(Ordering::SeqCst),
            error: self
                .error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    /// Ensures the destination bucket exists.
    ///
    /// `skip` is set when the host already confirmed the bucket for the
    /// active identity. On failure the session ends as `Failed`.
    pub async fn provision(
        &self,
        store: &dyn ObjectStore,
        bucket: &str,
        region: &str,
        skip: bool,
    ) -> Result<(), SessionError> {
        self.set_state(SessionState::Provisioning);
        if skip {
            return Ok(());
        }
        if let Err(e) = ensure_bucket(store, bucket, region).await {
            self.finish(SessionState::Failed, Some(e.to_string()));
            return Err(e);
        }
        Ok(())
    }

    /// Ends a session that never got to run, e.g. because its store could
    /// not be reached.
    pub fn fail(&self, message: impl Into<String>) {
        self.finish(SessionState::Failed, Some(message.into()));
    }

    /// Runs the producer/consumer pipeline to a terminal state.
    pub async fn run(&self, store: Arc<dyn ObjectStore>, request: TransferRequest) -> SessionState {
        if self.cancel.is_cancelled() {
            return self.finish(SessionState::Cancelled, None);
        }
        self.set_state(SessionState::Running);
        info!(
            session = %self.id,
            mode = %self.mode,
            bucket = %request.bucket,
            pairs = request.pairs.len(),
            "session running"
        );

        let producer_cancel = self.cancel.child_token();
        let (mut rx, producer) = spawn_producer(
            request,
            Arc::clone(&store),
            Arc::clone(&self.progress),
            producer_cancel.clone(),
        );
        let executor = Executor::new(store, self.options.executor);
        let policy = self.options.failure_policies.for_mode(self.mode);

        let (state, error) = loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break (SessionState::Cancelled, None),
                item = rx.recv() => item,
            };

            let descriptor = match item {
                None => break (SessionState::Completed, None),
                Some(Err(e)) => {
                    error!(session = %self.id, error = %e, "resolution failed");
                    break (SessionState::Failed, Some(e.to_string()));
                }
                Some(Ok(d)) => d,
            };

            if self.cancel.is_cancelled() {
                break (SessionState::Cancelled, None);
            }

            match executor
                .execute(&descriptor, self.progress.as_ref(), &self.cancel)
                .await
            {
                Ok(_) => {}
                Err(TransferError::Cancelled) => break (SessionState::Cancelled, None),
                Err(e) => {
                    self.failed_objects.fetch_add(1, Ordering::SeqCst);
                    match policy {
                        FailurePolicy::Continue => {
                            warn!(session = %self.id, object = %descriptor, error = %e, "object failed, continuing");
                            self.record_error(e.to_string());
                        }
                        FailurePolicy::Finish => {
                            error!(session = %self.id, object = %descriptor, error = %e, "object failed, finishing session");
                            break (SessionState::Failed, Some(e.to_string()));
                        }
                    }
                }
            }
        };

        producer_cancel.cancel();
        drop(rx);
        producer.abort();
        if let Err(e) = producer.await
            && !e.is_cancelled()
        {
            warn!(session = %self.id, error = %e, "producer task failed");
        }

        self.finish(state, error)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn record_error(&self, message: String) {
        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(message);
    }

    fn finish(&self, state: SessionState, error: Option<String>) -> SessionState {
        if let Some(message) = error {
            self.record_error(message);
        }
        self.set_state(state);
        self.progress.finish();
        let p = self.progress.snapshot();
        info!(
            session = %self.id,
            state = %state,
            bytes = p.transferred,
            objects = p.completed_objects,
            failed = self.failed_objects.load(Ordering::SeqCst),
            "session finished"
        );
        state
    }
}
