//! Process-wide credential cache.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::provider::IdentityProvider;
use crate::types::{CredentialParams, Credentials, IdentityKey};
use crate::{CredentialError, DEFAULT_REFRESH_MARGIN};

/// The single cached credential tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: IdentityKey,
    pub credentials: Credentials,
    pub expires_at: DateTime<Utc>,
    pub refreshed_at: DateTime<Utc>,
}

/// Holds at most one credential tuple and refreshes it on demand.
///
/// The read-check-refresh-write sequence runs inside one critical section,
/// so concurrent callers racing past an expired entry cause exactly one
/// provider round-trip and never observe a half-written tuple.
pub struct CredentialCache {
    provider: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    refresh_margin: chrono::Duration,
    entry: Mutex<Option<CacheEntry>>,
}

impl CredentialCache {
    /// Creates an empty cache backed by the system clock.
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self::with_clock(provider, Arc::new(SystemClock))
    }

    /// Creates an empty cache with an explicit clock.
    pub fn with_clock(provider: Arc<dyn IdentityProvider>, clock: Arc<dyn Clock>) -> Self {
        Self {
            provider,
            clock,
            refresh_margin: margin_from_std(DEFAULT_REFRESH_MARGIN),
            entry: Mutex::new(None),
        }
    }

    /// Overrides the refresh margin (default 24 h).
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin_from_std(margin);
        self
    }

    /// Returns credentials for `key`, issuing new ones if the cached tuple
    /// is missing, belongs to another identity, or is inside the refresh
    /// margin.
    ///
    /// On provider failure the previous entry is left untouched and the
    /// error is returned; stale credentials are never handed out.
    pub async fn acquire(
        &self,
        key: &IdentityKey,
        params: &CredentialParams,
    ) -> Result<Credentials, CredentialError> {
        let mut entry = self.entry.lock().await;

        if let Some(cached) = entry.as_ref()
            && cached.key == *key
            && self.is_fresh(cached)
        {
            debug!(identity = %key, expires_at = %cached.expires_at, "using cached credentials");
            return Ok(cached.credentials.clone());
        }

        let fresh = self.issue(key, params).await?;
        let credentials = fresh.credentials.clone();
        *entry = Some(fresh);
        Ok(credentials)
    }

    /// Refreshes the entry for `key` if it is due.
    ///
    /// Returns `Ok(true)` when a new tuple was issued. An entry that now
    /// belongs to a different identity is left alone.
    pub async fn refresh_if_due(
        &self,
        key: &IdentityKey,
        params: &CredentialParams,
    ) -> Result<bool, CredentialError> {
        let mut entry = self.entry.lock().await;

        match entry.as_ref() {
            Some(cached) if cached.key != *key => {
                debug!(identity = %key, current = %cached.key, "refresh skipped: identity superseded");
                return Ok(false);
            }
            Some(cached) if self.is_fresh(cached) => return Ok(false),
            _ => {}
        }

        info!(identity = %key, "credentials close to expiry, refreshing");
        let fresh = self.issue(key, params).await?;
        *entry = Some(fresh);
        Ok(true)
    }

    /// Returns a copy of the current entry, if any.
    pub async fn snapshot(&self) -> Option<CacheEntry> {
        self.entry.lock().await.clone()
    }

    /// Spawns the periodic refresh check for `key`.
    ///
    /// The task wakes every `interval`, refreshes if due, logs failures
    /// and retries on the next tick. It exits when `cancel` fires.
    pub fn spawn_refresh_task(
        self: &Arc<Self>,
        key: IdentityKey,
        params: CredentialParams,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // Skip immediate first tick.

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match cache.refresh_if_due(&key, &params).await {
                            Ok(true) => info!(identity = %key, "credentials refreshed in background"),
                            Ok(false) => {}
                            Err(e) => warn!(identity = %key, "background credential refresh failed: {e}"),
                        }
                    }
                }
            }

            debug!(identity = %key, "credential refresh task stopped");
        })
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        entry
            .expires_at
            .checked_sub_signed(self.refresh_margin)
            .is_some_and(|deadline| self.clock.now() < deadline)
    }

    async fn issue(
        &self,
        key: &IdentityKey,
        params: &CredentialParams,
    ) -> Result<CacheEntry, CredentialError> {
        let ttl = chrono::Duration::from_std(params.ttl)
            .map_err(|_| CredentialError::InvalidTtl(params.ttl))?;

        let credentials = self.provider.issue(params).await?;

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(CredentialError::InvalidTtl(params.ttl))?;

        info!(
            identity = %key,
            access_key = %credentials.access_key,
            expires_at = %expires_at.format("%Y-%m-%d %H:%M:%S"),
            "issued new credentials"
        );

        Ok(CacheEntry {
            key: key.clone(),
            credentials,
            expires_at,
            refreshed_at: now,
        })
    }
}

fn margin_from_std(margin: Duration) -> chrono::Duration {
    chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::MAX)
}
