//! The bridge service: the RPC-facing owner of the credential cache,
//! the active identity and all sessions.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mcbridge_credentials::{
    CredentialCache, CredentialParams, DEFAULT_REFRESH_INTERVAL, DEFAULT_TTL, IdentityKey,
    ProxySettings,
};
use mcbridge_protocol::{
    ProxyKind, SetParametersRequest, StartTransferRequest, TransferStatus,
};
use mcbridge_store::{DEFAULT_REGION, ObjectStore, StoreFactory};
use mcbridge_transfer::{MarkerLocation, TransferRequest};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ServiceError;
use crate::session::{Session, SessionOptions};
use crate::types::SessionSnapshot;

/// Placeholder in [`ServiceSettings::key_prefix`] replaced by the
/// un-normalized account name.
pub const OWNER_PLACEHOLDER: &str = "{owner}";

/// Host-level settings applied to every session.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub region: String,
    pub use_ssl: bool,
    pub policy_path: Option<PathBuf>,
    pub credential_ttl: Duration,
    pub refresh_interval: Duration,
    /// Prepended to every remote key; may contain [`OWNER_PLACEHOLDER`].
    pub key_prefix: String,
    pub upload_markers: MarkerLocation,
    pub session: SessionOptions,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            use_ssl: false,
            policy_path: None,
            credential_ttl: DEFAULT_TTL,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            key_prefix: String::new(),
            upload_markers: MarkerLocation::BesideLocal,
            session: SessionOptions::default(),
        }
    }
}

/// Bucket name for an account: lower-cased, `_` replaced by `-`.
pub fn bucket_name_for(username: &str) -> String {
    username.replace('_', "-").to_lowercase()
}

#[derive(Debug, Clone)]
struct ActiveIdentity {
    key: IdentityKey,
    params: CredentialParams,
    endpoint: String,
    bucket: String,
    /// Account name as sent by the caller, before normalization.
    owner: String,
}

#[derive(Default)]
struct ServiceInner {
    identity: Option<ActiveIdentity>,
    /// Buckets confirmed to exist for the active identity.
    provisioned: HashSet<String>,
    sessions: Vec<Arc<Session>>,
    refresher: Option<CancellationToken>,
}

/// Implements `SetParameters`, `StartTransfer`, `GetStatus` and
/// `StopTransfer` on top of the credential cache and the session
/// controller.
pub struct BridgeService {
    cache: Arc<CredentialCache>,
    stores: Arc<dyn StoreFactory>,
    settings: ServiceSettings,
    inner: Mutex<ServiceInner>,
    shutdown: CancellationToken,
}

impl BridgeService {
    /// `shutdown` bounds the lifetime of every background task the
    /// service starts (credential refresh and sessions).
    pub fn new(
        cache: Arc<CredentialCache>,
        stores: Arc<dyn StoreFactory>,
        settings: ServiceSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            cache,
            stores,
            settings,
            inner: Mutex::new(ServiceInner::default()),
            shutdown,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServiceInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Establishes the active identity and makes sure the credential cache
    /// holds a valid tuple for it. Replaces the background refresh task.
    ///
    /// When credentials for a different identity cannot be issued, the
    /// previous identity is dropped as well, so later transfers are
    /// refused instead of running under the old account.
    pub async fn set_parameters(&self, req: &SetParametersRequest) -> Result<(), ServiceError> {
        info!(params = ?req, "received parameters");
        if req.username.is_empty() || req.host.is_empty() {
            return Err(ServiceError::InvalidParameters(
                "username and host are required".into(),
            ));
        }

        let bucket = bucket_name_for(&req.username);
        let scheme = if self.settings.use_ssl { "https" } else { "http" };
        let endpoint = format!("{scheme}://{}:{}", req.host, req.port);
        let key = IdentityKey::new(&bucket, &req.host);

        let mut params = CredentialParams::new(&endpoint, &req.username, &req.password);
        params.policy_path = self.settings.policy_path.clone();
        params.ttl = self.settings.credential_ttl;
        params.proxy = proxy_settings(req);

        if let Err(e) = self.cache.acquire(&key, &params).await {
            let mut inner = self.lock();
            if inner.identity.as_ref().is_some_and(|a| a.key != key) {
                warn!(identity = %key, "parameters rejected, clearing previous identity");
                inner.identity = None;
                inner.provisioned.clear();
                if let Some(old) = inner.refresher.take() {
                    old.cancel();
                }
            }
            return Err(e.into());
        }

        let mut inner = self.lock();
        if inner.identity.as_ref().is_none_or(|a| a.key != key) {
            inner.provisioned.clear();
        }
        if req.bucket_is_exists {
            inner.provisioned.insert(bucket.clone());
        }

        if let Some(old) = inner.refresher.take() {
            old.cancel();
        }
        let refresher = self.shutdown.child_token();
        self.cache.spawn_refresh_task(
            key.clone(),
            params.clone(),
            self.settings.refresh_interval,
            refresher.clone(),
        );
        inner.refresher = Some(refresher);

        info!(identity = %key, bucket = %bucket, endpoint = %endpoint, "identity configured");
        inner.identity = Some(ActiveIdentity {
            key,
            params,
            endpoint,
            bucket,
            owner: req.username.clone(),
        });
        Ok(())
    }

    /// Validates the request, provisions the bucket and starts a session
    /// in the background. Returns the new session's id.
    pub async fn start_transfer(&self, req: StartTransferRequest) -> Result<String, ServiceError> {
        let identity = self
            .lock()
            .identity
            .clone()
            .ok_or(ServiceError::NotConfigured)?;

        let mode = req.mode;
        let mut request =
            TransferRequest::new(mode, &identity.bucket, req.sources, req.destinations)?;
        request.key_prefix = self
            .settings
            .key_prefix
            .replace(OWNER_PLACEHOLDER, &identity.owner);
        request.upload_markers = self.settings.upload_markers.clone();

        let mut options = self.settings.session.clone();
        if let Some(if_not_exists) = req.if_not_exists {
            options.executor.if_not_exists = if_not_exists;
        }

        // Registered before any await so status polls see this session,
        // not the previous finished one.
        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(&id, mode, options, self.shutdown.child_token()));
        {
            let mut inner = self.lock();
            inner.sessions.retain(|s| !s.state().is_terminal());
            inner.sessions.push(Arc::clone(&session));
        }

        let store = match self.connect(&identity).await {
            Ok(store) => store,
            Err(e) => {
                session.fail(e.to_string());
                return Err(e);
            }
        };
        let skip_provision = self.lock().provisioned.contains(&identity.bucket);

        session
            .provision(store.as_ref(), &identity.bucket, &self.settings.region, skip_provision)
            .await?;
        self.lock().provisioned.insert(identity.bucket.clone());

        info!(session = %id, mode = %mode, bucket = %identity.bucket, "transfer started");
        tokio::spawn(async move {
            session.run(store, request).await;
        });
        Ok(id)
    }

    async fn connect(&self, identity: &ActiveIdentity) -> Result<Arc<dyn ObjectStore>, ServiceError> {
        let credentials = self.cache.acquire(&identity.key, &identity.params).await?;
        Ok(self.stores.connect(&identity.endpoint, &credentials)?)
    }

    /// Status of the most recently started session; `0 0 0` when none.
    pub fn status(&self) -> TransferStatus {
        match self.latest_session() {
            Some(s) => TransferStatus {
                speed: s.progress.speed,
                transferred: s.progress.transferred,
                finished: s.progress.finished,
            },
            None => TransferStatus::default(),
        }
    }

    pub fn latest_session(&self) -> Option<SessionSnapshot> {
        self.lock().sessions.last().map(|s| s.snapshot())
    }

    /// Requests cancellation of every session. Idempotent.
    pub fn stop_transfer(&self) {
        let inner = self.lock();
        debug!(sessions = inner.sessions.len(), "stopping sessions");
        for session in &inner.sessions {
            session.stop();
        }
    }

    /// Cancels the refresh task and every session.
    pub fn shutdown(&self) {
        info!("bridge service shutting down");
        self.shutdown.cancel();
    }
}

fn proxy_settings(req: &SetParametersRequest) -> Option<ProxySettings> {
    let scheme = match req.proxy_type {
        ProxyKind::None => return None,
        ProxyKind::Http => "http",
        ProxyKind::Socks5 => "socks5",
    };
    if req.proxy_host.is_empty() {
        return None;
    }
    Some(ProxySettings {
        url: format!("{scheme}://{}:{}", req.proxy_host, req.proxy_port),
        username: req.proxy_user.clone(),
        password: req.proxy_password.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcbridge_credentials::{
        CredentialError, Credentials, IdentityProvider, ProviderFuture,
    };
    use mcbridge_protocol::TransferMode;
    use mcbridge_store::FsStoreFactory;
    use crate::types::SessionState;
    use mcbridge_transfer::marker::ok_path;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeProvider {
        calls: AtomicUsize,
        fail: AtomicBool,
        /// While set, each issue waits for `release`.
        hold: AtomicBool,
        release: tokio::sync::Notify,
    }

    impl IdentityProvider for FakeProvider {
        fn issue<'a>(&'a self, params: &'a CredentialParams) -> ProviderFuture<'a> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if self.hold.load(Ordering::SeqCst) {
                    self.release.notified().await;
                }
                if self.fail.load(Ordering::SeqCst) {
                    return Err(CredentialError::Rejected {
                        code: "InvalidParameterValue".into(),
                        message: "LDAP login failed".into(),
                    });
                }
                Ok(Credentials {
                    access_key: format!("AK-{}-{n}", params.username),
                    secret_key: "SK".into(),
                    session_token: "TOKEN".into(),
                })
            })
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        provider: Arc<FakeProvider>,
        service: BridgeService,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_settings(ServiceSettings::default())
        }

        fn with_settings(settings: ServiceSettings) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let provider = Arc::new(FakeProvider::default());
            let cache = Arc::new(CredentialCache::new(provider.clone()));
            let stores = Arc::new(FsStoreFactory::new(dir.path().join("store")));
            let service =
                BridgeService::new(cache, stores, settings, CancellationToken::new());
            Self {
                dir,
                provider,
                service,
            }
        }

        fn store_root(&self) -> PathBuf {
            self.dir.path().join("store")
        }

        fn write(&self, name: &str, len: usize) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, vec![3u8; len]).unwrap();
            path
        }

        async fn wait_finished(&self) -> TransferStatus {
            for _ in 0..500 {
                let status = self.service.status();
                if status.finished {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("session did not finish");
        }
    }

    fn params(username: &str) -> SetParametersRequest {
        SetParametersRequest {
            username: username.into(),
            password: "pw".into(),
            host: "10.0.0.5".into(),
            port: 9000,
            ..Default::default()
        }
    }

    fn put(sources: Vec<&Path>, destinations: Vec<&str>) -> StartTransferRequest {
        StartTransferRequest {
            mode: TransferMode::Put,
            sources: sources.iter().map(|p| p.display().to_string()).collect(),
            destinations: destinations.iter().map(|d| d.to_string()).collect(),
            if_not_exists: None,
        }
    }

    #[test]
    fn bucket_name_normalization() {
        assert_eq!(bucket_name_for("Render_User"), "render-user");
        assert_eq!(bucket_name_for("alice"), "alice");
    }

    #[test]
    fn proxy_url_from_kind() {
        let mut req = params("u");
        assert!(proxy_settings(&req).is_none());

        req.proxy_type = ProxyKind::Socks5;
        req.proxy_host = "proxy".into();
        req.proxy_port = 1080;
        assert_eq!(proxy_settings(&req).unwrap().url, "socks5://proxy:1080");
    }

    #[tokio::test]
    async fn status_is_zero_without_session() {
        let h = Harness::new();
        assert_eq!(h.service.status().to_string(), "0 0 0");
    }

    #[tokio::test]
    async fn start_requires_parameters() {
        let h = Harness::new();
        let src = h.write("a.bin", 1);
        let err = h
            .service
            .start_transfer(put(vec![&src], vec!["a.bin"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotConfigured));
    }

    #[tokio::test]
    async fn repeated_parameters_hit_cache() {
        let h = Harness::new();
        h.service.set_parameters(&params("Render_User")).await.unwrap();
        h.service.set_parameters(&params("Render_User")).await.unwrap();
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 1);

        h.service.set_parameters(&params("other")).await.unwrap();
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn credential_failure_is_surfaced() {
        let h = Harness::new();
        h.provider.fail.store(true, Ordering::SeqCst);
        let err = h.service.set_parameters(&params("u")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Credential(_)));

        let src = h.write("a.bin", 1);
        let err = h
            .service
            .start_transfer(put(vec![&src], vec!["a.bin"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotConfigured));
    }

    #[tokio::test]
    async fn rejected_identity_switch_clears_previous_account() {
        let h = Harness::new();
        h.service.set_parameters(&params("alice")).await.unwrap();

        h.provider.fail.store(true, Ordering::SeqCst);
        let err = h.service.set_parameters(&params("bob")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Credential(_)));

        h.provider.fail.store(false, Ordering::SeqCst);
        let src = h.write("a.bin", 1);
        let err = h
            .service
            .start_transfer(put(vec![&src], vec!["a.bin"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotConfigured));
        assert!(!h.store_root().join("alice").exists());
    }

    /// Credentials shorter-lived than the refresh margin are re-issued on
    /// every start, which gives the provider a window to hold.
    fn short_lived() -> ServiceSettings {
        ServiceSettings {
            credential_ttl: Duration::from_secs(3600),
            ..ServiceSettings::default()
        }
    }

    #[tokio::test]
    async fn new_start_hides_previous_finished_status() {
        let h = Harness::with_settings(short_lived());
        h.service.set_parameters(&params("u")).await.unwrap();
        let src = h.write("a.bin", 8);
        h.service
            .start_transfer(put(vec![&src], vec!["a.bin"]))
            .await
            .unwrap();
        assert!(h.wait_finished().await.finished);
        let issued = h.provider.calls.load(Ordering::SeqCst);

        h.provider.hold.store(true, Ordering::SeqCst);
        let observe = async {
            while h.provider.calls.load(Ordering::SeqCst) == issued {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            let during = h.service.status();
            h.provider.release.notify_one();
            during
        };
        let (started, during) = tokio::join!(
            h.service.start_transfer(put(vec![&src], vec!["b.bin"])),
            observe
        );
        started.unwrap();
        assert!(!during.finished);
        assert_eq!(during.transferred, 0);
        h.wait_finished().await;
    }

    #[tokio::test]
    async fn start_failing_on_credentials_ends_its_session() {
        let h = Harness::with_settings(short_lived());
        h.service.set_parameters(&params("u")).await.unwrap();
        h.provider.fail.store(true, Ordering::SeqCst);

        let src = h.write("a.bin", 1);
        let err = h
            .service
            .start_transfer(put(vec![&src], vec!["a.bin"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Credential(_)));
        let latest = h.service.latest_session().unwrap();
        assert_eq!(latest.state, SessionState::Failed);
        assert!(h.service.status().finished);
    }

    #[tokio::test]
    async fn mismatched_lists_start_nothing() {
        let h = Harness::new();
        h.service.set_parameters(&params("u")).await.unwrap();
        let src = h.write("a.bin", 1);

        let err = h
            .service
            .start_transfer(put(vec![&src], vec!["a.bin", "b.bin"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Transfer(_)));
        assert!(h.service.latest_session().is_none());
        assert!(!h.store_root().join("u").exists());
    }

    #[tokio::test]
    async fn put_reports_final_status_and_marker() {
        let h = Harness::new();
        h.service.set_parameters(&params("Render_User")).await.unwrap();
        let src = h.write("a.bin", 100);

        h.service
            .start_transfer(put(vec![&src], vec!["a.bin"]))
            .await
            .unwrap();
        let status = h.wait_finished().await;

        assert_eq!(status.to_string(), "0 100 1");
        assert!(ok_path(&src).exists());
        assert!(h.store_root().join("render-user").join("a.bin").is_file());
    }

    #[tokio::test]
    async fn owner_prefix_is_applied_to_keys() {
        let settings = ServiceSettings {
            key_prefix: "/cdata/{owner}".into(),
            ..ServiceSettings::default()
        };
        let h = Harness::with_settings(settings);
        h.service.set_parameters(&params("Render_User")).await.unwrap();
        let src = h.write("a.bin", 4);

        h.service
            .start_transfer(put(vec![&src], vec!["jobs/a.bin"]))
            .await
            .unwrap();
        h.wait_finished().await;

        let stored = h
            .store_root()
            .join("render-user")
            .join("cdata")
            .join("Render_User")
            .join("jobs")
            .join("a.bin");
        assert!(stored.is_file());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let h = Harness::new();
        h.service.stop_transfer();
        h.service.set_parameters(&params("u")).await.unwrap();
        let src = h.write("a.bin", 1);
        h.service
            .start_transfer(put(vec![&src], vec!["a.bin"]))
            .await
            .unwrap();
        h.wait_finished().await;

        h.service.stop_transfer();
        h.service.stop_transfer();
        assert!(h.service.status().finished);
    }

    #[tokio::test]
    async fn confirmed_bucket_skips_provisioning() {
        let h = Harness::new();
        let mut req = params("u");
        req.bucket_is_exists = true;
        h.service.set_parameters(&req).await.unwrap();
        let src = h.write("a.bin", 1);

        h.service
            .start_transfer(put(vec![&src], vec!["a.bin"]))
            .await
            .unwrap();
        h.wait_finished().await;

        // The bucket was never created, so the copy itself failed.
        assert!(!h.store_root().join("u").exists());
        assert_eq!(h.service.latest_session().unwrap().failed_objects, 1);
    }

    #[tokio::test]
    async fn shutdown_cancels_running_sessions() {
        let h = Harness::new();
        h.service.set_parameters(&params("u")).await.unwrap();
        h.service.shutdown();

        let src = h.write("a.bin", 1);
        h.service
            .start_transfer(put(vec![&src], vec!["a.bin"]))
            .await
            .unwrap();
        let status = h.wait_finished().await;
        assert_eq!(status.transferred, 0);
        assert!(!ok_path(&src).exists());
    }
}
