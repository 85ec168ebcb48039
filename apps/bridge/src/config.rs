//! Bridge configuration.
//!
//! Stored as JSON:
//! - Linux: `~/.config/mcbridge/config.json`
//! - Windows: `%APPDATA%/mcbridge/config.json`
//!
//! Every key is optional; a missing file means defaults.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use mcbridge_credentials::{DEFAULT_REFRESH_INTERVAL, DEFAULT_REFRESH_MARGIN, DEFAULT_TTL};
use mcbridge_session::{FailurePolicies, FailurePolicy, ServiceSettings, SessionOptions};
use mcbridge_store::{DEFAULT_PART_SIZE, DEFAULT_REGION, S3Options};
use mcbridge_transfer::{ExecutorOptions, MarkerLocation, ProgressMode};
use serde::{Deserialize, Serialize};

/// Which object store implementation serves the sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    S3,
    /// Local directory tree, one sub-directory per bucket.
    Fs,
}

/// Progress rendering for sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStyle {
    #[default]
    Silent,
    Interactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    pub backend: Backend,
    /// Root directory of the `fs` backend.
    pub fs_root: PathBuf,
    pub region: String,
    pub use_ssl: bool,
    /// Multipart threshold and part size in bytes.
    pub part_size: u64,
    pub credential_ttl_hours: u64,
    pub refresh_margin_hours: u64,
    pub refresh_interval_minutes: u64,
    pub policy_path: Option<PathBuf>,
    pub progress: ProgressStyle,
    /// Upload markers go here (joined with the key) instead of beside the source.
    pub marker_dir: Option<PathBuf>,
    pub if_not_exists: bool,
    pub upload_failure_policy: FailurePolicy,
    pub download_failure_policy: FailurePolicy,
    /// Shut down once a caller has observed a finished status.
    pub exit_when_finished: bool,
    pub bind: IpAddr,
    /// Prepended to every remote key. `{owner}` expands to the account name.
    pub key_prefix: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let policies = FailurePolicies::default();
        Self {
            backend: Backend::default(),
            fs_root: std::env::temp_dir().join("mcbridge-store"),
            region: DEFAULT_REGION.into(),
            use_ssl: false,
            part_size: DEFAULT_PART_SIZE,
            credential_ttl_hours: DEFAULT_TTL.as_secs() / 3600,
            refresh_margin_hours: DEFAULT_REFRESH_MARGIN.as_secs() / 3600,
            refresh_interval_minutes: DEFAULT_REFRESH_INTERVAL.as_secs() / 60,
            policy_path: None,
            progress: ProgressStyle::default(),
            marker_dir: None,
            if_not_exists: false,
            upload_failure_policy: policies.upload,
            download_failure_policy: policies.download,
            exit_when_finished: true,
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            key_prefix: String::new(),
        }
    }
}

impl BridgeConfig {
    /// Loads the configuration.
    ///
    /// An explicit `path` must exist. The default location may be absent,
    /// and an unparsable default file logs a warning and yields defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            return serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()));
        }

        let path = config_path()?;
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to parse config, using defaults: {e}");
                Ok(Self::default())
            }
        }
    }

    pub fn refresh_margin(&self) -> Duration {
        hours(self.refresh_margin_hours)
    }

    pub fn s3_options(&self) -> S3Options {
        S3Options {
            region: self.region.clone(),
            part_size: self.part_size,
        }
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            region: self.region.clone(),
            use_ssl: self.use_ssl,
            policy_path: self.policy_path.clone(),
            credential_ttl: hours(self.credential_ttl_hours),
            refresh_interval: Duration::from_secs(
                self.refresh_interval_minutes.max(1).saturating_mul(60),
            ),
            key_prefix: self.key_prefix.clone(),
            upload_markers: match &self.marker_dir {
                Some(dir) => MarkerLocation::Directory(dir.clone()),
                None => MarkerLocation::BesideLocal,
            },
            session: SessionOptions {
                progress: match self.progress {
                    ProgressStyle::Silent => ProgressMode::Silent,
                    ProgressStyle::Interactive => ProgressMode::Interactive,
                },
                executor: ExecutorOptions {
                    if_not_exists: self.if_not_exists,
                },
                failure_policies: FailurePolicies {
                    upload: self.upload_failure_policy,
                    download: self.download_failure_policy,
                },
            },
        }
    }
}

fn hours(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(3600))
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    Ok(config_base_dir()?.join("mcbridge").join("config.json"))
}

fn config_base_dir() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home).join(".config"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").context("APPDATA is not set")?;
        Ok(PathBuf::from(appdata))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp"))
    }
}
