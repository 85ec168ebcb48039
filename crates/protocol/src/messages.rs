use serde::{Deserialize, Serialize};

use crate::types::{ParseStatusError, ProxyKind, TransferMode, TransferStatus};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Establishes or updates the active identity context.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetParametersRequest {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub proxy_type: ProxyKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proxy_host: String,
    #[serde(default)]
    pub proxy_port: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proxy_user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proxy_password: String,
    #[serde(default)]
    pub compression: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub admin_user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub admin_password: String,
    /// Caller already knows the destination bucket exists.
    #[serde(default)]
    pub bucket_is_exists: bool,
}

impl SetParametersRequest {
    /// Returns a copy safe for logging: every secret is replaced by `*`.
    pub fn redacted(&self) -> Self {
        let mask = |s: &str| if s.is_empty() { String::new() } else { "*".into() };
        Self {
            password: mask(&self.password),
            proxy_password: mask(&self.proxy_password),
            admin_password: mask(&self.admin_password),
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for SetParametersRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let r = self.redacted();
        f.debug_struct("SetParametersRequest")
            .field("username", &r.username)
            .field("password", &r.password)
            .field("host", &r.host)
            .field("port", &r.port)
            .field("proxy_type", &r.proxy_type)
            .field("proxy_host", &r.proxy_host)
            .field("proxy_port", &r.proxy_port)
            .field("proxy_user", &r.proxy_user)
            .field("proxy_password", &r.proxy_password)
            .field("compression", &r.compression)
            .field("verbose", &r.verbose)
            .field("admin_user", &r.admin_user)
            .field("admin_password", &r.admin_password)
            .field("bucket_is_exists", &r.bucket_is_exists)
            .finish()
    }
}

/// Starts a transfer batch. `sources[i]` is copied to `destinations[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransferRequest {
    pub mode: TransferMode,
    pub sources: Vec<String>,
    pub destinations: Vec<String>,
    /// Overrides the configured "skip if already present" behavior.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_not_exists: Option<bool>,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Generic acknowledgement. `message` is empty on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub message: String,
}

/// Reply to `StartTransfer`: the session runs in the background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransferResponse {
    pub session_id: String,
}

/// Reply to `GetStatus`, carrying the 3-token status line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn parse(&self) -> Result<TransferStatus, ParseStatusError> {
        self.status.parse()
    }
}

impl From<TransferStatus> for StatusResponse {
    fn from(status: TransferStatus) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}
