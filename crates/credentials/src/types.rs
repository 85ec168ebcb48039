use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::DEFAULT_TTL;

/// A temporary credential set issued by the identity provider.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"*")
            .field("session_token", &"*")
            .finish()
    }
}

/// The identity a credential tuple was issued for (user + host).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub user: String,
    pub host: String,
}

impl IdentityKey {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
        }
    }

    /// Alias form `<user>_<host with dots as underscores>`.
    pub fn alias(&self) -> String {
        format!("{}_{}", self.user, self.host.replace('.', "_"))
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.alias())
    }
}

/// Outbound proxy for identity-provider requests.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxySettings {
    /// Full proxy URL, e.g. `http://proxy:3128` or `socks5://proxy:1080`.
    pub url: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ProxySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxySettings")
            .field("url", &self.url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Everything the identity provider needs to issue a credential set.
#[derive(Clone)]
pub struct CredentialParams {
    /// Provider endpoint, e.g. `http://10.0.0.5:9000`.
    pub endpoint: String,
    pub username: String,
    pub password: String,
    /// Optional session-policy document, read from disk at issue time.
    pub policy_path: Option<PathBuf>,
    /// Requested validity window.
    pub ttl: Duration,
    pub proxy: Option<ProxySettings>,
}

impl CredentialParams {
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            policy_path: None,
            ttl: DEFAULT_TTL,
            proxy: None,
        }
    }
}

impl fmt::Debug for CredentialParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialParams")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"*")
            .field("policy_path", &self.policy_path)
            .field("ttl", &self.ttl)
            .field("proxy", &self.proxy)
            .finish()
    }
}
