//! Temporary credential lifecycle for the object store.
//!
//! A [`CredentialCache`] holds at most one `(access key, secret key,
//! session token, expiry)` tuple, issued for one [`IdentityKey`]. Lookups
//! are served from the cache while the tuple is outside the refresh
//! margin; otherwise a new tuple is requested from the
//! [`IdentityProvider`] under the cache lock. A cancellable background
//! task re-checks the margin periodically so foreground lookups stay
//! cache hits.

mod cache;
mod clock;
mod provider;
mod sts;
mod types;

pub use cache::{CacheEntry, CredentialCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use provider::{IdentityProvider, ProviderFuture};
pub use sts::LdapStsProvider;
pub use types::{CredentialParams, Credentials, IdentityKey, ProxySettings};

use std::time::Duration;

/// Default validity requested for new credentials: 7 days.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Cached credentials are refreshed once they are this close to expiry.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(24 * 60 * 60);

/// Period of the background refresh check.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Errors produced while acquiring credentials.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("identity provider rejected request: {code}: {message}")]
    Rejected { code: String, message: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("invalid credential validity: {0:?}")]
    InvalidTtl(Duration),

    #[error("identity provider error: {0}")]
    Provider(String),
}
