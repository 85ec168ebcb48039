//! Identity provider seam.
//!
//! The bridge host supplies an implementation (normally
//! [`LdapStsProvider`](crate::LdapStsProvider)); tests supply counting
//! doubles.

use std::future::Future;
use std::pin::Pin;

use crate::CredentialError;
use crate::types::{CredentialParams, Credentials};

/// A boxed future returned by [`IdentityProvider::issue`].
pub type ProviderFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Credentials, CredentialError>> + Send + 'a>>;

/// Issues temporary credential sets.
pub trait IdentityProvider: Send + Sync {
    /// Requests a fresh credential set valid for `params.ttl`.
    fn issue<'a>(&'a self, params: &'a CredentialParams) -> ProviderFuture<'a>;
}
