//! LDAP-backed STS identity provider.
//!
//! Exchanges an LDAP username/password for temporary credentials with the
//! object store's `AssumeRoleWithLDAPIdentity` STS action.

use std::time::Duration;

use tracing::debug;

use crate::CredentialError;
use crate::provider::{IdentityProvider, ProviderFuture};
use crate::types::{CredentialParams, Credentials};

const STS_ACTION: &str = "AssumeRoleWithLDAPIdentity";
const STS_VERSION: &str = "2011-06-15";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Issues credentials through an STS endpoint with LDAP identities.
#[derive(Debug, Default, Clone)]
pub struct LdapStsProvider;

impl LdapStsProvider {
    pub fn new() -> Self {
        Self
    }

    fn http_client(params: &CredentialParams) -> Result<reqwest::Client, CredentialError> {
        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(proxy) = &params.proxy {
            let mut p = reqwest::Proxy::all(&proxy.url)?;
            if !proxy.username.is_empty() {
                p = p.basic_auth(&proxy.username, &proxy.password);
            }
            builder = builder.proxy(p);
        }
        Ok(builder.build()?)
    }

    async fn request(&self, params: &CredentialParams) -> Result<Credentials, CredentialError> {
        let mut form = vec![
            ("Action", STS_ACTION.to_string()),
            ("Version", STS_VERSION.to_string()),
            ("LDAPUsername", params.username.clone()),
            ("LDAPPassword", params.password.clone()),
            ("DurationSeconds", params.ttl.as_secs().to_string()),
        ];

        if let Some(path) = &params.policy_path {
            let policy = tokio::fs::read_to_string(path).await?;
            form.push(("Policy", policy));
        }

        debug!(endpoint = %params.endpoint, user = %params.username, "requesting STS credentials");

        let resp = Self::http_client(params)?
            .post(&params.endpoint)
            .form(&form)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(CredentialError::Rejected {
                code: xml_tag(&body, "Code").unwrap_or_else(|| status.as_u16().to_string()),
                message: xml_tag(&body, "Message").unwrap_or(body),
            });
        }

        parse_credentials(&body)
    }
}

impl IdentityProvider for LdapStsProvider {
    fn issue<'a>(&'a self, params: &'a CredentialParams) -> ProviderFuture<'a> {
        Box::pin(self.request(params))
    }
}

/// Extracts the credential triple from an STS XML response body.
fn parse_credentials(body: &str) -> Result<Credentials, CredentialError> {
    let field = |name: &str| {
        xml_tag(body, name)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CredentialError::InvalidResponse(format!("missing <{name}>")))
    };
    Ok(Credentials {
        access_key: field("AccessKeyId")?,
        secret_key: field("SecretAccessKey")?,
        session_token: field("SessionToken")?,
    })
}

/// Returns the unescaped text of the first `<name>...</name>` element.
///
/// STS responses are flat and small; only the five predefined XML
/// entities can appear in credential values.
fn xml_tag(body: &str, name: &str) -> Option<String> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = body.find(&open)? + open.len();
    let end = start + body[start..].find(&close)?;
    Some(unescape(body[start..end].trim()))
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
