//! OpenID provider metadata discovery (`/.well-known/openid-configuration`).

use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// OpenID provider metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier
    pub issuer: String,

    /// Authorization endpoint URL
    pub authorization_endpoint: String,

    /// Token endpoint URL
    pub token_endpoint: String,

    /// JSON Web Key Set URL
    pub jwks_uri: String,

    /// Supported scopes (may be string or array)
    #[serde(default, deserialize_with = "deserialize_scopes")]
    pub scopes_supported: Vec<String>,

    /// Supported PKCE code challenge methods
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

/// Deserialize scopes that may be either a space separated string or an array
fn deserialize_scopes<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(s) => Ok(s.split_whitespace().map(String::from).collect()),
        StringOrVec::Vec(v) => Ok(v),
    }
}

impl ProviderMetadata {
    /// Fetch the metadata document for `issuer`.
    pub async fn discover(client: &Client, issuer: &str) -> Result<Self> {
        let url = discovery_url(issuer);
        debug!(url = %url, "Discovering OpenID provider metadata");

        let response = client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(Error::Http {
                status: response.status().as_u16(),
                message: format!("OpenID discovery failed at {url}"),
            });
        }

        let metadata: Self = response.json().await?;

        if !same_issuer(&metadata.issuer, issuer) {
            return Err(Error::Authentication(format!(
                "Discovery document issuer mismatch: expected {issuer}, got {}",
                metadata.issuer
            )));
        }

        debug!(issuer = %metadata.issuer, "Discovered OpenID provider");
        Ok(metadata)
    }

    /// Whether the provider advertises S256 PKCE. An empty list is taken as
    /// "not advertised" rather than "unsupported".
    #[must_use]
    pub fn supports_pkce(&self) -> bool {
        self.code_challenge_methods_supported.is_empty()
            || self.code_challenge_methods_supported.iter().any(|m| m == "S256")
    }
}

/// Discovery document location for an issuer
#[must_use]
pub fn discovery_url(issuer: &str) -> String {
    format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    )
}

/// Issuer comparison ignoring a trailing slash
#[must_use]
pub fn same_issuer(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_url_appends_well_known() {
        assert_eq!(
            discovery_url("https://idp.example.com/oauth2/default"),
            "https://idp.example.com/oauth2/default/.well-known/openid-configuration"
        );
        assert_eq!(
            discovery_url("https://idp.example.com/"),
            "https://idp.example.com/.well-known/openid-configuration"
        );
    }

    #[test]
    fn issuer_comparison_ignores_trailing_slash() {
        assert!(same_issuer("https://idp.example.com/", "https://idp.example.com"));
        assert!(!same_issuer("https://idp.example.com", "https://other.example.com"));
    }

    #[test]
    fn deserialize_metadata_minimal() {
        let json = r#"{
            "issuer": "https://idp.example.com",
            "authorization_endpoint": "https://idp.example.com/v1/authorize",
            "token_endpoint": "https://idp.example.com/v1/token",
            "jwks_uri": "https://idp.example.com/v1/keys"
        }"#;
        let meta: ProviderMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.jwks_uri, "https://idp.example.com/v1/keys");
        assert!(meta.scopes_supported.is_empty());
        assert!(meta.supports_pkce());
    }

    #[test]
    fn scopes_from_string() {
        let json = r#"{
            "issuer": "https://idp.example.com",
            "authorization_endpoint": "https://idp.example.com/v1/authorize",
            "token_endpoint": "https://idp.example.com/v1/token",
            "jwks_uri": "https://idp.example.com/v1/keys",
            "scopes_supported": "openid email offline_access",
            "code_challenge_methods_supported": ["plain"]
        }"#;
        let meta: ProviderMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.scopes_supported, vec!["openid", "email", "offline_access"]);
        assert!(!meta.supports_pkce());
    }
}
