//! Authorization-code and refresh-token grants against an OpenID provider.

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::discovery::ProviderMetadata;
use crate::{Error, Result};

/// Token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Access token
    pub access_token: String,
    /// Token type (usually "Bearer")
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Refresh token (requires `offline_access`)
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Identity token (requires `openid`)
    #[serde(default)]
    pub id_token: Option<String>,
    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

/// OAuth error body (RFC 6749 section 5.2)
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Public OIDC client for one provider and client id
#[derive(Debug, Clone)]
pub struct OidcClient {
    http: Client,
    metadata: ProviderMetadata,
    client_id: String,
    redirect_uri: String,
    scopes: Vec<String>,
}

impl OidcClient {
    /// Create a client from already discovered metadata.
    #[must_use]
    pub fn new(
        http: Client,
        metadata: ProviderMetadata,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            http,
            metadata,
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scopes,
        }
    }

    /// Discover `issuer` and create a client for it.
    pub async fn discover(
        http: Client,
        issuer: &str,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
    ) -> Result<Self> {
        let metadata = ProviderMetadata::discover(&http, issuer).await?;
        Ok(Self::new(http, metadata, client_id, redirect_uri, scopes))
    }

    /// Client identifier
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Build the authorization request URL.
    pub fn authorization_url(&self, state: &str, code_challenge: &str) -> Result<Url> {
        let mut url = Url::parse(&self.metadata.authorization_endpoint)
            .map_err(|e| Error::Config(format!("Invalid authorization endpoint: {e}")))?;

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256");

        Ok(url)
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<TokenResponse> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];
        let token = self.token_request(&params).await?;
        debug!(client_id = %self.client_id, "Exchanged authorization code");
        Ok(token)
    }

    /// Redeem a refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let scope = self.scopes.join(" ");
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("scope", scope.as_str()),
        ];
        let token = self.token_request(&params).await?;
        info!(client_id = %self.client_id, "Token refreshed successfully");
        Ok(token)
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.metadata.token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(e) => match e.error_description {
                    Some(d) => format!("{}: {d}", e.error),
                    None => e.error,
                },
                Err(_) => body,
            };
            return Err(Error::Http {
                status: status.as_u16(),
                message: format!("Token request failed: {message}"),
            });
        }

        Ok(response.json().await?)
    }
}
