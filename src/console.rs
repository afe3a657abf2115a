//! Web console sign-in through the federation endpoint.
//!
//! Temporary credentials are exchanged for a sign-in token
//! (`Action=getSigninToken`), which is then embedded in an `Action=login` URL
//! that drops the browser into the console.

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::ConsoleConfig;
use crate::session::CloudCredentials;
use crate::{Error, Result};

const GLOBAL_CONSOLE: &str = "https://console.aws.amazon.com/";

/// Credentials as the federation endpoint expects them in `Session`
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FederationSession<'a> {
    session_id: &'a str,
    session_key: &'a str,
    session_token: &'a str,
}

#[derive(Deserialize)]
struct SigninTokenResponse {
    #[serde(rename = "SigninToken")]
    signin_token: Option<String>,
}

/// Console landing page for `region`, or the global console.
#[must_use]
pub fn destination(region: Option<&str>) -> String {
    match region.map(str::trim).filter(|r| !r.is_empty()) {
        Some(r) => format!("https://{r}.console.aws.amazon.com/console/home?region={r}"),
        None => GLOBAL_CONSOLE.to_string(),
    }
}

/// Builds console sign-in URLs.
#[derive(Debug, Clone)]
pub struct ConsoleSignin {
    http: reqwest::Client,
    config: ConsoleConfig,
}

impl ConsoleSignin {
    /// Create a sign-in helper.
    #[must_use]
    pub fn new(http: reqwest::Client, config: ConsoleConfig) -> Self {
        Self { http, config }
    }

    /// Exchange `credentials` for a sign-in token.
    pub async fn signin_token(&self, credentials: &CloudCredentials) -> Result<String> {
        let session = serde_json::to_string(&FederationSession {
            session_id: &credentials.access_key_id,
            session_key: &credentials.secret_access_key,
            session_token: &credentials.session_token,
        })?;

        let response = self
            .http
            .get(&self.config.federation_url)
            .query(&[("Action", "getSigninToken"), ("Session", session.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                message: format!("Call to getSigninToken failed with {status}"),
            });
        }

        let body: SigninTokenResponse = response.json().await?;
        body.signin_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Http {
                status: 502,
                message: "getSigninToken response carried no SigninToken".to_string(),
            })
    }

    /// Console login URL for `signin_token`.
    pub fn login_url(&self, signin_token: &str, region: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.config.federation_url)
            .map_err(|e| Error::Config(format!("Invalid federation URL: {e}")))?;
        url.query_pairs_mut()
            .clear()
            .append_pair("Action", "login")
            .append_pair("Issuer", &self.config.issuer)
            .append_pair("Destination", &destination(region))
            .append_pair("SigninToken", signin_token);
        Ok(url)
    }

    /// Sign-in URL for `credentials`. `region` overrides the configured one.
    pub async fn signin_url(
        &self,
        credentials: &CloudCredentials,
        region: Option<&str>,
    ) -> Result<Url> {
        let token = self.signin_token(credentials).await?;
        debug!("Obtained console sign-in token");
        self.login_url(&token, region.or(self.config.region.as_deref()))
    }
}
