//! Browser login: PKCE authorization-code flow over a loopback redirect.

use std::sync::Arc;

use async_trait::async_trait;
use broker_core::EnvironmentClass;
use tracing::{info, warn};

use super::callback::{CallbackListener, CodeRedeemer};
use super::client::OidcClient;
use super::discovery::ProviderMetadata;
use super::focus::FocusGuard;
use super::pkce::{PkcePair, generate_state};
use super::verify::IdentityVerifier;
use crate::config::{BrokerConfig, LoginConfig};
use crate::session::IdentitySession;
use crate::{Error, Result};

/// Opens the authorization URL for the user.
pub trait BrowserLauncher: Send + Sync {
    /// Present `url` to the user.
    fn launch(&self, url: &str) -> Result<()>;
}

/// System default browser; prints the URL when no browser can be opened.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn launch(&self, url: &str) -> Result<()> {
        info!("Opening browser for login");
        if let Err(e) = open::that(url) {
            warn!(error = %e, "Failed to open browser automatically");
            // stdout is reserved for credential output
            eprintln!("\nPlease log in by visiting:\n{url}\n");
        }
        Ok(())
    }
}

/// Produces a fresh identity session interactively.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Run a full login.
    async fn authenticate(&self) -> Result<IdentitySession>;
}

/// PKCE browser login for one stage and class.
pub struct LoginEngine {
    http: reqwest::Client,
    verifier: Arc<dyn IdentityVerifier>,
    launcher: Arc<dyn BrowserLauncher>,
    settings: LoginConfig,
    issuer: String,
    client_id: String,
    stage: String,
    class: EnvironmentClass,
}

impl LoginEngine {
    /// Create an engine for `stage`/`class` using the system browser.
    pub fn new(
        config: &BrokerConfig,
        stage: &str,
        class: EnvironmentClass,
        http: reqwest::Client,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Result<Self> {
        let stage_config = config.stage_config(stage)?;
        Ok(Self {
            http,
            verifier,
            launcher: Arc::new(SystemBrowser),
            settings: config.login.clone(),
            issuer: stage_config.issuer.clone(),
            client_id: stage_config.client_id(class).to_string(),
            stage: stage.to_string(),
            class,
        })
    }

    /// Replace the browser launcher.
    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Run the login and return the verified session. Persisting it is up
    /// to the caller.
    pub async fn login(&self) -> Result<IdentitySession> {
        let state = generate_state();
        let pkce = PkcePair::generate();

        let metadata = ProviderMetadata::discover(&self.http, &self.issuer).await?;
        if !metadata.supports_pkce() {
            return Err(Error::Authentication(format!(
                "Identity provider {} does not support S256 PKCE",
                self.issuer
            )));
        }

        let listener = CallbackListener::bind(&self.settings.redirect_uri).await?;
        let client = OidcClient::new(
            self.http.clone(),
            metadata,
            self.client_id.clone(),
            listener.redirect_uri(),
            self.settings.scopes.clone(),
        );
        let auth_url = client.authorization_url(&state, &pkce.challenge)?;

        let redemption = Arc::new(Redemption {
            client,
            verifier: Arc::clone(&self.verifier),
            code_verifier: pkce.verifier,
            issuer: self.issuer.clone(),
            stage: self.stage.clone(),
            class: self.class,
        });

        let focus = if self.settings.restore_focus {
            FocusGuard::capture()
        } else {
            FocusGuard::default()
        };

        let result = match self.launcher.launch(auth_url.as_str()) {
            Ok(()) => {
                listener
                    .wait(state, redemption, self.settings.timeout)
                    .await
            }
            Err(e) => Err(e),
        };

        focus.restore();
        result
    }
}

#[async_trait]
impl Authenticator for LoginEngine {
    async fn authenticate(&self) -> Result<IdentitySession> {
        self.login().await
    }
}

/// Code exchange and identity token verification for one login attempt
struct Redemption {
    client: OidcClient,
    verifier: Arc<dyn IdentityVerifier>,
    code_verifier: String,
    issuer: String,
    stage: String,
    class: EnvironmentClass,
}

#[async_trait]
impl CodeRedeemer for Redemption {
    async fn redeem(&self, code: &str) -> Result<IdentitySession> {
        let token = self.client.exchange_code(code, &self.code_verifier).await?;

        let id_token = token.id_token.clone().ok_or_else(|| {
            Error::Authentication("Token response did not include an id_token".to_string())
        })?;

        let identity = self
            .verifier
            .verify(&id_token, &self.issuer, self.client.client_id())
            .await?;

        let session = IdentitySession::from_token_response(
            token,
            id_token,
            &identity,
            self.client.client_id(),
            &self.stage,
            self.class,
        )?;

        info!(
            subject = %identity.subject,
            stage = %self.stage,
            class = %self.class,
            expiry = %session.expiry,
            "Granted identity session"
        );
        Ok(session)
    }
}
