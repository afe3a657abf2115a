//! Identity session cache and refresh.
//!
//! ```text
//!            now < expiry            expiry <= now <= expiry + window      later
//!   ──────────── Valid ────────────┼──────────── Refreshable ────────────┼── Expired
//! ```
//!
//! `Expired` is terminal: a new browser login is required and no network call
//! is made.

use std::sync::Arc;
use std::time::Duration;

use broker_core::EnvironmentClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::status::IdentityStatus;
use crate::config::BrokerConfig;
use crate::oidc::{IdentityVerifier, OidcClient, TokenResponse, VerifiedIdentity};
use crate::store::{self, IDENTITY_SESSION_PREFIX, SecureStore};
use crate::{Error, Result};

/// A completed login with the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySession {
    /// Raw identity token (JWT)
    pub id_token: String,
    /// Access token
    pub access_token: String,
    /// Token type (usually "Bearer")
    pub token_type: String,
    /// Refresh token, if the provider issued one
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token expiry
    pub expiry: DateTime<Utc>,
    /// Issuing authority
    pub issuer: String,
    /// Client the tokens were issued to
    pub client_id: String,
    /// Stage tag
    pub stage: String,
    /// Environment class tag
    pub environment: EnvironmentClass,
}

impl IdentitySession {
    /// Build a session from a token response whose identity token has been
    /// verified. An `expires_in` that does not fit a timestamp is rejected.
    pub fn from_token_response(
        token: TokenResponse,
        id_token: String,
        identity: &VerifiedIdentity,
        client_id: &str,
        stage: &str,
        environment: EnvironmentClass,
    ) -> Result<Self> {
        let expiry = token_expiry(token.expires_in, identity, Utc::now())?;
        Ok(Self {
            id_token,
            access_token: token.access_token,
            token_type: token.token_type.unwrap_or_else(|| "Bearer".to_string()),
            refresh_token: token.refresh_token,
            expiry,
            issuer: identity.issuer.clone(),
            client_id: client_id.to_string(),
            stage: stage.to_string(),
            environment,
        })
    }

    /// Replace the access token, expiry and identity token after a refresh.
    /// A rotated refresh token is adopted; otherwise the current one is kept.
    /// On error the session is left untouched.
    pub fn apply_refresh(
        &mut self,
        token: TokenResponse,
        verified: Option<(String, &VerifiedIdentity)>,
    ) -> Result<()> {
        let now = Utc::now();
        match verified {
            Some((id_token, identity)) => {
                self.expiry = token_expiry(token.expires_in, identity, now)?;
                self.id_token = id_token;
            }
            None => {
                if let Some(secs) = token.expires_in {
                    self.expiry = expires_in_to_expiry(secs, now)?;
                }
            }
        }
        self.access_token = token.access_token;
        if let Some(t) = token.token_type {
            self.token_type = t;
        }
        if let Some(rt) = token.refresh_token {
            self.refresh_token = Some(rt);
        }
        Ok(())
    }

    /// Storage key of this session.
    #[must_use]
    pub fn key(&self) -> String {
        store::identity_key(&self.stage, self.environment)
    }

    /// Classify this session at `now`.
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>, window: Duration) -> SessionState {
        SessionState::classify(self, now, window)
    }
}

fn token_expiry(
    expires_in: Option<u64>,
    identity: &VerifiedIdentity,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    if let Some(secs) = expires_in {
        return expires_in_to_expiry(secs, now);
    }
    Ok(i64::try_from(identity.expires_at)
        .ok()
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .unwrap_or(now))
}

fn expires_in_to_expiry(secs: u64, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| {
            Error::Authentication(format!("Token response has an out-of-range expires_in: {secs}"))
        })
}

/// Usability of a cached identity session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Access token has not expired.
    Valid,
    /// Expired, but within the refresh window.
    Refreshable,
    /// Expired beyond the refresh window.
    Expired,
}

impl SessionState {
    /// Classify `session` at `now` with the class's refresh `window`.
    #[must_use]
    pub fn classify(session: &IdentitySession, now: DateTime<Utc>, window: Duration) -> Self {
        if now < session.expiry {
            return Self::Valid;
        }
        let overdue = (now - session.expiry).to_std().unwrap_or(Duration::ZERO);
        if overdue <= window {
            Self::Refreshable
        } else {
            Self::Expired
        }
    }
}

/// Identity sessions in the secure store, refreshed on demand.
#[derive(Clone)]
pub struct IdentityCache {
    store: Arc<dyn SecureStore>,
    config: Arc<BrokerConfig>,
    http: reqwest::Client,
    verifier: Arc<dyn IdentityVerifier>,
}

impl IdentityCache {
    /// Create a cache over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn SecureStore>,
        config: Arc<BrokerConfig>,
        http: reqwest::Client,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Self {
        Self {
            store,
            config,
            http,
            verifier,
        }
    }

    /// The cached session, if any. Missing or corrupt entries are `None`.
    pub fn load(&self, stage: &str, class: EnvironmentClass) -> Result<Option<IdentitySession>> {
        store::load_entity(self.store.as_ref(), &store::identity_key(stage, class))
    }

    /// Report on the cached session without refreshing it.
    pub fn status(
        &self,
        stage: &str,
        class: EnvironmentClass,
        now: DateTime<Utc>,
    ) -> Result<Option<IdentityStatus>> {
        Ok(self.load(stage, class)?.map(|session| IdentityStatus {
            state: session.state(now, self.refresh_window(class)),
            remaining: (session.expiry - now).to_std().unwrap_or(Duration::ZERO),
            stage: session.stage,
            environment: session.environment,
            expiry: session.expiry,
        }))
    }

    /// Persist a session, replacing any previous one for its stage and class.
    pub fn store(&self, session: &IdentitySession) -> Result<()> {
        let label = format!(
            "Identity session ({}, {})",
            session.stage, session.environment
        );
        store::save_entity(self.store.as_ref(), &session.key(), &label, session)?;
        debug!(stage = %session.stage, class = %session.environment, expiry = %session.expiry, "Stored identity session");
        Ok(())
    }

    /// A usable session: returned as is while valid, refreshed inside the
    /// refresh window, an error otherwise.
    pub async fn current(&self, stage: &str, class: EnvironmentClass) -> Result<IdentitySession> {
        let session = self.require(stage, class)?;
        match session.state(Utc::now(), self.refresh_window(class)) {
            SessionState::Valid => Ok(session),
            SessionState::Refreshable => self.refresh_session(session).await,
            SessionState::Expired => Err(expired(stage, class)),
        }
    }

    /// Force a refresh of the cached session.
    pub async fn refresh(&self, stage: &str, class: EnvironmentClass) -> Result<IdentitySession> {
        let session = self.require(stage, class)?;
        if session.state(Utc::now(), self.refresh_window(class)) == SessionState::Expired {
            return Err(expired(stage, class));
        }
        self.refresh_session(session).await
    }

    /// Remove the session for a stage and class.
    pub fn delete(&self, stage: &str, class: EnvironmentClass) -> Result<()> {
        self.store.remove(&store::identity_key(stage, class))?;
        info!(stage, class = %class, "Deleted identity session");
        Ok(())
    }

    /// Remove every identity session.
    pub fn delete_all(&self) -> Result<usize> {
        let keys: Vec<String> = self
            .store
            .list()?
            .into_iter()
            .filter(|k| store::has_prefix(k, IDENTITY_SESSION_PREFIX))
            .collect();
        for key in &keys {
            self.store.remove(key)?;
        }
        info!(count = keys.len(), "Deleted identity sessions");
        Ok(keys.len())
    }

    fn refresh_window(&self, class: EnvironmentClass) -> Duration {
        self.config.class_policy(class).refresh_window
    }

    fn require(&self, stage: &str, class: EnvironmentClass) -> Result<IdentitySession> {
        self.load(stage, class)?.ok_or_else(|| Error::LoginRequired {
            stage: stage.to_string(),
            class: class.to_string(),
        })
    }

    async fn refresh_session(&self, mut session: IdentitySession) -> Result<IdentitySession> {
        let (stage, class) = (session.stage.clone(), session.environment);
        let Some(refresh_token) = session.refresh_token.clone() else {
            warn!(stage = %stage, class = %class, "Session has no refresh token");
            return Err(expired(&stage, class));
        };

        let client = OidcClient::discover(
            self.http.clone(),
            &session.issuer,
            session.client_id.clone(),
            self.config.login.redirect_uri.clone(),
            self.config.login.scopes.clone(),
        )
        .await?;

        let token = match client.refresh(&refresh_token).await {
            Ok(t) => t,
            Err(Error::Http { status, message }) if status == 400 || status == 401 => {
                warn!(stage = %stage, class = %class, %message, "Refresh token rejected, discarding session");
                self.delete(&stage, class)?;
                return Err(expired(&stage, class));
            }
            Err(e) => return Err(e),
        };

        match token.id_token.clone() {
            Some(id_token) => {
                let identity = self
                    .verifier
                    .verify(&id_token, &session.issuer, &session.client_id)
                    .await?;
                session.apply_refresh(token, Some((id_token, &identity)))?;
            }
            None => {
                debug!("Refresh response carried no identity token, keeping the current one");
                session.apply_refresh(token, None)?;
            }
        }

        self.store(&session)?;
        info!(stage = %stage, class = %class, expiry = %session.expiry, "Refreshed identity session");
        Ok(session)
    }
}

fn expired(stage: &str, class: EnvironmentClass) -> Error {
    Error::SessionExpired {
        stage: stage.to_string(),
        class: class.to_string(),
    }
}
