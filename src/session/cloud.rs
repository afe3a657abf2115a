//! Cloud session provider: assumed-role credentials per profile.
//!
//! A cached session is resumed without any network call while it was issued
//! for the requested role and class and its remaining lifetime is at least
//! the class's resume threshold. Otherwise the identity session is obtained
//! (refreshing it if needed) and new credentials are requested from the
//! authorization service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker_core::{EnvironmentClass, role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::identity::{IdentityCache, IdentitySession};
use super::status::{CloudStatus, SessionStatus};
use crate::authz::{AssumeRoleRequest, AssumeRoleResponse};
use crate::config::{BrokerConfig, ClassPolicy};
use crate::oidc::Authenticator;
use crate::store::{self, CLOUD_SESSION_PREFIX, SecureStore};
use crate::{Error, Result};

/// Temporary cloud API credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudCredentials {
    /// Access key id
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Session token
    pub session_token: String,
    /// Absolute expiry
    pub expiration: DateTime<Utc>,
}

/// Cached assumed-role session for one profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudSession {
    /// The credentials
    #[serde(flatten)]
    pub credentials: CloudCredentials,
    /// Role session name assigned by the authorization service
    pub session_name: String,
    /// Role the credentials were issued for
    pub role_arn: String,
    /// Class the credentials were issued under
    pub environment: EnvironmentClass,
}

impl CloudSession {
    /// Build from an authorization service response, rejecting incomplete
    /// credentials.
    pub fn from_response(
        response: AssumeRoleResponse,
        role_arn: &str,
        environment: EnvironmentClass,
    ) -> Result<Self> {
        let missing = response.credentials.missing_fields();
        let Some(expiration) = response.credentials.expiration.filter(|_| missing.is_empty())
        else {
            return Err(Error::Http {
                status: 502,
                message: format!(
                    "Authorization service returned incomplete credentials (missing {})",
                    missing.join(", ")
                ),
            });
        };

        Ok(Self {
            session_name: response.assumed_role_user.session_name().to_string(),
            credentials: CloudCredentials {
                access_key_id: response.credentials.access_key_id,
                secret_access_key: response.credentials.secret_access_key,
                session_token: response.credentials.session_token,
                expiration,
            },
            role_arn: role_arn.to_string(),
            environment,
        })
    }

    /// Lifetime left at `now`; zero once expired.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.credentials.expiration - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Issues role credentials for a verified identity.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Assume `request.role_arn` for the bearer of `id_token`.
    async fn assume(
        &self,
        id_token: &str,
        stage: &str,
        class: EnvironmentClass,
        request: &AssumeRoleRequest,
    ) -> Result<AssumeRoleResponse>;

    /// Role ARNs the bearer of `id_token` may assume.
    async fn groups(&self, id_token: &str, stage: &str, class: EnvironmentClass)
    -> Result<Vec<String>>;
}

/// Cloud session provider for one profile, stage and class.
pub struct CloudProvider {
    profile: String,
    stage: String,
    class: EnvironmentClass,
    policy: ClassPolicy,
    store: Arc<dyn SecureStore>,
    identity: IdentityCache,
    issuer: Arc<dyn CredentialIssuer>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl CloudProvider {
    /// Create a provider without interactive login fallback.
    #[must_use]
    pub fn new(
        config: &BrokerConfig,
        profile: &str,
        stage: &str,
        class: EnvironmentClass,
        store: Arc<dyn SecureStore>,
        identity: IdentityCache,
        issuer: Arc<dyn CredentialIssuer>,
    ) -> Self {
        Self {
            profile: profile.to_string(),
            stage: stage.to_string(),
            class,
            policy: *config.class_policy(class),
            store,
            identity,
            issuer,
            authenticator: None,
        }
    }

    /// Run `authenticator` when no usable identity session exists.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Profile name
    #[must_use]
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Credentials for `role_arn`, resumed from cache or newly issued.
    pub async fn retrieve(
        &self,
        role_arn: &str,
        duration: Option<Duration>,
    ) -> Result<CloudCredentials> {
        let duration = self.policy.duration.resolve(duration)?;
        if !role::is_valid_role_arn(role_arn) {
            return Err(Error::Validation(format!("Malformed role ARN: {role_arn}")));
        }

        if self.switch_role(role_arn)? {
            info!(profile = %self.profile, role_arn, "Role changed, discarded previous cloud session");
        }

        if let Some(session) = self.resume_candidate(Utc::now())? {
            info!(
                profile = %self.profile,
                role_arn,
                remaining = %broker_core::format_duration(session.remaining(Utc::now())),
                "Resuming cloud session"
            );
            return Ok(session.credentials);
        }

        let identity = self.identity_session().await?;
        let request = AssumeRoleRequest {
            role_arn: role_arn.to_string(),
            role_session_name: None,
            duration_seconds: Some(duration.as_secs()),
            policy: None,
        };
        let response = self
            .issuer
            .assume(&identity.id_token, &self.stage, self.class, &request)
            .await?;

        let session = CloudSession::from_response(response, role_arn, self.class)?;
        let label = format!("Cloud session ({})", self.profile);
        store::save_entity(
            self.store.as_ref(),
            &store::cloud_key(&self.profile),
            &label,
            &session,
        )?;

        info!(
            profile = %self.profile,
            role_arn,
            session_name = %session.session_name,
            expiration = %session.credentials.expiration,
            "Issued cloud session"
        );
        Ok(session.credentials)
    }

    /// The cached session, if any.
    pub fn cached(&self) -> Result<Option<CloudSession>> {
        store::load_entity(self.store.as_ref(), &store::cloud_key(&self.profile))
    }

    /// The cached session if it may be reused at `now`.
    pub fn resume_candidate(&self, now: DateTime<Utc>) -> Result<Option<CloudSession>> {
        let Some(session) = self.cached()? else {
            return Ok(None);
        };
        let remaining = session.remaining(now);
        if session.environment == self.class && remaining >= self.policy.resume_threshold {
            Ok(Some(session))
        } else {
            debug!(
                profile = %self.profile,
                remaining = %broker_core::format_duration(remaining),
                threshold = %broker_core::format_duration(self.policy.resume_threshold),
                "Cached cloud session not resumable"
            );
            Ok(None)
        }
    }

    /// Report on the cached identity and cloud sessions without any network
    /// call.
    pub fn status(&self, now: DateTime<Utc>) -> Result<SessionStatus> {
        let identity = self.identity.status(&self.stage, self.class, now)?;
        let resumable = self.resume_candidate(now)?.is_some();
        let cloud = self.cached()?.map(|session| CloudStatus {
            profile: self.profile.clone(),
            remaining: session.remaining(now),
            role_arn: session.role_arn,
            environment: session.environment,
            expiration: session.credentials.expiration,
            resumable,
        });
        Ok(SessionStatus { identity, cloud })
    }

    /// Discard the cached session.
    pub fn delete_session(&self) -> Result<()> {
        self.store.remove(&store::cloud_key(&self.profile))?;
        info!(profile = %self.profile, "Deleted cloud session");
        Ok(())
    }

    /// Discard the cached session if it was issued for another role or
    /// class. Returns whether anything was discarded.
    pub fn switch_role(&self, role_arn: &str) -> Result<bool> {
        match self.cached()? {
            Some(s) if s.role_arn != role_arn || s.environment != self.class => {
                self.delete_session()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// The role to request: `requested` when given, else the role of this
    /// profile's cached session, else the only permitted role.
    pub async fn resolve_role(&self, requested: Option<&str>) -> Result<String> {
        if let Some(role) = requested {
            return Ok(role.to_string());
        }
        if let Some(session) = self.cached()?.filter(|s| s.environment == self.class) {
            debug!(profile = %self.profile, role_arn = %session.role_arn, "Using role of cached cloud session");
            return Ok(session.role_arn);
        }
        select_role(None, &self.groups().await?)
    }

    /// Role ARNs the current identity may assume.
    pub async fn groups(&self) -> Result<Vec<String>> {
        let identity = self.identity_session().await?;
        let mut groups = self
            .issuer
            .groups(&identity.id_token, &self.stage, self.class)
            .await?;
        groups.sort();
        Ok(groups)
    }

    async fn identity_session(&self) -> Result<IdentitySession> {
        match self.identity.current(&self.stage, self.class).await {
            Ok(session) => Ok(session),
            Err(e) if e.needs_login() => {
                let Some(ref authenticator) = self.authenticator else {
                    return Err(e);
                };
                info!(reason = %e, "Starting browser login");
                let session = authenticator.authenticate().await?;
                self.identity.store(&session)?;
                Ok(session)
            }
            Err(e) => Err(e),
        }
    }
}

/// Remove every cached cloud session.
pub fn delete_all_cloud_sessions(store: &dyn SecureStore) -> Result<usize> {
    let keys: Vec<String> = store
        .list()?
        .into_iter()
        .filter(|k| store::has_prefix(k, CLOUD_SESSION_PREFIX))
        .collect();
    for key in &keys {
        store.remove(key)?;
    }
    info!(count = keys.len(), "Deleted cloud sessions");
    Ok(keys.len())
}

/// Pick the role to assume.
///
/// An explicit role must be among the permitted ones. Without one, a single
/// permitted role is chosen automatically.
pub fn select_role(requested: Option<&str>, permitted: &[String]) -> Result<String> {
    match requested {
        Some(role) if permitted.iter().any(|p| p == role) => Ok(role.to_string()),
        Some(role) => Err(Error::Authorization(format!(
            "Invalid role_arn ({role}): (malformed or not-authorized)"
        ))),
        None => match permitted {
            [only] => Ok(only.clone()),
            [] => Err(Error::Authorization(
                "No roles are permitted for this identity".to_string(),
            )),
            many => Err(Error::Validation(format!(
                "Multiple roles permitted, choose one with --role-arn:\n  {}",
                many.join("\n  ")
            ))),
        },
    }
}
