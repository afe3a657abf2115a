//! Authorization service.
//!
//! Verifies a caller's identity token, resolves the cloud roles their
//! directory groups grant for the requested environment class, and either
//! lists those roles or assumes one of them.
//!
//! Both operations return [`AuthzError`] on failure, which the HTTP layer
//! renders as `406`, `401` or `500`.

mod assume;
pub mod audit;
mod client;
mod directory;
mod handler;
mod wire;

use std::sync::Arc;
use std::time::Duration;

use broker_core::{EnvironmentClass, role};
use thiserror::Error;
use tracing::{debug, warn};

pub use assume::{AssumeParams, RoleAssumer};
#[cfg(feature = "sts")]
pub use assume::StsRoleAssumer;
pub use client::AuthzClient;
pub use directory::{DirectoryLookup, HttpDirectory, StaticDirectory};
pub use handler::{authz_routes, serve};
pub use wire::{
    AssumeRoleRequest, AssumeRoleResponse, AssumedRoleUser, CALLER_HEADER, Caller, Credentials,
    ENVIRONMENT_HEADER, ErrorBody, GroupsResponse, STAGE_HEADER,
};

use crate::config::BrokerConfig;
use crate::oidc::{IdentityVerifier, VerifiedIdentity};

/// Authorization decision failures, one per response status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthzError {
    /// Malformed request (406)
    #[error("{0}")]
    NotAcceptable(String),
    /// Token rejected or role not permitted (401)
    #[error("{0}")]
    Unauthorized(String),
    /// Backend failure (500)
    #[error("{0}")]
    Internal(String),
}

impl AuthzError {
    /// HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::NotAcceptable(_) => 406,
            Self::Unauthorized(_) => 401,
            Self::Internal(_) => 500,
        }
    }
}

/// Stateless authorization decisions.
pub struct AuthorizationService {
    config: Arc<BrokerConfig>,
    verifier: Arc<dyn IdentityVerifier>,
    directory: Arc<dyn DirectoryLookup>,
    assumer: Arc<dyn RoleAssumer>,
}

impl AuthorizationService {
    /// Create a service.
    #[must_use]
    pub fn new(
        config: Arc<BrokerConfig>,
        verifier: Arc<dyn IdentityVerifier>,
        directory: Arc<dyn DirectoryLookup>,
        assumer: Arc<dyn RoleAssumer>,
    ) -> Self {
        Self {
            config,
            verifier,
            directory,
            assumer,
        }
    }

    /// Service configuration
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Verify `token` for the client registered for `stage` and `class`.
    pub async fn identify(
        &self,
        token: &str,
        stage: &str,
        class: EnvironmentClass,
    ) -> Result<VerifiedIdentity, AuthzError> {
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
        if token.is_empty() {
            return Err(AuthzError::Unauthorized("missing id-token".to_string()));
        }
        let stage_config = self
            .config
            .stage_config(stage)
            .map_err(|e| AuthzError::NotAcceptable(e.to_string()))?;

        self.verifier
            .verify(token, &stage_config.issuer, stage_config.client_id(class))
            .await
            .map_err(|e| AuthzError::Unauthorized(format!("Invalid id-token: {e}")))
    }

    /// Role ARNs `identity` may assume in `class`, sorted.
    pub async fn permitted_roles(
        &self,
        identity: &VerifiedIdentity,
        class: EnvironmentClass,
    ) -> Result<Vec<String>, AuthzError> {
        let groups = self
            .directory
            .groups(&identity.email)
            .await
            .map_err(|e| AuthzError::Internal(format!("Directory lookup failed: {e}")))?;

        for malformed in groups
            .iter()
            .filter(|g| role::is_role_group(g) && role::group_to_role(g).is_none())
        {
            warn!(group = %malformed, "Skipping malformed role group");
        }

        let arns = role::permitted_role_arns(&groups, class, &self.config.server.restricted_marker);
        debug!(email = %identity.email, class = %class, count = arns.len(), "Resolved permitted roles");
        Ok(arns)
    }

    /// List the role ARNs the bearer of `token` may assume.
    pub async fn groups(
        &self,
        token: &str,
        stage: &str,
        class: EnvironmentClass,
    ) -> Result<(VerifiedIdentity, GroupsResponse), AuthzError> {
        let identity = self.identify(token, stage, class).await?;
        let groups = self.permitted_roles(&identity, class).await?;
        Ok((identity, GroupsResponse { groups }))
    }

    /// Assume `request.role_arn` for the bearer of `token`.
    pub async fn assume(
        &self,
        token: &str,
        stage: &str,
        class: EnvironmentClass,
        request: &AssumeRoleRequest,
    ) -> Result<(VerifiedIdentity, AssumeRoleResponse), AuthzError> {
        let identity = self.identify(token, stage, class).await?;

        if request.role_arn.is_empty() {
            return Err(AuthzError::NotAcceptable("missing role_arn".to_string()));
        }
        if !role::is_valid_role_arn(&request.role_arn) {
            return Err(AuthzError::NotAcceptable(format!(
                "invalid role-arn: {}",
                request.role_arn
            )));
        }

        let requested = request.duration_seconds.map(Duration::from_secs);
        let duration = self
            .config
            .class_policy(class)
            .duration
            .resolve(requested)
            .map_err(|e| AuthzError::NotAcceptable(e.to_string()))?;

        let permitted = self.permitted_roles(&identity, class).await?;
        if !permitted.contains(&request.role_arn) {
            return Err(AuthzError::Unauthorized(format!(
                "({class}) User: {} cannot assume role: {}",
                identity.email, request.role_arn
            )));
        }

        let params = AssumeParams {
            role_arn: request.role_arn.clone(),
            session_name: role::role_session_name(&identity.email, &identity.subject),
            duration_seconds: duration.as_secs(),
            policy: request.policy.clone().filter(|p| !p.is_empty()),
        };
        let response = self
            .assumer
            .assume_role(&params)
            .await
            .map_err(|e| AuthzError::Internal(e.to_string()))?;

        Ok((identity, response))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use broker_core::ClassTable;
    use chrono::Utc;
    use parking_lot::Mutex;

    use super::*;
    use crate::config::StageConfig;
    use crate::oidc::OidcError;

    struct FixedVerifier;

    #[async_trait]
    impl IdentityVerifier for FixedVerifier {
        async fn verify(
            &self,
            token: &str,
            issuer: &str,
            audience: &str,
        ) -> Result<VerifiedIdentity, OidcError> {
            if token != "good" || audience != "nonpci-client" {
                return Err(OidcError::Discovery("bad token".to_string()));
            }
            Ok(VerifiedIdentity {
                subject: "00u1".to_string(),
                email: "alice@example.com".to_string(),
                name: None,
                issuer: issuer.to_string(),
                expires_at: 2_000_000_000,
            })
        }
    }

    #[derive(Default)]
    struct RecordingAssumer {
        calls: Mutex<Vec<AssumeParams>>,
    }

    #[async_trait]
    impl RoleAssumer for RecordingAssumer {
        async fn assume_role(&self, params: &AssumeParams) -> crate::Result<AssumeRoleResponse> {
            self.calls.lock().push(params.clone());
            Ok(AssumeRoleResponse {
                credentials: Credentials {
                    access_key_id: "AKIA".to_string(),
                    secret_access_key: "secret".to_string(),
                    session_token: "token".to_string(),
                    expiration: Some(Utc::now()),
                },
                assumed_role_user: AssumedRoleUser {
                    assumed_role_id: format!("AROA:{}", params.session_name),
                    arn: String::new(),
                },
            })
        }
    }

    /// Directory that is always unreachable
    #[derive(Default)]
    struct DownDirectory {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DirectoryLookup for DownDirectory {
        async fn groups(&self, _email: &str) -> crate::Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(crate::Error::Http {
                status: 503,
                message: "directory unavailable".to_string(),
            })
        }
    }

    fn service(assumer: Arc<RecordingAssumer>) -> AuthorizationService {
        let directory = StaticDirectory::new(BTreeMap::from([(
            "alice@example.com".to_string(),
            vec![
                "AWS#TeamB-Role#222222222222".to_string(),
                "AWS#TeamA-Role#111111111111".to_string(),
                "AWS#TeamA-PCI-Role#333333333333".to_string(),
                "AWS#broken".to_string(),
                "Staff".to_string(),
            ],
        )]));
        service_with(Arc::new(directory), assumer)
    }

    fn service_with(
        directory: Arc<dyn DirectoryLookup>,
        assumer: Arc<RecordingAssumer>,
    ) -> AuthorizationService {
        let mut config = BrokerConfig::default();
        config.stages.insert(
            "prod".to_string(),
            StageConfig {
                issuer: "https://idp.example.com".to_string(),
                authorization_service: "https://authz.example.com".to_string(),
                client_ids: ClassTable {
                    pci: "pci-client".to_string(),
                    nonpci: "nonpci-client".to_string(),
                },
            },
        );
        AuthorizationService::new(Arc::new(config), Arc::new(FixedVerifier), directory, assumer)
    }

    fn request(arn: &str, duration: Option<u64>) -> AssumeRoleRequest {
        AssumeRoleRequest {
            role_arn: arn.to_string(),
            role_session_name: Some("ignored".to_string()),
            duration_seconds: duration,
            policy: None,
        }
    }

    #[tokio::test]
    async fn groups_lists_sorted_standard_roles() {
        let svc = service(Arc::default());
        let (_, resp) = svc
            .groups("Bearer good", "prod", EnvironmentClass::Standard)
            .await
            .unwrap();
        assert_eq!(
            resp.groups,
            vec![
                "arn:aws:iam::111111111111:role/TeamA-Role",
                "arn:aws:iam::222222222222:role/TeamB-Role",
            ]
        );
    }

    #[tokio::test]
    async fn bad_token_is_unauthorized() {
        let svc = service(Arc::default());
        let err = svc
            .groups("forged", "prod", EnvironmentClass::Standard)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 401);
    }

    #[tokio::test]
    async fn assume_uses_derived_session_name() {
        let assumer = Arc::new(RecordingAssumer::default());
        let svc = service(assumer.clone());
        let (identity, resp) = svc
            .assume(
                "good",
                "prod",
                EnvironmentClass::Standard,
                &request("arn:aws:iam::111111111111:role/TeamA-Role", Some(3600)),
            )
            .await
            .unwrap();
        assert_eq!(identity.email, "alice@example.com");
        assert_eq!(resp.assumed_role_user.session_name(), "alice@example.com");

        let calls = assumer.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].session_name, "alice@example.com");
        assert_eq!(calls[0].duration_seconds, 3600);
    }

    #[tokio::test]
    async fn assume_defaults_duration_for_class() {
        let assumer = Arc::new(RecordingAssumer::default());
        let svc = service(assumer.clone());
        svc.assume(
            "good",
            "prod",
            EnvironmentClass::Standard,
            &request("arn:aws:iam::111111111111:role/TeamA-Role", Some(0)),
        )
        .await
        .unwrap();
        let expected = broker_core::DurationPolicy::standard().default.as_secs();
        assert_eq!(assumer.calls.lock()[0].duration_seconds, expected);
    }

    #[tokio::test]
    async fn assume_rejects_unpermitted_role() {
        let assumer = Arc::new(RecordingAssumer::default());
        let svc = service(assumer.clone());
        let err = svc
            .assume(
                "good",
                "prod",
                EnvironmentClass::Standard,
                &request("arn:aws:iam::333333333333:role/TeamA-PCI-Role", None),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), 401);
        assert_eq!(
            err.to_string(),
            "(nonpci) User: alice@example.com cannot assume role: arn:aws:iam::333333333333:role/TeamA-PCI-Role"
        );
        assert!(assumer.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn assume_rejects_malformed_input() {
        let svc = service(Arc::default());
        for req in [
            request("", None),
            request("arn:aws:iam::1:role/x", None),
            request("arn:aws:iam::111111111111:role/TeamA-Role", Some(10)),
            request("arn:aws:iam::111111111111:role/TeamA-Role", Some(48 * 3600)),
        ] {
            let err = svc
                .assume("good", "prod", EnvironmentClass::Standard, &req)
                .await
                .unwrap_err();
            assert_eq!(err.status(), 406, "{req:?}");
        }
    }

    #[tokio::test]
    async fn malformed_input_is_rejected_before_directory_lookup() {
        // GIVEN: a directory that cannot be reached
        let directory = Arc::new(DownDirectory::default());
        let svc = service_with(directory.clone(), Arc::default());

        // WHEN: requests fail validation
        for req in [
            request("", None),
            request("not-an-arn", None),
            request("arn:aws:iam::111111111111:role/TeamA-Role", Some(10)),
        ] {
            let err = svc
                .assume("good", "prod", EnvironmentClass::Standard, &req)
                .await
                .unwrap_err();
            // THEN: client error, directory never consulted
            assert_eq!(err.status(), 406, "{req:?}");
        }
        assert_eq!(directory.calls.load(Ordering::SeqCst), 0);

        // a well-formed request does reach the directory
        let err = svc
            .assume(
                "good",
                "prod",
                EnvironmentClass::Standard,
                &request("arn:aws:iam::111111111111:role/TeamA-Role", None),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), 500);
        assert_eq!(directory.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_stage_is_not_acceptable() {
        let svc = service(Arc::default());
        let err = svc
            .groups("good", "qa", EnvironmentClass::Standard)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 406);
    }
}
