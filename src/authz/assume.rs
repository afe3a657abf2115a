//! Role assumption backends.

use async_trait::async_trait;

use super::wire::{AssumeRoleResponse, AssumedRoleUser, Credentials};
use crate::{Error, Result};

/// Parameters for one role assumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeParams {
    /// Role to assume
    pub role_arn: String,
    /// Session name derived from the caller's identity
    pub session_name: String,
    /// Session lifetime in seconds
    pub duration_seconds: u64,
    /// Optional session policy document
    pub policy: Option<String>,
}

/// Exchanges a role ARN for temporary credentials.
#[async_trait]
pub trait RoleAssumer: Send + Sync {
    /// Assume the role described by `params`.
    async fn assume_role(&self, params: &AssumeParams) -> Result<AssumeRoleResponse>;
}

/// Build the service response from an assume-role result, refusing one
/// without complete credentials.
#[cfg_attr(not(feature = "sts"), allow(dead_code))]
fn assumed_role_response(
    credentials: Option<Credentials>,
    assumed_role_user: Option<AssumedRoleUser>,
) -> Result<AssumeRoleResponse> {
    let credentials = credentials.ok_or_else(|| {
        Error::Internal("sts:AssumeRole returned no credentials".to_string())
    })?;
    let missing = credentials.missing_fields();
    if !missing.is_empty() {
        return Err(Error::Internal(format!(
            "sts:AssumeRole returned incomplete credentials (missing {})",
            missing.join(", ")
        )));
    }
    Ok(AssumeRoleResponse {
        credentials,
        assumed_role_user: assumed_role_user.unwrap_or_default(),
    })
}

#[cfg(feature = "sts")]
pub use sts::StsRoleAssumer;

#[cfg(feature = "sts")]
mod sts {
    use async_trait::async_trait;
    use aws_config::BehaviorVersion;
    use chrono::DateTime;
    use tracing::debug;

    use super::{AssumeParams, RoleAssumer, assumed_role_response};
    use crate::authz::wire::{AssumeRoleResponse, AssumedRoleUser, Credentials};
    use crate::{Error, Result};

    /// Role assumption through AWS STS with the ambient AWS credentials.
    pub struct StsRoleAssumer {
        client: aws_sdk_sts::Client,
    }

    impl StsRoleAssumer {
        /// Build a client from the default AWS configuration chain.
        pub async fn from_env() -> Self {
            let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
            Self {
                client: aws_sdk_sts::Client::new(&config),
            }
        }
    }

    #[async_trait]
    impl RoleAssumer for StsRoleAssumer {
        async fn assume_role(&self, params: &AssumeParams) -> Result<AssumeRoleResponse> {
            let duration = i32::try_from(params.duration_seconds)
                .map_err(|_| Error::Validation("Duration out of range".to_string()))?;
            debug!(role_arn = %params.role_arn, session_name = %params.session_name, duration, "Calling sts:AssumeRole");

            let output = self
                .client
                .assume_role()
                .role_arn(&params.role_arn)
                .role_session_name(&params.session_name)
                .duration_seconds(duration)
                .set_policy(params.policy.clone())
                .send()
                .await
                .map_err(|e| Error::Internal(format!("sts:AssumeRole failed: {e}")))?;

            let credentials = output.credentials().map(|c| Credentials {
                access_key_id: c.access_key_id().to_string(),
                secret_access_key: c.secret_access_key().to_string(),
                session_token: c.session_token().to_string(),
                expiration: DateTime::from_timestamp(c.expiration().secs(), 0),
            });
            let assumed_role_user = output.assumed_role_user().map(|u| AssumedRoleUser {
                assumed_role_id: u.assumed_role_id().to_string(),
                arn: u.arn().to_string(),
            });

            assumed_role_response(credentials, assumed_role_user)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            access_key_id: "ASIA".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "token".to_string(),
            expiration: Some(Utc::now()),
        }
    }

    #[test]
    fn missing_credentials_are_an_internal_error() {
        let err = assumed_role_response(None, None).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(err.to_string().contains("returned no credentials"));
    }

    #[test]
    fn incomplete_credentials_are_an_internal_error() {
        let mut partial = credentials();
        partial.session_token.clear();
        let err = assumed_role_response(Some(partial), None).unwrap_err();
        assert!(err.to_string().contains("SessionToken"), "{err}");
    }

    #[test]
    fn complete_credentials_pass_through() {
        let expected = credentials();
        let response = assumed_role_response(Some(expected.clone()), None).unwrap();
        assert_eq!(response.credentials, expected);
        assert_eq!(response.assumed_role_user, AssumedRoleUser::default());
    }
}
