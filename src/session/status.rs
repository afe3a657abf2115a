//! Read-only report on the cached sessions (`info`).

use std::fmt;
use std::time::Duration;

use broker_core::{EnvironmentClass, format_duration, role};
use chrono::{DateTime, SecondsFormat, Utc};

use super::identity::SessionState;

/// Cached identity session at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityStatus {
    /// Stage tag
    pub stage: String,
    /// Environment class tag
    pub environment: EnvironmentClass,
    /// Access token expiry
    pub expiry: DateTime<Utc>,
    /// Usability under the class's refresh window
    pub state: SessionState,
    /// Time left before expiry; zero once expired
    pub remaining: Duration,
}

/// Cached cloud session of one profile at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudStatus {
    /// Profile the session is cached under
    pub profile: String,
    /// Role the credentials were issued for
    pub role_arn: String,
    /// Class the credentials were issued under
    pub environment: EnvironmentClass,
    /// Credential expiry
    pub expiration: DateTime<Utc>,
    /// Time left before expiry; zero once expired
    pub remaining: Duration,
    /// Whether the next request would reuse it without any network call
    pub resumable: bool,
}

impl CloudStatus {
    /// Account the role lives in
    #[must_use]
    pub fn account_id(&self) -> Option<&str> {
        role::account_id_of(&self.role_arn)
    }

    /// Role name without the ARN prefix
    #[must_use]
    pub fn role_name(&self) -> Option<&str> {
        role::role_name_of(&self.role_arn)
    }
}

/// Both cached sessions for a profile, stage and class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Identity session, if cached
    pub identity: Option<IdentityStatus>,
    /// Cloud session, if cached
    pub cloud: Option<CloudStatus>,
}

fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.identity {
            Some(ref id) => {
                let state = match id.state {
                    SessionState::Valid => "valid",
                    SessionState::Refreshable => "refreshable",
                    SessionState::Expired => "expired, login required",
                };
                writeln!(f, "Identity session:")?;
                writeln!(f, "\tStage: {}", id.stage)?;
                writeln!(f, "\tEnvironment: {}", id.environment)?;
                writeln!(
                    f,
                    "\tExpiration: {} ({}, {state})",
                    timestamp(&id.expiry),
                    format_duration(id.remaining)
                )?;
            }
            None => writeln!(f, "Identity session: none")?,
        }

        match self.cloud {
            Some(ref cloud) => {
                let state = if cloud.resumable {
                    "resumable"
                } else {
                    "will be reissued"
                };
                writeln!(f, "Cloud session ({}):", cloud.profile)?;
                writeln!(f, "\tAccountId: {}", cloud.account_id().unwrap_or("unknown"))?;
                writeln!(f, "\tRoleName: {}", cloud.role_name().unwrap_or(&cloud.role_arn))?;
                writeln!(f, "\tEnvironment: {}", cloud.environment)?;
                write!(
                    f,
                    "\tExpiration: {} ({}, {state})",
                    timestamp(&cloud.expiration),
                    format_duration(cloud.remaining)
                )
            }
            None => write!(f, "Cloud session: none"),
        }
    }
}
