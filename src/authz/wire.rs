//! Authorization service HTTP contract.
//!
//! Request headers: `Authorization` (identity token, optional `Bearer `
//! prefix), `Stage`, `Environment`, `Caller`, `Content-Type: application/json`.
//! Field names follow the STS API casing.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stage header
pub const STAGE_HEADER: &str = "stage";
/// Environment class header
pub const ENVIRONMENT_HEADER: &str = "environment";
/// Operation selector header
pub const CALLER_HEADER: &str = "caller";

/// Operation requested through the `Caller` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    /// List permitted role ARNs
    Groups,
    /// Assume a permitted role
    Assume,
}

impl Caller {
    /// Header value
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Groups => "groups",
            Self::Assume => "assume",
        }
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Caller {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "groups" => Ok(Self::Groups),
            // "authenticate" is the legacy name of the assume operation
            "assume" | "authenticate" => Ok(Self::Assume),
            other => Err(format!("Unknown caller: {other}")),
        }
    }
}

/// Body of an assume request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssumeRoleRequest {
    /// Role to assume
    #[serde(default)]
    pub role_arn: String,
    /// Accepted for compatibility; the service derives the name itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_session_name: Option<String>,
    /// Requested session lifetime; class default when absent or zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    /// Optional session policy document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
}

/// Temporary credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Credentials {
    /// Access key id
    #[serde(default)]
    pub access_key_id: String,
    /// Secret access key
    #[serde(default)]
    pub secret_access_key: String,
    /// Session token
    #[serde(default)]
    pub session_token: String,
    /// Expiration (RFC 3339)
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
}

impl Credentials {
    /// Names of required fields that are empty.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.access_key_id.is_empty() {
            missing.push("AccessKeyId");
        }
        if self.secret_access_key.is_empty() {
            missing.push("SecretAccessKey");
        }
        if self.session_token.is_empty() {
            missing.push("SessionToken");
        }
        if self.expiration.is_none() {
            missing.push("Expiration");
        }
        missing
    }
}

/// The assumed role session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssumedRoleUser {
    /// `<role id>:<session name>`
    #[serde(default)]
    pub assumed_role_id: String,
    /// `arn:aws:sts::<account>:assumed-role/<role>/<session name>`
    #[serde(default)]
    pub arn: String,
}

impl AssumedRoleUser {
    /// Session name portion of the assumed role id.
    #[must_use]
    pub fn session_name(&self) -> &str {
        self.assumed_role_id
            .rsplit_once(':')
            .map_or(self.assumed_role_id.as_str(), |(_, name)| name)
    }
}

/// Successful assume response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssumeRoleResponse {
    /// Temporary credentials
    #[serde(default)]
    pub credentials: Credentials,
    /// Assumed role session
    #[serde(default)]
    pub assumed_role_user: AssumedRoleUser,
}

/// Successful groups response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupsResponse {
    /// Permitted role ARNs, sorted
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Error body: `[<request-id>] Response: (<status text>) - <reason>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Formatted error message
    pub message: String,
}
