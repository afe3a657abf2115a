//! Audit events for authorization decisions.
//!
//! Every event is emitted via `tracing::info!` as a JSON blob in the `audit`
//! field.
//!
//! | Event | When |
//! |-------|------|
//! | `authz.groups` | Permitted roles were listed |
//! | `authz.assumed` | A role was assumed |
//! | `authz.denied` | Token verification or role membership failed |
//! | `authz.invalid` | The request was malformed |
//! | `authz.failed` | A backend (directory, STS) failed |

use serde::Serialize;

/// Structured audit event
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g. `"authz.assumed"`)
    pub event: &'static str,
    /// Request correlation id
    pub request_id: String,
    /// Stage the request targeted
    pub stage: String,
    /// Environment class the request targeted
    pub environment: String,
    /// Caller email, once the token is verified
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Role involved in the decision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    /// Number of roles returned (`authz.groups`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// Reason for denial or failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn new(event: &'static str, request_id: &str, stage: &str, environment: &str) -> Self {
        Self {
            event,
            request_id: request_id.to_string(),
            stage: stage.to_string(),
            environment: environment.to_string(),
            email: None,
            role_arn: None,
            count: None,
            reason: None,
        }
    }

    /// `authz.groups`
    #[must_use]
    pub fn groups(request_id: &str, stage: &str, environment: &str, email: &str, count: usize) -> Self {
        Self {
            email: Some(email.to_string()),
            count: Some(count),
            ..Self::new("authz.groups", request_id, stage, environment)
        }
    }

    /// `authz.assumed`
    #[must_use]
    pub fn assumed(request_id: &str, stage: &str, environment: &str, email: &str, role_arn: &str) -> Self {
        Self {
            email: Some(email.to_string()),
            role_arn: Some(role_arn.to_string()),
            ..Self::new("authz.assumed", request_id, stage, environment)
        }
    }

    /// `authz.denied`
    #[must_use]
    pub fn denied(request_id: &str, stage: &str, environment: &str, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new("authz.denied", request_id, stage, environment)
        }
    }

    /// `authz.invalid`
    #[must_use]
    pub fn invalid(request_id: &str, stage: &str, environment: &str, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new("authz.invalid", request_id, stage, environment)
        }
    }

    /// `authz.failed`
    #[must_use]
    pub fn failed(request_id: &str, stage: &str, environment: &str, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new("authz.failed", request_id, stage, environment)
        }
    }
}

/// Emit an audit event.
///
/// ```text
/// INFO credential_broker::authz::audit audit={"event":"authz.assumed",...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "authz audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
