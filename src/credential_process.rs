//! Credential-process handoff format read by AWS SDKs and the AWS CLI.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::session::CloudCredentials;
use crate::Result;

/// Version of the handoff document
pub const CREDENTIAL_PROCESS_VERSION: u8 = 1;

/// `credential_process` output document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CredentialProcessOutput {
    /// Always [`CREDENTIAL_PROCESS_VERSION`]
    pub version: u8,
    /// Access key id
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Session token
    pub session_token: String,
    /// Expiry, RFC 3339
    #[serde(serialize_with = "rfc3339")]
    pub expiration: DateTime<Utc>,
}

fn rfc3339<S: Serializer>(t: &DateTime<Utc>, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

impl From<&CloudCredentials> for CredentialProcessOutput {
    fn from(c: &CloudCredentials) -> Self {
        Self {
            version: CREDENTIAL_PROCESS_VERSION,
            access_key_id: c.access_key_id.clone(),
            secret_access_key: c.secret_access_key.clone(),
            session_token: c.session_token.clone(),
            expiration: c.expiration,
        }
    }
}

impl CredentialProcessOutput {
    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
