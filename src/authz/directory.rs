//! Directory lookups: which security groups a user belongs to.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Resolves directory group memberships for a user.
#[async_trait]
pub trait DirectoryLookup: Send + Sync {
    /// Group names `email` is a member of.
    async fn groups(&self, email: &str) -> Result<Vec<String>>;
}

#[derive(Serialize)]
struct LookupRequest<'a> {
    query: &'static str,
    user: &'a str,
}

#[derive(Deserialize)]
struct LookupResponse {
    result: LookupResult,
}

#[derive(Deserialize)]
struct LookupResult {
    #[serde(default)]
    groups: Vec<String>,
}

/// Directory reached over HTTP.
///
/// Posts `{"query":"list_user_access","user":<email>}` and expects
/// `{"result":{"groups":[...]}}`.
pub struct HttpDirectory {
    http: reqwest::Client,
    url: String,
}

impl HttpDirectory {
    /// Create a lookup against `url`.
    #[must_use]
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl DirectoryLookup for HttpDirectory {
    async fn groups(&self, email: &str) -> Result<Vec<String>> {
        let response = self
            .http
            .post(&self.url)
            .json(&LookupRequest {
                query: "list_user_access",
                user: email,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: status.as_u16(),
                message: format!("Unable to request directory groups: {body}"),
            });
        }

        let body: LookupResponse = response.json().await?;
        debug!(email, count = body.result.groups.len(), "Directory groups resolved");
        Ok(body.result.groups)
    }
}

/// Memberships from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    groups: BTreeMap<String, Vec<String>>,
}

impl StaticDirectory {
    /// Create a lookup over a fixed email → groups table.
    #[must_use]
    pub fn new(groups: BTreeMap<String, Vec<String>>) -> Self {
        Self { groups }
    }
}

#[async_trait]
impl DirectoryLookup for StaticDirectory {
    async fn groups(&self, email: &str) -> Result<Vec<String>> {
        Ok(self.groups.get(email).cloned().unwrap_or_default())
    }
}
