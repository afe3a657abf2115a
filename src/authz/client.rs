//! Client side of the authorization service contract.

use std::sync::Arc;

use async_trait::async_trait;
use broker_core::EnvironmentClass;
use reqwest::{RequestBuilder, Response, header};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::wire::{
    AssumeRoleRequest, AssumeRoleResponse, CALLER_HEADER, Caller, ENVIRONMENT_HEADER, ErrorBody,
    GroupsResponse, STAGE_HEADER,
};
use crate::config::BrokerConfig;
use crate::session::CredentialIssuer;
use crate::{Error, Result};

const REQUEST_ID_HEADERS: [&str; 2] = ["x-amzn-requestid", "x-request-id"];

/// Calls the authorization service configured for each stage.
pub struct AuthzClient {
    http: reqwest::Client,
    config: Arc<BrokerConfig>,
}

impl AuthzClient {
    /// Create a client.
    #[must_use]
    pub fn new(http: reqwest::Client, config: Arc<BrokerConfig>) -> Self {
        Self { http, config }
    }

    fn request(
        &self,
        id_token: &str,
        stage: &str,
        class: EnvironmentClass,
        caller: Caller,
    ) -> Result<RequestBuilder> {
        let url = &self.config.stage_config(stage)?.authorization_service;
        Ok(self
            .http
            .post(url)
            .header(header::AUTHORIZATION, id_token)
            .header(header::CONTENT_TYPE, "application/json")
            .header(STAGE_HEADER, stage)
            .header(ENVIRONMENT_HEADER, class.as_str())
            .header(CALLER_HEADER, caller.as_str()))
    }
}

fn request_id(response: &Response) -> Option<String> {
    REQUEST_ID_HEADERS.iter().find_map(|name| {
        response
            .headers()
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    })
}

async fn decode<T: DeserializeOwned>(response: Response, caller: Caller) -> Result<T> {
    let status = response.status();
    let request_id = request_id(&response).unwrap_or_default();
    debug!(caller = %caller, status = status.as_u16(), request_id = %request_id, "Authorization service responded");

    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body).map_or(body, |b| b.message);
    warn!(caller = %caller, status = status.as_u16(), request_id = %request_id, %message, "Authorization service rejected request");

    Err(match status.as_u16() {
        401 | 403 => Error::Authorization(message),
        406 => Error::Validation(message),
        code => Error::Http {
            status: code,
            message,
        },
    })
}

#[async_trait]
impl CredentialIssuer for AuthzClient {
    async fn assume(
        &self,
        id_token: &str,
        stage: &str,
        class: EnvironmentClass,
        request: &AssumeRoleRequest,
    ) -> Result<AssumeRoleResponse> {
        let response = self
            .request(id_token, stage, class, Caller::Assume)?
            .json(request)
            .send()
            .await?;
        decode(response, Caller::Assume).await
    }

    async fn groups(
        &self,
        id_token: &str,
        stage: &str,
        class: EnvironmentClass,
    ) -> Result<Vec<String>> {
        let response = self
            .request(id_token, stage, class, Caller::Groups)?
            .body("{}")
            .send()
            .await?;
        let body: GroupsResponse = decode(response, Caller::Groups).await?;
        Ok(body.groups)
    }
}
