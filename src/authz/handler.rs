//! HTTP front end of the authorization service.
//!
//! # Endpoint
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `server.path` (default `/`) | `Caller: groups` lists roles, `Caller: assume` assumes one |
//!
//! Every response carries `x-request-id`. Errors are
//! `{"message": "[<request-id>] Response: (<status text>) - <reason>"}`.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    BoxError, Json, Router,
    body::Bytes,
    error_handling::HandleErrorLayer,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use broker_core::EnvironmentClass;
use tokio::{net::TcpListener, signal};
use tower::{ServiceBuilder, timeout::TimeoutLayer};
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    AuthorizationService, AuthzError,
    audit::{self, AuditEvent},
    wire::{AssumeRoleRequest, CALLER_HEADER, Caller, ENVIRONMENT_HEADER, ErrorBody, STAGE_HEADER},
};
use crate::{Error, Result};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request values shared by logging, auditing and error bodies.
struct RequestContext {
    request_id: String,
    stage: String,
    environment: String,
}

impl RequestContext {
    fn error(&self, err: &AuthzError) -> Response {
        let event = match err {
            AuthzError::NotAcceptable(reason) => {
                AuditEvent::invalid(&self.request_id, &self.stage, &self.environment, reason)
            }
            AuthzError::Unauthorized(reason) => {
                AuditEvent::denied(&self.request_id, &self.stage, &self.environment, reason)
            }
            AuthzError::Internal(reason) => {
                AuditEvent::failed(&self.request_id, &self.stage, &self.environment, reason)
            }
        };
        audit::emit(&event);
        warn!(request_id = %self.request_id, status = err.status(), error = %err, "Request rejected");
        error_response(&self.request_id, err)
    }
}

/// Render `err` as the service's JSON error body.
fn error_response(request_id: &str, err: &AuthzError) -> Response {
    let status =
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorBody {
        message: format!(
            "[{request_id}] Response: ({}) - {err}",
            status.canonical_reason().unwrap_or("Unknown")
        ),
    };
    (status, Json(body)).into_response()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn is_json(headers: &HeaderMap) -> bool {
    header_value(headers, header::CONTENT_TYPE.as_str())
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

/// Build the service routes.
pub fn authz_routes(service: Arc<AuthorizationService>) -> Router {
    let path = service.config().server.path.clone();
    let timeout = service.config().server.request_timeout;

    Router::new()
        .route(&path, post(authorize))
        .with_state(service)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|_: BoxError| async {
                    StatusCode::REQUEST_TIMEOUT
                }))
                .layer(TimeoutLayer::new(timeout)),
        )
        .layer(CatchPanicLayer::new())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// `POST`: list or assume roles depending on the `Caller` header.
async fn authorize(
    State(svc): State<Arc<AuthorizationService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let server = &svc.config().server;
    let ctx = RequestContext {
        request_id: header_value(&headers, REQUEST_ID_HEADER)
            .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string),
        stage: header_value(&headers, STAGE_HEADER)
            .unwrap_or(&server.default_stage)
            .to_string(),
        environment: header_value(&headers, ENVIRONMENT_HEADER)
            .unwrap_or(server.default_environment.as_str())
            .to_string(),
    };
    info!(request_id = %ctx.request_id, stage = %ctx.stage, environment = %ctx.environment, "Authorization request");

    if !is_json(&headers) {
        let got = header_value(&headers, header::CONTENT_TYPE.as_str()).unwrap_or("");
        return ctx.error(&AuthzError::NotAcceptable(format!(
            "Invalid contentType: expected \"application/json\" got \"{got}\""
        )));
    }

    let class: EnvironmentClass = match ctx.environment.parse() {
        Ok(c) => c,
        Err(e) => return ctx.error(&AuthzError::NotAcceptable(format!("{e}"))),
    };
    let caller = match header_value(&headers, CALLER_HEADER).map_or(Ok(Caller::Assume), str::parse::<Caller>)
    {
        Ok(c) => c,
        Err(e) => return ctx.error(&AuthzError::NotAcceptable(e)),
    };
    let token = header_value(&headers, header::AUTHORIZATION.as_str()).unwrap_or_default();

    match caller {
        Caller::Groups => match svc.groups(token, &ctx.stage, class).await {
            Ok((identity, groups)) => {
                audit::emit(&AuditEvent::groups(
                    &ctx.request_id,
                    &ctx.stage,
                    &ctx.environment,
                    &identity.email,
                    groups.groups.len(),
                ));
                (StatusCode::OK, Json(groups)).into_response()
            }
            Err(e) => ctx.error(&e),
        },
        Caller::Assume => {
            let request: AssumeRoleRequest = match serde_json::from_slice(&body) {
                Ok(r) => r,
                Err(e) => return ctx.error(&AuthzError::NotAcceptable(e.to_string())),
            };
            match svc.assume(token, &ctx.stage, class, &request).await {
                Ok((identity, response)) => {
                    audit::emit(&AuditEvent::assumed(
                        &ctx.request_id,
                        &ctx.stage,
                        &ctx.environment,
                        &identity.email,
                        &request.role_arn,
                    ));
                    (StatusCode::OK, Json(response)).into_response()
                }
                Err(e) => ctx.error(&e),
            }
        }
    }
}

/// Run the service until Ctrl+C or SIGTERM.
pub async fn serve(service: Arc<AuthorizationService>) -> Result<()> {
    let server = &service.config().server;
    let addr: SocketAddr = format!("{}:{}", server.host, server.port)
        .parse()
        .map_err(|e| Error::Config(format!("Invalid listen address: {e}")))?;

    let app = authz_routes(Arc::clone(&service));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, path = %server.path, "Authorization service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Authorization service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_format() {
        let resp = error_response("req-1", &AuthzError::NotAcceptable("missing role_arn".into()));
        assert_eq!(resp.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[test]
    fn json_content_type_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_json(&headers));
        headers.insert(header::CONTENT_TYPE, "application/json; charset=utf-8".parse().unwrap());
        assert!(is_json(&headers));
        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        assert!(!is_json(&headers));
    }

    #[test]
    fn blank_headers_are_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(STAGE_HEADER, "  ".parse().unwrap());
        assert_eq!(header_value(&headers, STAGE_HEADER), None);
        headers.insert(STAGE_HEADER, "dev".parse().unwrap());
        assert_eq!(header_value(&headers, STAGE_HEADER), Some("dev"));
    }
}
