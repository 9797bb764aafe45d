//! HTTP handlers: agent upgrade, health check and the tunnel fallback

use axum::{
    body::Bytes,
    extract::{
        ws::rejection::WebSocketUpgradeRejection, ConnectInfo, Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use burrow_proto::UNAUTHORIZED_NOTICE;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bridge;
use crate::error::TunnelFailure;
use crate::models::HealthResponse;
use crate::ws::serve_agent;
use crate::RelayState;

#[derive(Debug, Deserialize)]
pub struct UpgradeParams {
    token: Option<String>,
}

/// Agent connection endpoint
///
/// Answers `401` without upgrading when the token is missing or wrong, even
/// when the request is not a valid upgrade.
pub async fn agent_upgrade(
    State(state): State<Arc<RelayState>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    Query(params): Query<UpgradeParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let credential = params.token.unwrap_or_default();

    if !state.registry.verify(&credential).await {
        warn!(%remote_addr, "Rejected agent upgrade: bad access token");
        return (StatusCode::UNAUTHORIZED, UNAUTHORIZED_NOTICE).into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(%remote_addr, error = %rejection, "Agent request is not a WebSocket upgrade");
            return rejection.into_response();
        }
    };

    info!(%remote_addr, "Upgrading agent connection");
    ws.on_upgrade(move |socket| serve_agent(socket, state, remote_addr))
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<RelayState>>) -> Json<HealthResponse> {
    let session = state.registry.status();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tunnel_active: session.is_some(),
        connection_id: session.as_ref().map(|s| s.connection_id),
        remote_addr: session.as_ref().map(|s| s.remote_addr.to_string()),
        connected_at: session.as_ref().map(|s| s.connected_at),
        pending_requests: state.correlator.pending_count(),
    })
}

/// Every other request is forwarded to the agent
pub async fn tunnel(
    State(state): State<Arc<RelayState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, TunnelFailure> {
    let request = bridge::tunnel_request(&method, &uri, &headers, &body);
    let reply = state.correlator.submit(request).await?;
    Ok(bridge::reply_response(reply))
}
