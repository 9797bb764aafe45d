//! Router-level tests driven with `oneshot`, no agent attached

use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{Request, StatusCode},
};
use burrow_auth::CredentialVerifier;
use burrow_relay::{models::HealthResponse, RelayConfig, RelayServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt; // For `oneshot` method

struct StaticToken;

impl CredentialVerifier for StaticToken {
    fn verify(&self, candidate: &str) -> bool {
        candidate == "relay-token"
    }
}

fn create_test_server(config: RelayConfig) -> RelayServer {
    RelayServer::new(config, Arc::new(StaticToken))
}

/// Plain GET on the upgrade path, as `serve` would see it
fn plain_upgrade_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
        .body(Body::empty())
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_request_without_agent_fails_immediately() {
    let app = create_test_server(RelayConfig::default()).build_router();

    let started = Instant::now();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/orders/42?page=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "no active tunnel");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_any_method_is_tunneled() {
    let server = create_test_server(RelayConfig::default());

    for method in ["POST", "PUT", "DELETE", "PATCH", "OPTIONS"] {
        let response = server
            .build_router()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri("/api/items")
                    .body(Body::from("payload"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "{}", method);
        assert_eq!(body_text(response).await, "no active tunnel");
    }
}

#[tokio::test]
async fn test_health_check_without_agent() {
    let app = create_test_server(RelayConfig::default()).build_router();

    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let health: HealthResponse = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(health.status, "healthy");
    assert!(!health.tunnel_active);
    assert_eq!(health.connection_id, None);
    assert_eq!(health.pending_requests, 0);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let config = RelayConfig {
        max_body_bytes: 16,
        ..RelayConfig::default()
    };
    let app = create_test_server(config).build_router();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload")
                .header("content-length", "64")
                .body(Body::from(vec![b'x'; 64]))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_upgrade_path_is_not_tunneled() {
    let app = create_test_server(RelayConfig::default()).build_router();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/ws")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_bad_token_is_unauthorized_without_upgrade_headers() {
    let server = create_test_server(RelayConfig::default());

    for uri in ["/ws?token=wrong", "/ws"] {
        let response = server
            .build_router()
            .oneshot(plain_upgrade_request(uri))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        assert_eq!(body_text(response).await, "Unauthorized: Bad access token");
    }
}

#[tokio::test]
async fn test_valid_token_without_upgrade_is_rejected_by_upgrade() {
    let server = create_test_server(RelayConfig::default());

    let response = server
        .build_router()
        .oneshot(plain_upgrade_request("/ws?token=relay-token"))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
    assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(!server.state().registry.is_active());
}
