//! Public relay
//!
//! Serves the agent upgrade endpoint at `/ws`, a health check at `/healthz`
//! and tunnels every other request to the attached agent.

pub mod bridge;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod ws;

pub use burrow_control::TakeoverPolicy;
pub use config::RelayConfig;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use burrow_auth::CredentialVerifier;
use burrow_control::{RequestCorrelator, ResponseDispatcher, SessionRegistry};
use burrow_proto::UPGRADE_PATH;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// State shared across handlers
pub struct RelayState {
    pub registry: Arc<SessionRegistry>,
    pub correlator: RequestCorrelator,
    pub dispatcher: ResponseDispatcher,
    pub config: RelayConfig,
}

/// Relay server
pub struct RelayServer {
    config: RelayConfig,
    state: Arc<RelayState>,
}

impl RelayServer {
    pub fn new(config: RelayConfig, verifier: Arc<dyn CredentialVerifier>) -> Self {
        let registry = Arc::new(SessionRegistry::with_policy(
            verifier,
            config.takeover_policy,
        ));
        let correlator = RequestCorrelator::with_timeout(registry.clone(), config.request_timeout);
        let dispatcher = ResponseDispatcher::new(registry.clone(), correlator.clone())
            .with_idle_timeout(config.idle_timeout);

        let state = Arc::new(RelayState {
            registry,
            correlator,
            dispatcher,
            config: config.clone(),
        });

        Self { config, state }
    }

    pub fn state(&self) -> Arc<RelayState> {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        Router::new()
            .route(UPGRADE_PATH, get(handlers::agent_upgrade))
            .route("/healthz", get(handlers::health_check))
            .fallback(handlers::tunnel)
            .with_state(self.state.clone())
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until Ctrl+C
    pub async fn start(self) -> Result<(), anyhow::Error> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!("Relay listening on {}", listener.local_addr()?);
        info!("Agents connect to ws://{}{}", listener.local_addr()?, UPGRADE_PATH);

        self.serve(listener, async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
            }
        })
        .await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), anyhow::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }
}
