//! API server.
//!
//! Listener setup, middleware stack, and graceful shutdown.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::config::ApiConfig;
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub struct ApiServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ApiConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Serve until Ctrl+C or SIGTERM.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = self.socket_addr()?;
        let app = self.create_app();

        info!("Engine API listening on http://{}", addr);
        self.log_endpoints();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("API server stopped gracefully");
        Ok(())
    }

    /// Application with the full middleware stack, also used by tests.
    pub fn create_app(&self) -> axum::Router {
        create_router(self.state.clone())
            // Request ID middleware (first for tracing)
            .layer(axum::middleware::from_fn(request_id_middleware))
            // CORS layer (before timeout to handle preflight)
            .layer(create_cors_layer(self.config.cors_origins.clone()))
            // Timeout layer
            .layer(TimeoutLayer::new(std::time::Duration::from_millis(
                self.config.request_timeout_ms,
            )))
            // Tracing layer (last for complete request tracing)
            .layer(TraceLayer::new_for_http())
    }

    fn socket_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        Ok(SocketAddr::from((
            self.config.bind_address.parse::<std::net::IpAddr>()?,
            self.config.port,
        )))
    }

    fn log_endpoints(&self) {
        info!("Available endpoints:");
        info!("   GET  /health              - Health check");
        info!("   POST /pots                - Create pot");
        info!("   GET  /pots                - List pots");
        info!("   GET  /pots/:id            - Pot with entries");
        info!("   POST /pots/:id/join       - Buy tickets");
        info!("   POST /pots/:id/lock       - Close entries");
        info!("   POST /pots/:id/settle     - Reveal and pay out");
        info!("   POST /pots/:id/cancel     - Cancel and refund");
        info!("   GET  /pots/:id/verify     - Replay the draw");
        info!("   POST /battles             - Create battle");
        info!("   GET  /battles             - List battles");
        info!("   GET  /battles/:id         - Battle with rounds");
        info!("   POST /battles/:id/join    - Take a seat");
        info!("   POST /battles/:id/lock    - Start and resolve");
        info!("   POST /battles/:id/cancel  - Cancel and refund");
        info!("   GET  /battles/:id/verify  - Replay every roll");
        info!("   GET  /cases               - Case catalog");
        info!("   GET  /balance             - Own balance");
        info!("   GET  /metrics             - Prometheus counters");
    }
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
