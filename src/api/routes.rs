//! Route definitions.
//!
//! Maps URLs to handlers with type-safe routing.

use super::handlers::*;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check (high priority)
        .route("/health", get(health_handler))
        // Pot lifecycle
        .route("/pots", post(create_pot_handler).get(list_pots_handler))
        .route("/pots/:id", get(get_pot_handler))
        .route("/pots/:id/join", post(join_pot_handler))
        .route("/pots/:id/lock", post(lock_pot_handler))
        .route("/pots/:id/settle", post(settle_pot_handler))
        .route("/pots/:id/cancel", post(cancel_pot_handler))
        .route("/pots/:id/verify", get(verify_pot_handler))
        // Battle lifecycle
        .route(
            "/battles",
            post(create_battle_handler).get(list_battles_handler),
        )
        .route("/battles/:id", get(get_battle_handler))
        .route("/battles/:id/join", post(join_battle_handler))
        .route("/battles/:id/lock", post(lock_battle_handler))
        .route("/battles/:id/cancel", post(cancel_battle_handler))
        .route("/battles/:id/verify", get(verify_battle_handler))
        // Catalog reads
        .route("/cases", get(list_cases_handler))
        .route("/cases/:id", get(get_case_handler))
        // Own balance
        .route("/balance", get(balance_handler))
        // Counters for Prometheus and humans
        .route("/metrics", get(metrics_handler))
        .route("/stats", get(stats_handler))
        // Attach shared state
        .with_state(state)
}
