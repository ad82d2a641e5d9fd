//! Route definitions for the admin API.

use axum::{
    routing::{get, post},
    Router,
};

use super::{handlers, state::ServerState};

//-------------------------------------------------------------------------------------------------
// Functions
//-------------------------------------------------------------------------------------------------

/// Creates the router with every admin endpoint mounted.
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/iscas", get(handlers::list_iscas_handler))
        .route("/iscas/{id}/revisions", get(handlers::list_revisions_handler))
        .route("/iscas/{id}/rollback", post(handlers::rollback_handler))
        .with_state(state)
}
