//! The admin HTTP API.
//!
//! A small REST surface over a running [`Pescar`](crate::engine::Pescar) instance:
//! - `GET /health` answers while the process is up
//! - `GET /iscas` lists every tracked container
//! - `GET /iscas/{id}/revisions` lists the image history of one isca
//! - `POST /iscas/{id}/rollback` points an isca back at its previous image

mod handlers;
mod routes;
mod state;
mod types;

use std::net::SocketAddr;

use tokio::sync::broadcast;

use crate::PescarResult;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use handlers::*;
pub use routes::*;
pub use state::*;
pub use types::*;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Serves the admin API on `addr` until `shutdown` fires.
pub async fn serve(
    state: ServerState,
    addr: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) -> PescarResult<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("admin api listening on {}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    tracing::info!("admin api stopped");
    Ok(())
}
