//! HTTP request handlers for the admin API.
//!
//! Each handler delegates to a `handle_*` function returning a [`PescarResult`] and maps
//! failures to a JSON [`ErrorResponse`] with a matching status code.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::{
    state::ServerState,
    types::{ErrorResponse, HealthResponse, IscasResponse, RevisionsResponse, RollbackResponse},
};
use crate::{PescarError, PescarResult};

//-------------------------------------------------------------------------------------------------
// Functions: Handlers
//-------------------------------------------------------------------------------------------------

/// Handler for the GET /health endpoint
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Handler for the GET /iscas endpoint
pub async fn list_iscas_handler(State(state): State<ServerState>) -> Response {
    match handle_list_iscas(state).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Handler for the GET /iscas/{id}/revisions endpoint
pub async fn list_revisions_handler(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> Response {
    match handle_list_revisions(state, id).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Handler for the POST /iscas/{id}/rollback endpoint
///
/// Points the isca back at the revision before its latest one.
pub async fn rollback_handler(State(state): State<ServerState>, Path(id): Path<i64>) -> Response {
    match handle_rollback(state, id).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_list_iscas(state: ServerState) -> PescarResult<IscasResponse> {
    let iscas = state.pescar().store().list_iscas().await?;
    Ok(IscasResponse { iscas })
}

async fn handle_list_revisions(state: ServerState, id: i64) -> PescarResult<RevisionsResponse> {
    let store = state.pescar().store();
    let isca = store.get_isca(id).await?;
    let revisions = store.list_image_revisions(isca.id).await?;

    Ok(RevisionsResponse {
        isca_id: isca.id,
        revisions,
    })
}

async fn handle_rollback(state: ServerState, id: i64) -> PescarResult<RollbackResponse> {
    tracing::info!(isca = id, "received rollback request");
    let revision = state.pescar().rollback(id).await?;

    Ok(RollbackResponse {
        isca_id: id,
        revision,
    })
}

//-------------------------------------------------------------------------------------------------
// Functions: Helpers
//-------------------------------------------------------------------------------------------------

/// The status code an error is reported with.
pub fn status_for(error: &PescarError) -> StatusCode {
    if error.is_not_found() {
        return StatusCode::NOT_FOUND;
    }

    match error {
        PescarError::NoBackwardRevision(_)
        | PescarError::NoImageRevision(_)
        | PescarError::UpdateConflict { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: PescarError) -> Response {
    let status = status_for(&error);
    if status.is_server_error() {
        tracing::error!("admin request failed: {}", error);
    }

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum::{
        body::{self, Body},
        http::{Method, Request},
    };
    use tower::ServiceExt;

    use crate::{
        models::{ImageStatus, NewImageRevision},
        server::create_router,
        store::Repository,
        test_support::new_isca,
    };

    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_health() -> anyhow::Result<()> {
        let (_, _, state) = helper::state();

        let response = helper::send(state, Method::GET, "/health").await?;

        assert_eq!(response.0, StatusCode::OK);
        assert_eq!(response.1["status"], "ok");
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_list_iscas_and_revisions() -> anyhow::Result<()> {
        let (store, _, state) = helper::state();
        let isca = store.create_isca(new_isca("web", "nginx")).await?;
        helper::record(&*store, isca.id, None, "sha256:AAA", ImageStatus::Stable).await?;

        let (status, body) = helper::send(state.clone(), Method::GET, "/iscas").await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["iscas"][0]["id"], isca.id);
        assert_eq!(body["iscas"][0]["deployment"]["container_name"], "nginx");

        let uri = format!("/iscas/{}/revisions", isca.id);
        let (status, body) = helper::send(state, Method::GET, &uri).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["revisions"][0]["version"], "sha256:AAA");
        assert_eq!(body["revisions"][0]["status"], "stable");
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_unknown_isca_is_not_found() -> anyhow::Result<()> {
        let (_, _, state) = helper::state();

        let (status, body) = helper::send(state.clone(), Method::GET, "/iscas/7/revisions").await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "isca 7 not found");

        let (status, _) = helper::send(state, Method::POST, "/iscas/7/rollback").await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_rollback() -> anyhow::Result<()> {
        let (store, cluster, state) = helper::state();
        let isca = store.create_isca(new_isca("web", "nginx")).await?;
        let stable =
            helper::record(&*store, isca.id, None, "sha256:AAA", ImageStatus::Outdated).await?;
        let uri = format!("/iscas/{}/rollback", isca.id);

        // A single revision has nothing to go back to.
        let (status, _) = helper::send(state.clone(), Method::POST, &uri).await?;
        assert_eq!(status, StatusCode::CONFLICT);

        let latest = helper::record(
            &*store,
            isca.id,
            Some(stable.id),
            "sha256:BBB",
            ImageStatus::Stable,
        )
        .await?;

        let (status, body) = helper::send(state, Method::POST, &uri).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["revision"]["id"], stable.id);
        assert_eq!(body["revision"]["status"], "stable");
        assert_eq!(
            store.get_image_revision(latest.id).await?.status,
            ImageStatus::Rollback
        );
        assert_eq!(
            cluster.updates(),
            vec![(isca.id, "docker.io/library/nginx@sha256:AAA".to_string())]
        );
        Ok(())
    }

    #[test]
    fn test_status_for() {
        assert_eq!(
            status_for(&PescarError::ImageRevisionNotFound(1)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&PescarError::UpdateConflict {
                namespace: "default".to_string(),
                deployment: "web".to_string(),
                attempts: 5,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&PescarError::PollTimeout("library/nginx".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    mod helper {
        use std::sync::Arc;

        use crate::{
            engine::{EngineSettings, Pescar},
            models::ImageRevision,
            store::MemoryStore,
            test_support::{FakeCluster, FakeResolver},
        };

        use super::*;

        pub(super) fn state() -> (Arc<MemoryStore>, Arc<FakeCluster>, ServerState) {
            let store = Arc::new(MemoryStore::new());
            let cluster = Arc::new(FakeCluster::new());
            let pescar = Pescar::new(
                store.clone(),
                cluster.clone(),
                Arc::new(FakeResolver::new()),
                EngineSettings::default(),
            );
            (store, cluster, ServerState::new(Arc::new(pescar)))
        }

        pub(super) async fn record(
            store: &dyn Repository,
            isca_id: i64,
            previous: Option<i64>,
            version: &str,
            status: ImageStatus,
        ) -> anyhow::Result<ImageRevision> {
            let revision = store
                .create_image_revision(NewImageRevision {
                    isca_id,
                    previous_image_revision_id: previous,
                    version: version.to_string(),
                    tag: None,
                    status,
                })
                .await?;
            Ok(revision)
        }

        pub(super) async fn send(
            state: ServerState,
            method: Method,
            uri: &str,
        ) -> anyhow::Result<(StatusCode, serde_json::Value)> {
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())?;
            let response = create_router(state).oneshot(request).await?;
            let status = response.status();
            let bytes = body::to_bytes(response.into_body(), usize::MAX).await?;
            Ok((status, serde_json::from_slice(&bytes)?))
        }
    }
}
