//! Request and response bodies of the admin API.

use serde::{Deserialize, Serialize};

use crate::models::{ImageRevision, Isca};

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: String,
}

/// Response body for `GET /iscas`.
#[derive(Debug, Serialize, Deserialize)]
pub struct IscasResponse {
    /// Every tracked container, active or not.
    pub iscas: Vec<Isca>,
}

/// Response body for `GET /iscas/{id}/revisions`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RevisionsResponse {
    /// The isca the revisions belong to.
    pub isca_id: i64,
    /// The revisions, newest first.
    pub revisions: Vec<ImageRevision>,
}

/// Response body for `POST /iscas/{id}/rollback`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RollbackResponse {
    /// The isca that was rolled back.
    pub isca_id: i64,
    /// The revision the isca now runs.
    pub revision: ImageRevision,
}

/// Error response returned when an operation fails.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// What went wrong.
    pub error: String,
}
