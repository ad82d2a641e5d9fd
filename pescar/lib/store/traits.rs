use async_trait::async_trait;

use crate::{
    models::{Anzol, ImageRevision, ImageStatus, Isca, NewImageRevision, NewIsca},
    PescarResult,
};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Persistence for iscas, anzols and image revisions.
///
/// Isca reads resolve the pulling strategy and rollback policy against the owning anzol when the
/// isca does not override them.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Gets an isca by id.
    async fn get_isca(&self, id: i64) -> PescarResult<Isca>;

    /// Finds the isca tracking a container, active or not.
    async fn find_isca(
        &self,
        namespace: &str,
        deployment: &str,
        container: &str,
    ) -> PescarResult<Option<Isca>>;

    /// Lists every isca.
    async fn list_iscas(&self) -> PescarResult<Vec<Isca>>;

    /// Lists the iscas that are polled.
    async fn list_active_iscas(&self) -> PescarResult<Vec<Isca>>;

    /// Creates an isca.
    async fn create_isca(&self, isca: NewIsca) -> PescarResult<Isca>;

    /// Persists the registry, anzol and activity of an isca.
    async fn update_isca(&self, isca: &Isca) -> PescarResult<()>;

    /// Gets an anzol by id.
    async fn get_anzol(&self, id: i64) -> PescarResult<Anzol>;

    /// Creates or replaces an anzol.
    async fn save_anzol(&self, anzol: &Anzol) -> PescarResult<()>;

    /// The most recently created revision of an isca.
    async fn latest_image_revision(&self, isca_id: i64) -> PescarResult<Option<ImageRevision>>;

    /// Gets a revision by id.
    async fn get_image_revision(&self, id: i64) -> PescarResult<ImageRevision>;

    /// Lists the revisions of an isca, newest first.
    async fn list_image_revisions(&self, isca_id: i64) -> PescarResult<Vec<ImageRevision>>;

    /// Records a revision.
    ///
    /// The previous revision, if any, must belong to the same isca. A new `Pending` revision
    /// turns any older `Pending` revision of the isca `Outdated`.
    async fn create_image_revision(&self, revision: NewImageRevision)
        -> PescarResult<ImageRevision>;

    /// Changes the status of a revision.
    async fn update_image_revision_status(&self, id: i64, status: ImageStatus)
        -> PescarResult<()>;
}
