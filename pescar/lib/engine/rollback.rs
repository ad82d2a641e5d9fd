use tracing::info;

use crate::{
    cluster::Cluster,
    models::{ImageRevision, Isca},
    store::Repository,
    PescarError, PescarResult,
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Points the isca back at the revision `revision` superseded and returns that revision.
///
/// Fails with [`PescarError::NoBackwardRevision`] without touching the cluster when `revision`
/// has no predecessor of the same isca. Health is not checked and statuses are left to the
/// caller.
pub async fn rollback(
    cluster: &dyn Cluster,
    store: &dyn Repository,
    isca: &Isca,
    revision: &ImageRevision,
) -> PescarResult<ImageRevision> {
    let previous_id = revision
        .previous_image_revision_id
        .ok_or(PescarError::NoBackwardRevision(revision.id))?;

    let prior = match store.get_image_revision(previous_id).await {
        Ok(prior) if prior.isca_id == isca.id => prior,
        Ok(_) | Err(PescarError::ImageRevisionNotFound(_)) => {
            return Err(PescarError::NoBackwardRevision(revision.id))
        }
        Err(e) => return Err(e),
    };

    info!(
        isca = isca.id,
        from = %revision.version,
        to = %prior.version,
        "rolling back {}",
        isca.deployment
    );
    cluster.update_image(isca, &prior).await?;

    Ok(prior)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::{
        models::{ImageStatus, NewImageRevision},
        store::MemoryStore,
        test_support::{new_isca, revision, FakeCluster},
    };

    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_rollback_without_previous_touches_nothing() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let cluster = FakeCluster::new();
        let isca = store.create_isca(new_isca("web", "nginx")).await?;
        let first = revision(1, isca.id, None, "sha256:aaa");

        let result = rollback(&cluster, &store, &isca, &first).await;

        assert!(matches!(result, Err(PescarError::NoBackwardRevision(1))));
        assert!(cluster.updates().is_empty());
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_rollback_with_unknown_previous_touches_nothing() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let cluster = FakeCluster::new();
        let isca = store.create_isca(new_isca("web", "nginx")).await?;
        let orphan = revision(5, isca.id, Some(4), "sha256:bbb");

        let result = rollback(&cluster, &store, &isca, &orphan).await;

        assert!(matches!(result, Err(PescarError::NoBackwardRevision(5))));
        assert!(cluster.updates().is_empty());
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_rollback_applies_previous_revision() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let cluster = FakeCluster::new();
        let isca = store.create_isca(new_isca("web", "nginx")).await?;

        let stable = store
            .create_image_revision(NewImageRevision {
                isca_id: isca.id,
                previous_image_revision_id: None,
                version: "sha256:aaa".to_string(),
                tag: Some("1.26".to_string()),
                status: ImageStatus::Stable,
            })
            .await?;
        let broken = store
            .create_image_revision(NewImageRevision {
                isca_id: isca.id,
                previous_image_revision_id: Some(stable.id),
                version: "sha256:bbb".to_string(),
                tag: Some("1.27".to_string()),
                status: ImageStatus::Pending,
            })
            .await?;

        let prior = rollback(&cluster, &store, &isca, &broken).await?;

        assert_eq!(prior.id, stable.id);
        assert_eq!(
            cluster.updates(),
            vec![(isca.id, "docker.io/library/nginx@sha256:aaa".to_string())]
        );
        Ok(())
    }
}
