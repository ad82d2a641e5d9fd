use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{
    sync::{broadcast, mpsc},
    task::JoinSet,
    time,
};
use tracing::{debug, error, info, warn};

use crate::{
    cluster::Cluster,
    models::{ImageStatus, Isca, NewImage},
    store::Repository,
    PescarResult,
};

use super::rollback;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Applies new images to the cluster and confirms they come up healthy.
///
/// Every isca gets its own lane so its updates are applied in order, while updates of different
/// iscas run side by side.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn Repository>,
    cluster: Arc<dyn Cluster>,
    health_check_interval: Duration,
    health_check_timeout: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Dispatcher {
    /// Creates a new dispatcher.
    ///
    /// `health_check_timeout` applies to iscas whose rollback policy has a zero timeout.
    pub fn new(
        store: Arc<dyn Repository>,
        cluster: Arc<dyn Cluster>,
        health_check_interval: Duration,
        health_check_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cluster,
            health_check_interval,
            health_check_timeout,
        }
    }

    /// Routes `updates` into per-isca lanes until shutdown or until `updates` closes.
    pub async fn run(
        &self,
        mut updates: mpsc::Receiver<NewImage>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut lanes: HashMap<i64, mpsc::UnboundedSender<NewImage>> = HashMap::new();
        let mut tasks = JoinSet::new();
        info!("dispatcher started");

        loop {
            tokio::select! {
                update = updates.recv() => {
                    let Some(update) = update else {
                        break;
                    };

                    let isca_id = update.isca.id;
                    let lane = lanes.entry(isca_id).or_insert_with(|| {
                        let (tx, rx) = mpsc::unbounded_channel();
                        tasks.spawn(self.clone().run_lane(rx, shutdown.resubscribe()));
                        tx
                    });

                    if lane.send(update).is_err() {
                        warn!(isca = isca_id, "update lane closed");
                        lanes.remove(&isca_id);
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        // Lanes drain what they already queued unless shutdown was signalled.
        drop(lanes);
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("update lane panicked: {}", e);
            }
        }

        info!("dispatcher stopped");
    }

    async fn run_lane(
        self,
        mut updates: mpsc::UnboundedReceiver<NewImage>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                update = updates.recv() => {
                    let Some(update) = update else {
                        break;
                    };

                    let revision = update.revision.id;
                    tokio::select! {
                        result = self.apply(update) => {
                            if let Err(e) = result {
                                error!(revision, "failed to record update: {}", e);
                            }
                        }
                        _ = shutdown.recv() => {
                            warn!(revision, "shutdown interrupted an update in flight");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }

    /// Applies one new image and returns the status its revision ends up with.
    ///
    /// A revision that is no longer pending, because a newer one superseded it while it was
    /// queued, is left alone.
    pub async fn apply(&self, new_image: NewImage) -> PescarResult<ImageStatus> {
        let NewImage { isca, revision } = new_image;

        let current = self.store.get_image_revision(revision.id).await?;
        if current.status != ImageStatus::Pending {
            debug!(
                revision = revision.id,
                status = %current.status,
                "skipping revision that is no longer pending"
            );
            return Ok(current.status);
        }

        let image = isca.image_for(&revision);
        if let Err(e) = self.cluster.update_image(&isca, &revision).await {
            error!(isca = isca.id, %image, "failed to update {}: {}", isca.deployment, e);
            self.store
                .update_image_revision_status(revision.id, ImageStatus::Error)
                .await?;
            return Ok(ImageStatus::Error);
        }

        info!(isca = isca.id, %image, "updated {}", isca.deployment);

        if self.wait_until_healthy(&isca, &image).await {
            let stale = self
                .store
                .list_image_revisions(isca.id)
                .await?
                .into_iter()
                .filter(|r| r.id != revision.id && r.status == ImageStatus::Stable);
            for older in stale {
                self.store
                    .update_image_revision_status(older.id, ImageStatus::Outdated)
                    .await?;
            }

            self.store
                .update_image_revision_status(revision.id, ImageStatus::Stable)
                .await?;
            info!(isca = isca.id, revision = revision.id, "{} is healthy", isca.deployment);
            return Ok(ImageStatus::Stable);
        }

        warn!(
            isca = isca.id,
            revision = revision.id,
            "{} did not become healthy",
            isca.deployment
        );
        self.store
            .update_image_revision_status(revision.id, ImageStatus::Error)
            .await?;

        if !isca.rollback.enabled {
            return Ok(ImageStatus::Error);
        }

        match rollback(&*self.cluster, &*self.store, &isca, &revision).await {
            Ok(prior) => {
                self.store
                    .update_image_revision_status(revision.id, ImageStatus::Rollback)
                    .await?;
                if prior.status != ImageStatus::Stable {
                    self.store
                        .update_image_revision_status(prior.id, ImageStatus::Stable)
                        .await?;
                }
                info!(
                    isca = isca.id,
                    revision = prior.id,
                    "rolled {} back",
                    isca.deployment
                );
                Ok(ImageStatus::Rollback)
            }
            Err(e) => {
                error!(isca = isca.id, "failed to roll back {}: {}", isca.deployment, e);
                Ok(ImageStatus::Error)
            }
        }
    }

    /// Polls the container's health until it is healthy or the confirmation window closes.
    async fn wait_until_healthy(&self, isca: &Isca, image: &str) -> bool {
        let window = if isca.rollback.timeout.is_zero() {
            self.health_check_timeout
        } else {
            isca.rollback.timeout
        };

        let deployment = &isca.deployment;
        let check = async {
            loop {
                match self
                    .cluster
                    .is_container_healthy(
                        &deployment.namespace,
                        &deployment.name,
                        &deployment.container_name,
                        image,
                    )
                    .await
                {
                    Ok(true) => return,
                    Ok(false) => debug!("{} is not healthy yet", deployment),
                    Err(e) => warn!("failed to check health of {}: {}", deployment, e),
                }

                time::sleep(self.health_check_interval).await;
            }
        };

        time::timeout(window, check).await.is_ok()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
