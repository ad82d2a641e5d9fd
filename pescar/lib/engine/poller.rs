use std::{sync::Arc, time::Duration};

use futures::{stream, StreamExt};
use tokio::{
    sync::{broadcast, mpsc},
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    models::{ImageStatus, Isca, NewImage, NewImageRevision},
    registry::ImageResolver,
    store::Repository,
    PescarError, PescarResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Periodically asks the registries of active iscas for their newest image.
///
/// At most `concurrency` iscas are resolved at once and each resolution is cut off after
/// `timeout`.
#[derive(Clone)]
pub struct Poller {
    store: Arc<dyn Repository>,
    resolver: Arc<dyn ImageResolver>,
    interval: Duration,
    timeout: Duration,
    concurrency: usize,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Poller {
    /// Creates a new poller.
    pub fn new(
        store: Arc<dyn Repository>,
        resolver: Arc<dyn ImageResolver>,
        interval: Duration,
        timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            resolver,
            interval,
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Polls every `interval` until shutdown, sending new images to `sink`.
    pub async fn run(&self, sink: mpsc::Sender<NewImage>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.interval, "poller started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once(&sink).await {
                        error!("polling round failed: {}", e);
                        if sink.is_closed() {
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        info!("poller stopped");
    }

    /// Runs one polling round and returns how many new images were sent.
    ///
    /// Failures of single iscas are logged and skipped. The round only fails when the iscas
    /// cannot be listed or `sink` is closed.
    pub async fn poll_once(&self, sink: &mpsc::Sender<NewImage>) -> PescarResult<usize> {
        let iscas = self.store.list_active_iscas().await?;
        debug!(count = iscas.len(), "polling active iscas");

        let found: Vec<NewImage> = stream::iter(iscas)
            .map(|isca| async move {
                let id = isca.id;
                let coordinates = isca.deployment.clone();
                match self.poll_isca(isca).await {
                    Ok(found) => found,
                    Err(e) => {
                        warn!(isca = id, "failed to poll {}: {}", coordinates, e);
                        None
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|found| async move { found })
            .collect()
            .await;

        let count = found.len();
        for new_image in found {
            sink.send(new_image).await.map_err(|_| {
                PescarError::custom(anyhow::anyhow!("update channel closed"))
            })?;
        }

        Ok(count)
    }

    /// Resolves one isca and records a pending revision if its digest moved.
    ///
    /// A latest revision that is still pending with the resolved digest is returned again, so an
    /// image dropped on shutdown or by a failed dispatch is applied on a later round.
    async fn poll_isca(&self, isca: Isca) -> PescarResult<Option<NewImage>> {
        let resolved = time::timeout(
            self.timeout,
            self.resolver.resolve_latest_image(
                &isca.registry,
                isca.pulling_strategy,
                isca.credentials.as_ref(),
            ),
        )
        .await
        .map_err(|_| PescarError::PollTimeout(isca.registry.repository.clone()))??;

        let latest = self.store.latest_image_revision(isca.id).await?;
        if let Some(latest) = latest.as_ref().filter(|l| l.version == resolved.digest) {
            // A pending revision was never confirmed, so it is sent again.
            if latest.status == ImageStatus::Pending {
                info!(
                    isca = isca.id,
                    revision = latest.id,
                    "resending pending image for {}",
                    isca.deployment
                );
                return Ok(Some(NewImage {
                    revision: latest.clone(),
                    isca,
                }));
            }

            debug!(isca = isca.id, digest = %resolved.digest, "up to date");
            return Ok(None);
        }

        let revision = self
            .store
            .create_image_revision(NewImageRevision {
                isca_id: isca.id,
                previous_image_revision_id: latest.map(|latest| latest.id),
                version: resolved.digest,
                tag: Some(resolved.tag),
                status: ImageStatus::Pending,
            })
            .await?;

        info!(
            isca = isca.id,
            revision = revision.id,
            digest = %revision.version,
            "new image for {}",
            isca.deployment
        );

        Ok(Some(NewImage { isca, revision }))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
