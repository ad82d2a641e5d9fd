use std::{collections::HashSet, sync::Arc};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    cluster::{DeploymentEvent, DeploymentImage, DeploymentWatch},
    models::{Isca, NewIsca, PullingStrategy, RegistryCoordinates},
    reference::Reference,
    store::Repository,
    PescarResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Keeps the stored iscas in step with the tracked Deployments.
///
/// Events are applied one at a time. A failure is logged against the image it concerns and the
/// rest of the event is still applied.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn Repository>,
    anzol_id: i64,
    pulling_strategy: Option<PullingStrategy>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Reconciler {
    /// Creates a reconciler that files new iscas under `anzol_id`.
    pub fn new(
        store: Arc<dyn Repository>,
        anzol_id: i64,
        pulling_strategy: Option<PullingStrategy>,
    ) -> Self {
        Self {
            store,
            anzol_id,
            pulling_strategy,
        }
    }

    /// Applies events from `watch` until shutdown or until the watch ends.
    pub async fn run(&self, mut watch: DeploymentWatch, mut shutdown: broadcast::Receiver<()>) {
        info!("reconciler started");
        loop {
            tokio::select! {
                event = watch.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => {
                        warn!("deployment watch closed");
                        break;
                    }
                },
                _ = shutdown.recv() => break,
            }
        }

        watch.stop().await;
        info!("reconciler stopped");
    }

    /// Applies a single event.
    pub async fn handle(&self, event: DeploymentEvent) {
        match event {
            DeploymentEvent::Created(images) => {
                for image in &images {
                    if let Err(e) = self.track(image).await {
                        warn!(image = %image.image, "failed to track {}: {}", image.deployment, e);
                    }
                }
            }
            DeploymentEvent::Updated { old, new } => {
                for image in &new {
                    if let Err(e) = self.refresh(image).await {
                        warn!(image = %image.image, "failed to update {}: {}", image.deployment, e);
                    }
                }

                let removed = old.iter().filter(|before| {
                    !new.iter().any(|after| {
                        after.deployment.container_name == before.deployment.container_name
                    })
                });
                for image in removed {
                    if let Err(e) = self.deactivate(image).await {
                        warn!("failed to deactivate {}: {}", image.deployment, e);
                    }
                }
            }
            DeploymentEvent::Deleted(images) => {
                for image in &images {
                    if let Err(e) = self.deactivate(image).await {
                        warn!("failed to deactivate {}: {}", image.deployment, e);
                    }
                }
            }
            DeploymentEvent::Listed(images) => {
                if let Err(e) = self.retain(&images).await {
                    warn!("failed to reconcile listed deployments: {}", e);
                }
            }
        }
    }

    /// Deactivates every active isca whose container is not among `listed`.
    ///
    /// Covers Deployments that were deleted or lost their annotation while nothing was watching.
    async fn retain(&self, listed: &[DeploymentImage]) -> PescarResult<()> {
        let live: HashSet<(&str, &str, &str)> = listed
            .iter()
            .map(|image| {
                let d = &image.deployment;
                (d.namespace.as_str(), d.name.as_str(), d.container_name.as_str())
            })
            .collect();

        for mut isca in self.store.list_active_iscas().await? {
            let d = &isca.deployment;
            if live.contains(&(d.namespace.as_str(), d.name.as_str(), d.container_name.as_str())) {
                continue;
            }

            isca.deployment.active = false;
            if let Err(e) = self.store.update_isca(&isca).await {
                warn!(isca = isca.id, "failed to deactivate {}: {}", isca.deployment, e);
                continue;
            }
            info!(
                isca = isca.id,
                "stopped tracking {}, it is gone from the cluster",
                isca.deployment
            );
        }

        Ok(())
    }

    async fn find(&self, image: &DeploymentImage) -> PescarResult<Option<Isca>> {
        let coordinates = &image.deployment;
        self.store
            .find_isca(
                &coordinates.namespace,
                &coordinates.name,
                &coordinates.container_name,
            )
            .await
    }

    /// Starts tracking a container, or resumes tracking it if it was tracked before.
    async fn track(&self, image: &DeploymentImage) -> PescarResult<()> {
        match self.find(image).await? {
            Some(isca) if isca.deployment.active => {
                debug!("{} is already tracked", image.deployment);
            }
            Some(mut isca) => {
                isca.registry = registry_of(&image.image)?;
                isca.deployment.active = true;
                self.store.update_isca(&isca).await?;
                info!(isca = isca.id, "resumed tracking {}", image.deployment);
            }
            None => self.create(image).await?,
        }

        Ok(())
    }

    /// Merges the current state of a container into its isca.
    async fn refresh(&self, image: &DeploymentImage) -> PescarResult<()> {
        match self.find(image).await? {
            Some(mut isca) => {
                let registry = registry_of(&image.image)?;
                if isca.registry == registry && isca.deployment.active == image.deployment.active
                {
                    return Ok(());
                }

                isca.registry = registry;
                isca.deployment.active = image.deployment.active;
                self.store.update_isca(&isca).await?;
                info!(
                    isca = isca.id,
                    active = isca.deployment.active,
                    "updated {}",
                    image.deployment
                );
            }
            None if image.deployment.active => self.create(image).await?,
            None => {}
        }

        Ok(())
    }

    async fn deactivate(&self, image: &DeploymentImage) -> PescarResult<()> {
        let Some(mut isca) = self.find(image).await? else {
            return Ok(());
        };

        if isca.deployment.active {
            isca.deployment.active = false;
            self.store.update_isca(&isca).await?;
            info!(isca = isca.id, "stopped tracking {}", image.deployment);
        }

        Ok(())
    }

    async fn create(&self, image: &DeploymentImage) -> PescarResult<()> {
        let mut deployment = image.deployment.clone();
        deployment.active = true;

        let isca = self
            .store
            .create_isca(NewIsca {
                anzol_id: self.anzol_id,
                registry: registry_of(&image.image)?,
                pulling_strategy: self.pulling_strategy,
                deployment,
            })
            .await?;

        info!(isca = isca.id, image = %image.image, "tracking {}", image.deployment);
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The registry and repository an image reference pulls from.
pub fn registry_of(image: &str) -> PescarResult<RegistryCoordinates> {
    let reference: Reference = image.parse()?;
    Ok(RegistryCoordinates {
        url: reference.registry_url(),
        repository: reference.get_repository().clone(),
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
