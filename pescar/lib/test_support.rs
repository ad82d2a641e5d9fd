//! Fakes for the engine's collaborators.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use crate::{
    cluster::{AnnotationFilter, Cluster, DeploymentEvent, DeploymentWatch},
    models::{
        DeploymentCoordinates, ImageRevision, ImageStatus, Isca, NewIsca, PullingStrategy,
        RegistryCoordinates, RegistryCredentials,
    },
    registry::{ImageResolver, ResolvedImage},
    store::DEFAULT_ANZOL_ID,
    PescarError, PescarResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A cluster that records image updates and answers health checks from a script.
#[derive(Debug, Default)]
pub(crate) struct FakeCluster {
    updates: Mutex<Vec<(i64, String)>>,
    failing_updates: Mutex<bool>,
    health: Mutex<VecDeque<bool>>,
    health_checks: Mutex<usize>,
    watch: Mutex<Option<mpsc::Receiver<DeploymentEvent>>>,
}

/// A resolver that answers from a fixed table keyed by repository.
#[derive(Debug, Default)]
pub(crate) struct FakeResolver {
    images: Mutex<HashMap<String, ResolvedImage>>,
    calls: Mutex<usize>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FakeCluster {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes every update fail.
    pub(crate) fn fail_updates(&self) {
        *self.failing_updates.lock().unwrap() = true;
    }

    /// Queues health answers. Once they run out the container is reported unhealthy.
    pub(crate) fn script_health(&self, answers: impl IntoIterator<Item = bool>) {
        self.health.lock().unwrap().extend(answers);
    }

    /// Hands out `events` as the next watch.
    pub(crate) fn set_watch(&self, events: mpsc::Receiver<DeploymentEvent>) {
        *self.watch.lock().unwrap() = Some(events);
    }

    /// `(isca id, image)` for every successful update, in order.
    pub(crate) fn updates(&self) -> Vec<(i64, String)> {
        self.updates.lock().unwrap().clone()
    }

    pub(crate) fn health_checks(&self) -> usize {
        *self.health_checks.lock().unwrap()
    }
}

impl FakeResolver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn publish(&self, repository: &str, tag: &str, digest: &str) {
        self.images.lock().unwrap().insert(
            repository.to_string(),
            ResolvedImage {
                tag: tag.to_string(),
                digest: digest.to_string(),
                created: Some(Utc::now()),
            },
        );
    }

    pub(crate) fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Cluster for FakeCluster {
    async fn watch_tracked_deployments(
        &self,
        _filter: AnnotationFilter,
    ) -> PescarResult<DeploymentWatch> {
        let events = self.watch.lock().unwrap().take();
        let events = events.unwrap_or_else(|| mpsc::channel(1).1);
        Ok(DeploymentWatch::new(events))
    }

    async fn update_image(&self, isca: &Isca, revision: &ImageRevision) -> PescarResult<()> {
        if *self.failing_updates.lock().unwrap() {
            return Err(PescarError::ContainerNotFound {
                namespace: isca.deployment.namespace.clone(),
                deployment: isca.deployment.name.clone(),
                container: isca.deployment.container_name.clone(),
            });
        }

        self.updates
            .lock()
            .unwrap()
            .push((isca.id, isca.image_for(revision)));
        Ok(())
    }

    async fn is_container_healthy(
        &self,
        _namespace: &str,
        _deployment: &str,
        _container: &str,
        _image: &str,
    ) -> PescarResult<bool> {
        *self.health_checks.lock().unwrap() += 1;
        Ok(self.health.lock().unwrap().pop_front().unwrap_or(false))
    }
}

#[async_trait]
impl ImageResolver for FakeResolver {
    async fn resolve_latest_image(
        &self,
        registry: &RegistryCoordinates,
        _strategy: PullingStrategy,
        _credentials: Option<&RegistryCredentials>,
    ) -> PescarResult<ResolvedImage> {
        *self.calls.lock().unwrap() += 1;
        self.images
            .lock()
            .unwrap()
            .get(&registry.repository)
            .cloned()
            .ok_or_else(|| PescarError::NoTags(registry.repository.clone()))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// A new isca for `default/<deployment>/<container>` pulling `library/<container>`.
pub(crate) fn new_isca(deployment: &str, container: &str) -> NewIsca {
    NewIsca {
        anzol_id: DEFAULT_ANZOL_ID,
        registry: RegistryCoordinates {
            url: "https://registry-1.docker.io".to_string(),
            repository: format!("library/{container}"),
        },
        pulling_strategy: None,
        deployment: DeploymentCoordinates {
            namespace: "default".to_string(),
            name: deployment.to_string(),
            container_name: container.to_string(),
            active: true,
        },
    }
}

/// A revision that has not been stored.
pub(crate) fn revision(id: i64, isca_id: i64, previous: Option<i64>, version: &str) -> ImageRevision {
    ImageRevision {
        id,
        isca_id,
        previous_image_revision_id: previous,
        version: version.to_string(),
        tag: None,
        status: ImageStatus::Pending,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}
