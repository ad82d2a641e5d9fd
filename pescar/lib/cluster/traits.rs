use async_trait::async_trait;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    models::{ImageRevision, Isca},
    PescarResult,
};

use super::{AnnotationFilter, DeploymentEvent};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The cluster operations pescar needs.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Starts watching every Deployment that matches `filter`, across all namespaces.
    async fn watch_tracked_deployments(
        &self,
        filter: AnnotationFilter,
    ) -> PescarResult<DeploymentWatch>;

    /// Points the isca's container at the image of `revision`.
    async fn update_image(&self, isca: &Isca, revision: &ImageRevision) -> PescarResult<()>;

    /// Whether the Deployment is available and no pod runs `image` in `container` unready.
    async fn is_container_healthy(
        &self,
        namespace: &str,
        deployment: &str,
        container: &str,
        image: &str,
    ) -> PescarResult<bool>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A running deployment watch.
///
/// Dropping the watch stops the task feeding it.
#[derive(Debug)]
pub struct DeploymentWatch {
    events: mpsc::Receiver<DeploymentEvent>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DeploymentWatch {
    /// Wraps a receiver that is fed by someone else.
    pub fn new(events: mpsc::Receiver<DeploymentEvent>) -> Self {
        Self {
            events,
            stop: None,
            task: None,
        }
    }

    /// Wraps a receiver fed by `task`, which stops once `stop` fires or is dropped.
    pub fn with_task(
        events: mpsc::Receiver<DeploymentEvent>,
        stop: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            events,
            stop: Some(stop),
            task: Some(task),
        }
    }

    /// Receives the next event, or `None` once the watch has ended.
    pub async fn recv(&mut self) -> Option<DeploymentEvent> {
        self.events.recv().await
    }

    /// Stops the watch and waits for its task to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        self.events.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "deployment watch task failed");
            }
        }
    }
}
