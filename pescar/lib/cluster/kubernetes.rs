use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Pod};
use kube::{
    api::{ListParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    runtime::{watcher, WatchStreamExt},
    Api, Client, Config,
};
use tokio::sync::{mpsc, oneshot};

use crate::{
    config::KubernetesConfig,
    models::{ImageRevision, Isca},
    PescarError, PescarResult,
};

use super::{
    retry_on_conflict, AnnotationFilter, Cluster, DeploymentEvent, DeploymentView,
    DeploymentWatch, WatchCache,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How many domain events may queue up before the watch waits for the reconciler.
const DEPLOYMENT_EVENT_BUFFER: usize = 64;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A [`Cluster`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    conflict_retries: u32,
    conflict_backoff: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl KubeCluster {
    /// Creates a cluster handle from an existing client.
    pub fn new(client: Client, conflict_retries: u32, conflict_backoff: Duration) -> Self {
        Self {
            client,
            conflict_retries,
            conflict_backoff,
        }
    }

    /// Connects using the configured kubeconfig, or the in-cluster / default configuration
    /// when none is set.
    pub async fn connect(config: &KubernetesConfig) -> PescarResult<Self> {
        let client = match config.get_config() {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| PescarError::KubeConfig(e.to_string()))?;
                let client_config =
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .map_err(|e| PescarError::KubeConfig(e.to_string()))?;
                Client::try_from(client_config)?
            }
            None => Client::try_default().await?,
        };

        Ok(Self::new(
            client,
            *config.get_conflict_retries(),
            Duration::from_millis(*config.get_conflict_backoff_ms()),
        ))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Cluster for KubeCluster {
    async fn watch_tracked_deployments(
        &self,
        filter: AnnotationFilter,
    ) -> PescarResult<DeploymentWatch> {
        let api: Api<Deployment> = Api::all(self.client.clone());
        let (events_tx, events_rx) = mpsc::channel(DEPLOYMENT_EVENT_BUFFER);
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = tokio::spawn(run_watch(api, filter, events_tx, stop_rx));

        Ok(DeploymentWatch::with_task(events_rx, stop_tx, task))
    }

    async fn update_image(&self, isca: &Isca, revision: &ImageRevision) -> PescarResult<()> {
        let coordinates = &isca.deployment;
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &coordinates.namespace);
        let image = isca.image_for(revision);

        let result = retry_on_conflict(self.conflict_retries, self.conflict_backoff, || async {
            let mut deployment = api.get(&coordinates.name).await?;
            if !set_container_image(&mut deployment, &coordinates.container_name, &image) {
                return Err(PescarError::ContainerNotFound {
                    namespace: coordinates.namespace.clone(),
                    deployment: coordinates.name.clone(),
                    container: coordinates.container_name.clone(),
                });
            }

            api.replace(&coordinates.name, &PostParams::default(), &deployment)
                .await?;
            Ok(())
        })
        .await;

        match result {
            Ok(()) => {
                tracing::info!(deployment = %coordinates, image = %image, "updated container image");
                Ok(())
            }
            Err(e) if e.is_conflict() => Err(PescarError::UpdateConflict {
                namespace: coordinates.namespace.clone(),
                deployment: coordinates.name.clone(),
                attempts: self.conflict_retries.max(1),
            }),
            Err(e) => Err(e),
        }
    }

    async fn is_container_healthy(
        &self,
        namespace: &str,
        deployment: &str,
        container: &str,
        image: &str,
    ) -> PescarResult<bool> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let current = deployments.get(deployment).await?;

        let selector = label_selector(&current).unwrap_or_else(|| format!("app={}", deployment));
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = pods.list(&ListParams::default().labels(&selector)).await?;

        Ok(evaluate_health(&current, &pods.items, container, image))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

async fn run_watch(
    api: Api<Deployment>,
    filter: AnnotationFilter,
    events: mpsc::Sender<DeploymentEvent>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut cache = WatchCache::new(filter);
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    let mut stream = std::pin::pin!(stream);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            next = stream.next() => match next {
                Some(Ok(event)) => {
                    let event = match event {
                        watcher::Event::Apply(d) => watcher::Event::Apply(DeploymentView::from(&d)),
                        watcher::Event::Delete(d) => watcher::Event::Delete(DeploymentView::from(&d)),
                        watcher::Event::Init => watcher::Event::Init,
                        watcher::Event::InitApply(d) => watcher::Event::InitApply(DeploymentView::from(&d)),
                        watcher::Event::InitDone => watcher::Event::InitDone,
                    };

                    for event in cache.handle(event) {
                        tracing::debug!(?event, "deployment event");
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Err(e)) => tracing::warn!(error = %e, "deployment watch error"),
                None => break,
            },
        }
    }

    tracing::info!("deployment watch stopped");
}

/// Sets the image of `container` in the pod template. Returns `false` if there is no such
/// container.
pub fn set_container_image(deployment: &mut Deployment, container: &str, image: &str) -> bool {
    let target = deployment
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
        .and_then(|pod| pod.containers.iter_mut().find(|c| c.name == container));

    match target {
        Some(target) => {
            target.image = Some(image.to_string());
            true
        }
        None => false,
    }
}

/// Renders the Deployment's `matchLabels` as a label selector.
pub fn label_selector(deployment: &Deployment) -> Option<String> {
    let labels = deployment.spec.as_ref()?.selector.match_labels.as_ref()?;
    if labels.is_empty() {
        return None;
    }

    Some(
        labels
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Decides health from a Deployment and its pods.
///
/// Unhealthy if the `Available` condition is not `True`, or if a pod runs `image` in `container`
/// without being ready. Pods still on another image do not count against it.
pub fn evaluate_health(deployment: &Deployment, pods: &[Pod], container: &str, image: &str) -> bool {
    let available = deployment
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Available" && c.status == "True")
        });

    if !available {
        return false;
    }

    let digest = image.split_once('@').map(|(_, digest)| digest);
    let runs_image = |status_image: &str, image_id: &str| {
        status_image == image
            || digest.is_some_and(|digest| {
                status_image.ends_with(digest) || image_id.ends_with(digest)
            })
    };

    !pods
        .iter()
        .filter_map(|pod| pod.status.as_ref()?.container_statuses.as_ref())
        .flatten()
        .any(|status| {
            status.name == container && runs_image(&status.image, &status.image_id) && !status.ready
        })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const IMAGE: &str = "docker.io/library/nginx@sha256:aaa";

    fn deployment(available: &str) -> Deployment {
        serde_json::from_value(json!({
            "metadata": { "name": "web", "namespace": "default" },
            "spec": {
                "selector": { "matchLabels": { "app": "web", "tier": "front" } },
                "template": {
                    "spec": {
                        "containers": [
                            { "name": "nginx", "image": "nginx:1.26" },
                            { "name": "sidecar", "image": "envoy:1" }
                        ]
                    }
                }
            },
            "status": {
                "conditions": [
                    { "type": "Progressing", "status": "True" },
                    { "type": "Available", "status": available }
                ]
            }
        }))
        .unwrap()
    }

    fn pod(image: &str, image_id: &str, ready: bool) -> Pod {
        serde_json::from_value(json!({
            "metadata": { "name": "web-1" },
            "status": {
                "containerStatuses": [{
                    "name": "nginx",
                    "image": image,
                    "imageID": image_id,
                    "ready": ready,
                    "restartCount": 0
                }]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_set_container_image_targets_named_container() {
        let mut d = deployment("True");
        assert!(set_container_image(&mut d, "nginx", IMAGE));

        let containers = d.spec.unwrap().template.spec.unwrap().containers;
        assert_eq!(containers[0].image.as_deref(), Some(IMAGE));
        assert_eq!(containers[1].image.as_deref(), Some("envoy:1"));
    }

    #[test]
    fn test_set_container_image_missing_container() {
        let mut d = deployment("True");
        assert!(!set_container_image(&mut d, "missing", IMAGE));
    }

    #[test]
    fn test_label_selector_from_match_labels() {
        assert_eq!(
            label_selector(&deployment("True")).as_deref(),
            Some("app=web,tier=front")
        );
    }

    #[test]
    fn test_unavailable_deployment_is_unhealthy() {
        assert!(!evaluate_health(&deployment("False"), &[], "nginx", IMAGE));
    }

    #[test]
    fn test_unready_pod_on_new_image_is_unhealthy() {
        let pods = [pod("nginx:1.26", "docker.io/library/nginx@sha256:old", true), pod(IMAGE, "", false)];
        assert!(!evaluate_health(&deployment("True"), &pods, "nginx", IMAGE));
    }

    #[test]
    fn test_image_id_digest_counts_as_new_image() {
        let pods = [pod("nginx:latest", "docker.io/library/nginx@sha256:aaa", false)];
        assert!(!evaluate_health(&deployment("True"), &pods, "nginx", IMAGE));
    }

    #[test]
    fn test_ready_pods_are_healthy() {
        let pods = [pod(IMAGE, "docker.io/library/nginx@sha256:aaa", true)];
        assert!(evaluate_health(&deployment("True"), &pods, "nginx", IMAGE));
        assert!(evaluate_health(&deployment("True"), &[pod("nginx:1.26", "", false)], "nginx", IMAGE));
    }
}
