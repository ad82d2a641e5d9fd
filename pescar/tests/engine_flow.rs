//! Polls a mock registry, records the new revision and dispatches it to a recording cluster.

use std::{sync::Arc, time::Duration};

use pescar::{
    engine::{Dispatcher, Poller},
    models::{
        DeploymentCoordinates, ImageStatus, NewImageRevision, NewIsca, PullingStrategy,
        RegistryCoordinates,
    },
    registry::DockerRegistryClient,
    store::{MemoryStore, Repository, DEFAULT_ANZOL_ID},
};
use tokio::sync::mpsc;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_new_digest_is_recorded_and_applied() -> anyhow::Result<()> {
    let registry = helper::registry("sha256:AAA").await;
    let store = Arc::new(MemoryStore::new());
    let cluster = Arc::new(helper::RecordingCluster::default());

    let isca = store
        .create_isca(NewIsca {
            anzol_id: DEFAULT_ANZOL_ID,
            registry: RegistryCoordinates {
                url: registry.uri(),
                repository: "team/app".to_string(),
            },
            pulling_strategy: Some(PullingStrategy::Lexicographic),
            deployment: DeploymentCoordinates {
                namespace: "default".to_string(),
                name: "app".to_string(),
                container_name: "app".to_string(),
                active: true,
            },
        })
        .await?;
    let stable = store
        .create_image_revision(NewImageRevision {
            isca_id: isca.id,
            previous_image_revision_id: None,
            version: "sha256:BBB".to_string(),
            tag: Some("1.0".to_string()),
            status: ImageStatus::Stable,
        })
        .await?;

    let poller = Poller::new(
        store.clone(),
        Arc::new(DockerRegistryClient::new(0, 4)),
        Duration::from_secs(60),
        Duration::from_secs(10),
        4,
    );
    let (tx, mut rx) = mpsc::channel(4);
    assert_eq!(poller.poll_once(&tx).await?, 1);

    let new_image = rx.try_recv()?;
    assert_eq!(new_image.revision.version, "sha256:AAA");
    assert_eq!(new_image.revision.tag.as_deref(), Some("1.1"));
    assert_eq!(new_image.revision.status, ImageStatus::Pending);
    assert_eq!(new_image.revision.previous_image_revision_id, Some(stable.id));

    let dispatcher = Dispatcher::new(
        store.clone(),
        cluster.clone(),
        Duration::from_millis(10),
        Duration::from_secs(5),
    );
    let status = dispatcher.apply(new_image.clone()).await?;
    assert_eq!(status, ImageStatus::Stable);

    let updates = cluster.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, isca.id);
    assert!(updates[0].1.ends_with("/team/app@sha256:AAA"));

    assert_eq!(
        store.get_image_revision(stable.id).await?.status,
        ImageStatus::Outdated
    );
    assert_eq!(
        store.get_image_revision(new_image.revision.id).await?.status,
        ImageStatus::Stable
    );

    // Nothing changed upstream: the next round finds nothing.
    assert_eq!(poller.poll_once(&tx).await?, 0);
    Ok(())
}

mod helper {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pescar::{
        cluster::{AnnotationFilter, Cluster, DeploymentWatch},
        models::{ImageRevision, Isca},
        PescarResult,
    };

    use super::*;

    pub(super) async fn registry(digest: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/team/app/tags/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({ "name": "team/app", "tags": ["1.0", "1.1"] }),
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/team/app/manifests/1.1"))
            .respond_with(ResponseTemplate::new(200).insert_header("Docker-Content-Digest", digest))
            .mount(&server)
            .await;
        server
    }

    /// Records image updates and reports every container healthy.
    #[derive(Default)]
    pub(super) struct RecordingCluster {
        updates: Mutex<Vec<(i64, String)>>,
    }

    impl RecordingCluster {
        pub(super) fn updates(&self) -> Vec<(i64, String)> {
            self.updates.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Cluster for RecordingCluster {
        async fn watch_tracked_deployments(
            &self,
            _filter: AnnotationFilter,
        ) -> PescarResult<DeploymentWatch> {
            Ok(DeploymentWatch::new(mpsc::channel(1).1))
        }

        async fn update_image(&self, isca: &Isca, revision: &ImageRevision) -> PescarResult<()> {
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
            Ok(true)
        }
    }
}
