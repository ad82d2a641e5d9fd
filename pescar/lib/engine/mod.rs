//! The pescar engine.
//!
//! Three loops cooperate over channels:
//!
//! - the [`Reconciler`] turns Deployment watch events into stored iscas
//! - the [`Poller`] checks the registries of active iscas and records new revisions
//! - the [`Dispatcher`] applies new revisions and confirms their health
//!
//! [`rollback()`] points an isca back at the revision before.
//!
//! [`Pescar`] builds them from shared handles and runs them until shutdown.

mod dispatcher;
mod poller;
mod reconciler;
mod rollback;

use std::{sync::Arc, time::Duration};

use getset::Getters;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use typed_builder::TypedBuilder;

use crate::{
    cluster::{AnnotationFilter, Cluster},
    config::{
        PescarConfig, DEFAULT_HEALTH_CHECK_INTERVAL_SECS, DEFAULT_HEALTH_CHECK_TIMEOUT_SECS,
        DEFAULT_POLL_CONCURRENCY, DEFAULT_POLL_INTERVAL_SECS,
    },
    models::{Anzol, ImageRevision, ImageStatus, PullingStrategy},
    registry::ImageResolver,
    store::{Repository, DEFAULT_ANZOL_ID},
    PescarError, PescarResult,
};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use dispatcher::*;
pub use poller::*;
pub use reconciler::*;
pub use rollback::*;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How many new images may wait for the dispatcher.
const NEW_IMAGE_BUFFER: usize = 64;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The knobs of the engine.
#[derive(Debug, Clone, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct EngineSettings {
    /// The annotations a Deployment must carry to be tracked.
    #[builder(default)]
    annotations: AnnotationFilter,

    /// The anzol new iscas join.
    #[builder(default = DEFAULT_ANZOL_ID)]
    anzol_id: i64,

    /// The pulling strategy new iscas are created with, `None` to follow their anzol.
    #[builder(default)]
    pulling_strategy: Option<PullingStrategy>,

    /// The time between two polling rounds.
    #[builder(default = Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS))]
    poll_interval: Duration,

    /// The deadline of one isca's resolution.
    #[builder(default = Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS))]
    poll_timeout: Duration,

    /// How many iscas are polled at once.
    #[builder(default = DEFAULT_POLL_CONCURRENCY)]
    poll_concurrency: usize,

    /// The time between two health checks of an updated container.
    #[builder(default = Duration::from_secs(DEFAULT_HEALTH_CHECK_INTERVAL_SECS))]
    health_check_interval: Duration,

    /// The confirmation window for iscas whose rollback policy sets none.
    #[builder(default = Duration::from_secs(DEFAULT_HEALTH_CHECK_TIMEOUT_SECS))]
    health_check_timeout: Duration,
}

/// A pescar instance: the store, the cluster and the registries, and the loops between them.
pub struct Pescar {
    store: Arc<dyn Repository>,
    cluster: Arc<dyn Cluster>,
    resolver: Arc<dyn ImageResolver>,
    settings: EngineSettings,
    shutdown_tx: broadcast::Sender<()>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Pescar {
    /// Creates a new instance from its collaborators.
    pub fn new(
        store: Arc<dyn Repository>,
        cluster: Arc<dyn Cluster>,
        resolver: Arc<dyn ImageResolver>,
        settings: EngineSettings,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            store,
            cluster,
            resolver,
            settings,
            shutdown_tx,
        }
    }

    /// The store the engine works on.
    pub fn store(&self) -> &Arc<dyn Repository> {
        &self.store
    }

    /// The engine settings.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// A receiver that fires when [`Pescar::shutdown`] is called.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Asks every running loop to stop.
    pub fn shutdown(&self) {
        info!("shutting down");
        // No receivers means nothing is running.
        let _ = self.shutdown_tx.send(());
    }

    /// Creates or refreshes anzols, typically the ones listed in the configuration.
    pub async fn register_anzols(&self, anzols: &[Anzol]) -> PescarResult<()> {
        for anzol in anzols {
            self.store.save_anzol(anzol).await?;
            info!(anzol = anzol.id, "registered anzol {}", anzol.name);
        }

        Ok(())
    }

    /// Runs the reconciler, poller and dispatcher until [`Pescar::shutdown`] is called.
    pub async fn run(&self) -> PescarResult<()> {
        let watch = self
            .cluster
            .watch_tracked_deployments(self.settings.annotations.clone())
            .await?;
        let (updates_tx, updates_rx) = mpsc::channel(NEW_IMAGE_BUFFER);

        let reconciler = Reconciler::new(
            self.store.clone(),
            self.settings.anzol_id,
            self.settings.pulling_strategy,
        );
        let poller = Poller::new(
            self.store.clone(),
            self.resolver.clone(),
            self.settings.poll_interval,
            self.settings.poll_timeout,
            self.settings.poll_concurrency,
        );
        let dispatcher = Dispatcher::new(
            self.store.clone(),
            self.cluster.clone(),
            self.settings.health_check_interval,
            self.settings.health_check_timeout,
        );

        let reconciler_shutdown = self.shutdown_tx.subscribe();
        let poller_shutdown = self.shutdown_tx.subscribe();
        let dispatcher_shutdown = self.shutdown_tx.subscribe();

        let reconciler =
            tokio::spawn(async move { reconciler.run(watch, reconciler_shutdown).await });
        let poller = tokio::spawn(async move { poller.run(updates_tx, poller_shutdown).await });
        let dispatcher =
            tokio::spawn(async move { dispatcher.run(updates_rx, dispatcher_shutdown).await });

        info!("pescar started");
        let (reconciler, poller, dispatcher) = tokio::join!(reconciler, poller, dispatcher);
        reconciler?;
        poller?;
        dispatcher?;

        info!("pescar stopped");
        Ok(())
    }

    /// Rolls an isca back from its latest revision to the one before.
    ///
    /// The latest revision becomes `Rollback` and the prior one `Stable`. Returns the prior
    /// revision.
    pub async fn rollback(&self, isca_id: i64) -> PescarResult<ImageRevision> {
        let isca = self.store.get_isca(isca_id).await?;
        let latest = self
            .store
            .latest_image_revision(isca.id)
            .await?
            .ok_or(PescarError::NoImageRevision(isca.id))?;

        let prior = rollback(&*self.cluster, &*self.store, &isca, &latest).await?;

        self.store
            .update_image_revision_status(latest.id, ImageStatus::Rollback)
            .await?;
        self.store
            .update_image_revision_status(prior.id, ImageStatus::Stable)
            .await?;

        info!(isca = isca.id, revision = prior.id, "rolled {} back", isca.deployment);
        self.store.get_image_revision(prior.id).await
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for EngineSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<&PescarConfig> for EngineSettings {
    fn from(config: &PescarConfig) -> Self {
        let polling = config.get_polling();
        let defaults = config.get_defaults();

        Self {
            annotations: config.get_kubernetes().get_annotations().clone(),
            anzol_id: *defaults.get_anzol_id(),
            pulling_strategy: *defaults.get_pulling_strategy(),
            poll_interval: polling.interval(),
            poll_timeout: polling.timeout(),
            poll_concurrency: *polling.get_concurrency(),
            health_check_interval: defaults.health_check_interval(),
            health_check_timeout: defaults.health_check_timeout(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
