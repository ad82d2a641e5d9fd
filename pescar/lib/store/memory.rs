use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    models::{
        Anzol, DeploymentCoordinates, ImageRevision, ImageStatus, Isca, NewImageRevision, NewIsca,
        PullingStrategy, RegistryCoordinates, RollbackPolicy,
    },
    PescarError, PescarResult,
};

use super::{Repository, DEFAULT_ANZOL_ID, DEFAULT_ANZOL_NAME};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An in-memory [`Repository`].
///
/// It behaves like [`super::SqliteStore`], including the default anzol it starts with, and is
/// meant for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Debug)]
struct MemoryState {
    anzols: BTreeMap<i64, Anzol>,
    iscas: BTreeMap<i64, IscaRecord>,
    revisions: BTreeMap<i64, ImageRevision>,
    next_isca_id: i64,
    next_revision_id: i64,
}

/// An isca as stored, with its own overrides instead of the resolved values.
#[derive(Debug, Clone)]
struct IscaRecord {
    id: i64,
    anzol_id: i64,
    registry: RegistryCoordinates,
    pulling_strategy: Option<PullingStrategy>,
    deployment: DeploymentCoordinates,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MemoryStore {
    /// Creates a store holding only the default anzol.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryState {
    fn resolve(&self, record: &IscaRecord) -> PescarResult<Isca> {
        let anzol = self
            .anzols
            .get(&record.anzol_id)
            .ok_or(PescarError::AnzolNotFound(record.anzol_id))?;

        Ok(Isca {
            id: record.id,
            anzol_id: record.anzol_id,
            registry: record.registry.clone(),
            pulling_strategy: record.pulling_strategy.unwrap_or(anzol.pulling_strategy),
            rollback: anzol.rollback,
            credentials: anzol.credentials.clone(),
            deployment: record.deployment.clone(),
        })
    }

    fn resolve_where(&self, keep: impl Fn(&IscaRecord) -> bool) -> PescarResult<Vec<Isca>> {
        self.iscas
            .values()
            .filter(|record| keep(record))
            .map(|record| self.resolve(record))
            .collect()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for MemoryState {
    fn default() -> Self {
        let default_anzol = Anzol {
            id: DEFAULT_ANZOL_ID,
            name: DEFAULT_ANZOL_NAME.to_string(),
            credentials: None,
            pulling_strategy: PullingStrategy::default(),
            rollback: RollbackPolicy::default(),
        };

        Self {
            anzols: BTreeMap::from([(DEFAULT_ANZOL_ID, default_anzol)]),
            iscas: BTreeMap::new(),
            revisions: BTreeMap::new(),
            next_isca_id: 1,
            next_revision_id: 1,
        }
    }
}

#[async_trait]
impl Repository for MemoryStore {
    async fn get_isca(&self, id: i64) -> PescarResult<Isca> {
        let state = self.state.read().await;
        let record = state.iscas.get(&id).ok_or(PescarError::IscaNotFound(id))?;
        state.resolve(record)
    }

    async fn find_isca(
        &self,
        namespace: &str,
        deployment: &str,
        container: &str,
    ) -> PescarResult<Option<Isca>> {
        let state = self.state.read().await;
        let iscas = state.resolve_where(|r| {
            r.deployment.namespace == namespace
                && r.deployment.name == deployment
                && r.deployment.container_name == container
        })?;

        Ok(iscas.into_iter().next())
    }

    async fn list_iscas(&self) -> PescarResult<Vec<Isca>> {
        self.state.read().await.resolve_where(|_| true)
    }

    async fn list_active_iscas(&self) -> PescarResult<Vec<Isca>> {
        self.state
            .read()
            .await
            .resolve_where(|r| r.deployment.active)
    }

    async fn create_isca(&self, isca: NewIsca) -> PescarResult<Isca> {
        let mut state = self.state.write().await;

        if !state.anzols.contains_key(&isca.anzol_id) {
            return Err(PescarError::AnzolNotFound(isca.anzol_id));
        }

        let duplicate = state.iscas.values().any(|r| {
            r.deployment.namespace == isca.deployment.namespace
                && r.deployment.name == isca.deployment.name
                && r.deployment.container_name == isca.deployment.container_name
        });
        if duplicate {
            return Err(PescarError::custom(anyhow::anyhow!(
                "isca for {} already exists",
                isca.deployment
            )));
        }

        let id = state.next_isca_id;
        state.next_isca_id += 1;

        let record = IscaRecord {
            id,
            anzol_id: isca.anzol_id,
            registry: isca.registry,
            pulling_strategy: isca.pulling_strategy,
            deployment: isca.deployment,
        };
        let created = state.resolve(&record)?;
        state.iscas.insert(id, record);

        Ok(created)
    }

    async fn update_isca(&self, isca: &Isca) -> PescarResult<()> {
        let mut state = self.state.write().await;
        if !state.anzols.contains_key(&isca.anzol_id) {
            return Err(PescarError::AnzolNotFound(isca.anzol_id));
        }

        let record = state
            .iscas
            .get_mut(&isca.id)
            .ok_or(PescarError::IscaNotFound(isca.id))?;

        record.anzol_id = isca.anzol_id;
        record.registry = isca.registry.clone();
        record.deployment.active = isca.deployment.active;

        Ok(())
    }

    async fn get_anzol(&self, id: i64) -> PescarResult<Anzol> {
        self.state
            .read()
            .await
            .anzols
            .get(&id)
            .cloned()
            .ok_or(PescarError::AnzolNotFound(id))
    }

    async fn save_anzol(&self, anzol: &Anzol) -> PescarResult<()> {
        self.state
            .write()
            .await
            .anzols
            .insert(anzol.id, anzol.clone());
        Ok(())
    }

    async fn latest_image_revision(&self, isca_id: i64) -> PescarResult<Option<ImageRevision>> {
        let state = self.state.read().await;
        Ok(state
            .revisions
            .values()
            .rev()
            .find(|r| r.isca_id == isca_id)
            .cloned())
    }

    async fn get_image_revision(&self, id: i64) -> PescarResult<ImageRevision> {
        self.state
            .read()
            .await
            .revisions
            .get(&id)
            .cloned()
            .ok_or(PescarError::ImageRevisionNotFound(id))
    }

    async fn list_image_revisions(&self, isca_id: i64) -> PescarResult<Vec<ImageRevision>> {
        let state = self.state.read().await;
        Ok(state
            .revisions
            .values()
            .rev()
            .filter(|r| r.isca_id == isca_id)
            .cloned()
            .collect())
    }

    async fn create_image_revision(
        &self,
        revision: NewImageRevision,
    ) -> PescarResult<ImageRevision> {
        let mut state = self.state.write().await;

        if !state.iscas.contains_key(&revision.isca_id) {
            return Err(PescarError::IscaNotFound(revision.isca_id));
        }

        if let Some(previous_id) = revision.previous_image_revision_id {
            let same_isca = state
                .revisions
                .get(&previous_id)
                .is_some_and(|previous| previous.isca_id == revision.isca_id);
            if !same_isca {
                return Err(PescarError::ImageRevisionNotFound(previous_id));
            }
        }

        let now = Utc::now();
        if revision.status == ImageStatus::Pending {
            state
                .revisions
                .values_mut()
                .filter(|r| r.isca_id == revision.isca_id && r.status == ImageStatus::Pending)
                .for_each(|r| {
                    r.status = ImageStatus::Outdated;
                    r.updated_at = now;
                });
        }

        let id = state.next_revision_id;
        state.next_revision_id += 1;

        let created = ImageRevision {
            id,
            isca_id: revision.isca_id,
            previous_image_revision_id: revision.previous_image_revision_id,
            version: revision.version,
            tag: revision.tag,
            status: revision.status,
            created_at: now,
            updated_at: now,
        };
        state.revisions.insert(id, created.clone());

        Ok(created)
    }

    async fn update_image_revision_status(&self, id: i64, status: ImageStatus) -> PescarResult<()> {
        let mut state = self.state.write().await;
        let revision = state
            .revisions
            .get_mut(&id)
            .ok_or(PescarError::ImageRevisionNotFound(id))?;

        revision.status = status;
        revision.updated_at = Utc::now();
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
