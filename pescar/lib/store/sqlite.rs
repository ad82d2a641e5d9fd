use std::{path::Path, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use tokio::{fs, sync::Mutex};

use crate::{
    models::{
        Anzol, DeploymentCoordinates, ImageRevision, ImageStatus, Isca, NewImageRevision, NewIsca,
        RegistryCoordinates, RegistryCredentials, RollbackPolicy,
    },
    PescarError, PescarResult,
};

use super::Repository;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Migrator for the pescar database.
pub static STORE_MIGRATOR: Migrator = sqlx::migrate!("lib/store/migrations");

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_ISCA: &str = r#"
    SELECT
        i.id,
        i.anzol_id,
        i.registry_url,
        i.repository,
        COALESCE(i.pulling_strategy, a.pulling_strategy) AS pulling_strategy,
        COALESCE(i.rollback_timeout_secs, a.rollback_timeout_secs) AS rollback_timeout_secs,
        COALESCE(i.rollback_strategy, a.rollback_strategy) AS rollback_strategy,
        COALESCE(i.rollback_enabled, a.rollback_enabled) AS rollback_enabled,
        a.registry_username,
        a.registry_password,
        i.deployment_namespace,
        i.deployment_name,
        i.container_name,
        i.active
    FROM isca i
    INNER JOIN anzol a ON a.id = i.anzol_id
"#;

const SELECT_REVISION: &str = r#"
    SELECT id, isca_id, previous_image_revision_id, version, tag, status, created_at, updated_at
    FROM image_revision
"#;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A [`Repository`] backed by a SQLite database.
///
/// Writes go through one in-process lock so revision bookkeeping never races with itself.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    write_lock: Arc<Mutex<()>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SqliteStore {
    /// Opens the database at `db_path`, creating it and applying migrations as needed.
    pub async fn open(db_path: impl AsRef<Path>) -> PescarResult<Self> {
        let pool = init_db(db_path, &STORE_MIGRATOR).await?;
        Ok(Self::from_pool(pool))
    }

    /// Wraps an already migrated pool.
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn fetch_iscas(&self, sql: &str, binds: &[&str]) -> PescarResult<Vec<Isca>> {
        let mut query = sqlx::query(sql);
        for value in binds {
            query = query.bind(*value);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(isca_from_row).collect()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Repository for SqliteStore {
    async fn get_isca(&self, id: i64) -> PescarResult<Isca> {
        let sql = format!("{} WHERE i.id = ?", SELECT_ISCA);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(PescarError::IscaNotFound(id))?;

        isca_from_row(&row)
    }

    async fn find_isca(
        &self,
        namespace: &str,
        deployment: &str,
        container: &str,
    ) -> PescarResult<Option<Isca>> {
        let sql = format!(
            "{} WHERE i.deployment_namespace = ? AND i.deployment_name = ? AND i.container_name = ?",
            SELECT_ISCA
        );
        let iscas = self
            .fetch_iscas(&sql, &[namespace, deployment, container])
            .await?;

        Ok(iscas.into_iter().next())
    }

    async fn list_iscas(&self) -> PescarResult<Vec<Isca>> {
        let sql = format!("{} ORDER BY i.id", SELECT_ISCA);
        self.fetch_iscas(&sql, &[]).await
    }

    async fn list_active_iscas(&self) -> PescarResult<Vec<Isca>> {
        let sql = format!("{} WHERE i.active = 1 ORDER BY i.id", SELECT_ISCA);
        self.fetch_iscas(&sql, &[]).await
    }

    async fn create_isca(&self, isca: NewIsca) -> PescarResult<Isca> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();

        let record = sqlx::query(
            r#"
            INSERT INTO isca (
                anzol_id, registry_url, repository, pulling_strategy,
                deployment_namespace, deployment_name, container_name, active,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(isca.anzol_id)
        .bind(&isca.registry.url)
        .bind(&isca.registry.repository)
        .bind(isca.pulling_strategy.map(|s| s.as_str()))
        .bind(&isca.deployment.namespace)
        .bind(&isca.deployment.name)
        .bind(&isca.deployment.container_name)
        .bind(isca.deployment.active)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let id = record.get::<i64, _>("id");
        drop(_guard);

        self.get_isca(id).await
    }

    async fn update_isca(&self, isca: &Isca) -> PescarResult<()> {
        let _guard = self.write_lock.lock().await;

        let result = sqlx::query(
            r#"
            UPDATE isca
            SET anzol_id = ?, registry_url = ?, repository = ?, active = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(isca.anzol_id)
        .bind(&isca.registry.url)
        .bind(&isca.registry.repository)
        .bind(isca.deployment.active)
        .bind(Utc::now())
        .bind(isca.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PescarError::IscaNotFound(isca.id));
        }

        Ok(())
    }

    async fn get_anzol(&self, id: i64) -> PescarResult<Anzol> {
        let row = sqlx::query(
            r#"
            SELECT id, name, registry_username, registry_password, pulling_strategy,
                   rollback_timeout_secs, rollback_strategy, rollback_enabled
            FROM anzol
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(PescarError::AnzolNotFound(id))?;

        Ok(Anzol {
            id: row.get("id"),
            name: row.get("name"),
            credentials: credentials_from_row(&row),
            pulling_strategy: row.get::<String, _>("pulling_strategy").parse()?,
            rollback: rollback_from_row(&row)?,
        })
    }

    async fn save_anzol(&self, anzol: &Anzol) -> PescarResult<()> {
        let _guard = self.write_lock.lock().await;
        let (username, password) = match &anzol.credentials {
            Some(c) => (Some(c.username.as_str()), Some(c.password.as_str())),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO anzol (
                id, name, registry_username, registry_password, pulling_strategy,
                rollback_timeout_secs, rollback_strategy, rollback_enabled
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                registry_username = excluded.registry_username,
                registry_password = excluded.registry_password,
                pulling_strategy = excluded.pulling_strategy,
                rollback_timeout_secs = excluded.rollback_timeout_secs,
                rollback_strategy = excluded.rollback_strategy,
                rollback_enabled = excluded.rollback_enabled
            "#,
        )
        .bind(anzol.id)
        .bind(&anzol.name)
        .bind(username)
        .bind(password)
        .bind(anzol.pulling_strategy.as_str())
        .bind(anzol.rollback.timeout.as_secs() as i64)
        .bind(anzol.rollback.strategy.as_str())
        .bind(anzol.rollback.enabled)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_image_revision(&self, isca_id: i64) -> PescarResult<Option<ImageRevision>> {
        let sql = format!("{} WHERE isca_id = ? ORDER BY id DESC LIMIT 1", SELECT_REVISION);
        let row = sqlx::query(&sql)
            .bind(isca_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(revision_from_row).transpose()
    }

    async fn get_image_revision(&self, id: i64) -> PescarResult<ImageRevision> {
        let sql = format!("{} WHERE id = ?", SELECT_REVISION);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(PescarError::ImageRevisionNotFound(id))?;

        revision_from_row(&row)
    }

    async fn list_image_revisions(&self, isca_id: i64) -> PescarResult<Vec<ImageRevision>> {
        let sql = format!("{} WHERE isca_id = ? ORDER BY id DESC", SELECT_REVISION);
        let rows = sqlx::query(&sql)
            .bind(isca_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(revision_from_row).collect()
    }

    async fn create_image_revision(
        &self,
        revision: NewImageRevision,
    ) -> PescarResult<ImageRevision> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        if let Some(previous_id) = revision.previous_image_revision_id {
            let previous = sqlx::query("SELECT isca_id FROM image_revision WHERE id = ?")
                .bind(previous_id)
                .fetch_optional(&mut *tx)
                .await?;

            if previous.map(|row| row.get::<i64, _>("isca_id")) != Some(revision.isca_id) {
                return Err(PescarError::ImageRevisionNotFound(previous_id));
            }
        }

        if revision.status == ImageStatus::Pending {
            sqlx::query(
                "UPDATE image_revision SET status = ?, updated_at = ? WHERE isca_id = ? AND status = ?",
            )
            .bind(ImageStatus::Outdated.as_str())
            .bind(now)
            .bind(revision.isca_id)
            .bind(ImageStatus::Pending.as_str())
            .execute(&mut *tx)
            .await?;
        }

        let row = sqlx::query(
            r#"
            INSERT INTO image_revision (
                isca_id, previous_image_revision_id, version, tag, status, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id, isca_id, previous_image_revision_id, version, tag, status, created_at, updated_at
            "#,
        )
        .bind(revision.isca_id)
        .bind(revision.previous_image_revision_id)
        .bind(&revision.version)
        .bind(&revision.tag)
        .bind(revision.status.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let created = revision_from_row(&row)?;
        tx.commit().await?;

        Ok(created)
    }

    async fn update_image_revision_status(&self, id: i64, status: ImageStatus) -> PescarResult<()> {
        let _guard = self.write_lock.lock().await;

        let result =
            sqlx::query("UPDATE image_revision SET status = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(PescarError::ImageRevisionNotFound(id));
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Initializes a new SQLite database if it doesn't already exist at the specified path.
///
/// ## Arguments
///
/// * `db_path` - Path where the SQLite database file should be created
/// * `migrator` - SQLx migrator containing database schema migrations to run
pub async fn init_db(db_path: impl AsRef<Path>, migrator: &Migrator) -> PescarResult<Pool<Sqlite>> {
    let db_path = db_path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    migrator.run(&pool).await?;

    Ok(pool)
}

fn isca_from_row(row: &SqliteRow) -> PescarResult<Isca> {
    Ok(Isca {
        id: row.get("id"),
        anzol_id: row.get("anzol_id"),
        registry: RegistryCoordinates {
            url: row.get("registry_url"),
            repository: row.get("repository"),
        },
        pulling_strategy: row.get::<String, _>("pulling_strategy").parse()?,
        rollback: rollback_from_row(row)?,
        credentials: credentials_from_row(row),
        deployment: DeploymentCoordinates {
            namespace: row.get("deployment_namespace"),
            name: row.get("deployment_name"),
            container_name: row.get("container_name"),
            active: row.get("active"),
        },
    })
}

fn rollback_from_row(row: &SqliteRow) -> PescarResult<RollbackPolicy> {
    Ok(RollbackPolicy {
        timeout: Duration::from_secs(row.get::<i64, _>("rollback_timeout_secs").max(0) as u64),
        strategy: row.get::<String, _>("rollback_strategy").parse()?,
        enabled: row.get("rollback_enabled"),
    })
}

fn credentials_from_row(row: &SqliteRow) -> Option<RegistryCredentials> {
    let username = row.get::<Option<String>, _>("registry_username")?;
    let password = row.get::<Option<String>, _>("registry_password")?;
    Some(RegistryCredentials { username, password })
}

fn revision_from_row(row: &SqliteRow) -> PescarResult<ImageRevision> {
    Ok(ImageRevision {
        id: row.get("id"),
        isca_id: row.get("isca_id"),
        previous_image_revision_id: row.get("previous_image_revision_id"),
        version: row.get("version"),
        tag: row.get("tag"),
        status: row.get::<String, _>("status").parse()?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
