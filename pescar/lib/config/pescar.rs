//! The `pescar.toml` configuration file.

use std::{
    env,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    cluster::AnnotationFilter,
    models::{Anzol, PullingStrategy, RegistryCredentials, RollbackPolicy, RollbackStrategy},
    registry::{DEFAULT_MAX_RETRIES, DEFAULT_TAG_CONCURRENCY},
    store::DEFAULT_ANZOL_ID,
    PescarError, PescarResult,
};

use super::{
    DEFAULT_CONFLICT_BACKOFF_MS, DEFAULT_CONFLICT_RETRIES, DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
    DEFAULT_HEALTH_CHECK_TIMEOUT_SECS, DEFAULT_PESCAR_HOME, DEFAULT_POLL_CONCURRENCY,
    DEFAULT_POLL_INTERVAL_SECS, DEFAULT_SERVER_PORT, PESCAR_CONFIG_FILENAME, PESCAR_DB_FILENAME,
    PESCAR_HOME_ENV_VAR,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The pescar configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct PescarConfig {
    /// The admin HTTP server.
    server: ServerConfig,

    /// Where state is persisted.
    database: DatabaseConfig,

    /// How the cluster is reached and which Deployments are tracked.
    kubernetes: KubernetesConfig,

    /// Log output.
    logger: LoggerConfig,

    /// How registries are polled.
    polling: PollingConfig,

    /// The registry HTTP client.
    registry: RegistryConfig,

    /// Values new iscas and updates fall back to.
    defaults: DefaultsConfig,

    /// Anzols to create or refresh at startup.
    anzols: Vec<AnzolConfig>,
}

/// The `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct ServerConfig {
    /// The port the admin API listens on.
    #[builder(default = DEFAULT_SERVER_PORT)]
    port: u16,
}

/// The `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct DatabaseConfig {
    /// The SQLite database file. A leading `~` is expanded to the home directory.
    #[builder(default = pescar_home().join(PESCAR_DB_FILENAME))]
    path: PathBuf,
}

/// The `[kubernetes]` section.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct KubernetesConfig {
    /// A kubeconfig file. The in-cluster or default configuration is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    config: Option<PathBuf>,

    /// How many times an image update is attempted when it conflicts.
    #[builder(default = DEFAULT_CONFLICT_RETRIES)]
    conflict_retries: u32,

    /// The base delay between conflicting attempts, in milliseconds.
    #[builder(default = DEFAULT_CONFLICT_BACKOFF_MS)]
    conflict_backoff_ms: u64,

    /// The annotations a Deployment must carry to be tracked.
    #[builder(default)]
    annotations: AnnotationFilter,
}

/// The `[logger]` section.
#[derive(Debug, Default, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct LoggerConfig {
    /// Whether logs are written as JSON lines.
    #[builder(default)]
    json: bool,
}

/// The `[polling]` section.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct PollingConfig {
    /// Seconds between two polling rounds.
    #[builder(default = DEFAULT_POLL_INTERVAL_SECS)]
    interval_secs: u64,

    /// Seconds a single isca may take to resolve. Defaults to the interval.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    timeout_secs: Option<u64>,

    /// How many iscas are polled at the same time.
    #[builder(default = DEFAULT_POLL_CONCURRENCY)]
    concurrency: usize,
}

/// The `[registry]` section.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct RegistryConfig {
    /// How many tag manifests are fetched at the same time.
    #[builder(default = DEFAULT_TAG_CONCURRENCY)]
    tag_concurrency: usize,

    /// How many times a transient HTTP failure is retried.
    #[builder(default = DEFAULT_MAX_RETRIES)]
    max_retries: u32,
}

/// The `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct DefaultsConfig {
    /// The anzol new iscas join.
    #[builder(default = DEFAULT_ANZOL_ID)]
    anzol_id: i64,

    /// The pulling strategy new iscas are created with when their anzol sets none.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pulling_strategy: Option<PullingStrategy>,

    /// Seconds between health checks of a freshly updated container.
    #[builder(default = DEFAULT_HEALTH_CHECK_INTERVAL_SECS)]
    health_check_interval_secs: u64,

    /// Seconds an update may take to become healthy when the rollback policy sets no timeout.
    #[builder(default = DEFAULT_HEALTH_CHECK_TIMEOUT_SECS)]
    health_check_timeout_secs: u64,
}

/// An `[[anzols]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct AnzolConfig {
    /// The id of the anzol.
    id: i64,

    /// The name of the anzol.
    #[builder(setter(transform = |name: impl AsRef<str>| name.as_ref().to_string()))]
    name: String,

    /// The registry user name.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option, into))]
    username: Option<String>,

    /// The registry password or access token.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option, into))]
    password: Option<String>,

    /// The group's pulling strategy.
    #[serde(default)]
    #[builder(default)]
    pulling_strategy: PullingStrategy,

    /// Whether failed updates are rolled back automatically.
    #[serde(default)]
    #[builder(default)]
    rollback_enabled: bool,

    /// How long an update has to become healthy, in seconds.
    #[serde(default = "AnzolConfig::default_rollback_timeout_secs")]
    #[builder(default = AnzolConfig::default_rollback_timeout_secs())]
    rollback_timeout_secs: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PescarConfig {
    /// Loads the configuration.
    ///
    /// An explicit `path` must exist. Without one, `pescar.toml` in the pescar home is used when
    /// present and the defaults otherwise.
    pub async fn load(path: Option<&Path>) -> PescarResult<Self> {
        Self::load_from(path, &pescar_home()).await
    }

    /// Like [`PescarConfig::load`], looking for the default file under `home`.
    pub async fn load_from(path: Option<&Path>, home: &Path) -> PescarResult<Self> {
        let path = match path {
            Some(path) => {
                if !tokio::fs::try_exists(path).await? {
                    return Err(PescarError::ConfigNotFound(path.display().to_string()));
                }
                path.to_path_buf()
            }
            None => {
                let path = home.join(PESCAR_CONFIG_FILENAME);
                if !tokio::fs::try_exists(&path).await? {
                    tracing::debug!(path = %path.display(), "no config file, using defaults");
                    return Ok(Self::default());
                }
                path
            }
        };

        tracing::info!(path = %path.display(), "loading config");
        let content = tokio::fs::read_to_string(&path).await?;
        content.parse()
    }

    /// Checks the configuration for values pescar cannot run with.
    pub fn validate(&self) -> PescarResult<()> {
        let mut errors = Vec::new();

        if self.polling.interval_secs == 0 {
            errors.push("polling.interval_secs must be greater than zero".to_string());
        }

        if self.polling.concurrency == 0 {
            errors.push("polling.concurrency must be greater than zero".to_string());
        }

        if self.registry.tag_concurrency == 0 {
            errors.push("registry.tag_concurrency must be greater than zero".to_string());
        }

        if self.defaults.health_check_interval_secs == 0 {
            errors.push("defaults.health_check_interval_secs must be greater than zero".to_string());
        }

        for anzol in &self.anzols {
            if anzol.username.is_some() != anzol.password.is_some() {
                errors.push(format!(
                    "anzol {} must set both username and password or neither",
                    anzol.name
                ));
            }
        }

        let mut ids: Vec<i64> = self.anzols.iter().map(|a| a.id).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|pair| pair[0] == pair[1]) {
            errors.push("anzol ids must be unique".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PescarError::ConfigValidationErrors(errors))
        }
    }
}

impl DatabaseConfig {
    /// The database path with a leading `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        expand_home(&self.path)
    }
}

impl KubernetesConfig {
    /// The delay before the first conflict retry.
    pub fn conflict_backoff(&self) -> Duration {
        Duration::from_millis(self.conflict_backoff_ms)
    }
}

impl PollingConfig {
    /// The time between two polling rounds.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// The deadline of a single isca's resolution.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(self.interval_secs))
    }
}

impl DefaultsConfig {
    /// The time between two health checks.
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    /// The confirmation deadline used when an isca's rollback policy has none.
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }
}

impl AnzolConfig {
    /// Default rollback timeout for anzols.
    pub fn default_rollback_timeout_secs() -> u64 {
        RollbackPolicy::default().timeout.as_secs()
    }

    /// The anzol this entry describes.
    pub fn to_anzol(&self) -> Anzol {
        let credentials = match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(RegistryCredentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        Anzol {
            id: self.id,
            name: self.name.clone(),
            credentials,
            pulling_strategy: self.pulling_strategy,
            rollback: RollbackPolicy {
                timeout: Duration::from_secs(self.rollback_timeout_secs),
                strategy: RollbackStrategy::Changeback,
                enabled: self.rollback_enabled,
            },
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The pescar home directory, honouring `PESCAR_HOME`.
pub fn pescar_home() -> PathBuf {
    match env::var(PESCAR_HOME_ENV_VAR) {
        Ok(home) if !home.is_empty() => expand_home(Path::new(&home)),
        _ => DEFAULT_PESCAR_HOME.clone(),
    }
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for PescarConfig {
    type Err = PescarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
