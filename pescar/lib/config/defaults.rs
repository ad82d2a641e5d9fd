use std::{path::PathBuf, sync::LazyLock};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The directory under the user's home where pescar keeps its data.
pub const PESCAR_HOME_DIR: &str = ".pescar";

/// The environment variable that overrides the pescar home directory.
pub const PESCAR_HOME_ENV_VAR: &str = "PESCAR_HOME";

/// The environment variable pointing at the configuration file.
pub const PESCAR_CONFIG_ENV_VAR: &str = "PESCAR_CONFIG";

/// The name of the configuration file looked up in the pescar home.
pub const PESCAR_CONFIG_FILENAME: &str = "pescar.toml";

/// The name of the database file in the pescar home.
pub const PESCAR_DB_FILENAME: &str = "pescar.db";

/// Default port for the admin HTTP server
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// How many times an update is retried when the Deployment changed underneath it.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 5;

/// The base delay between conflict retries, in milliseconds.
pub const DEFAULT_CONFLICT_BACKOFF_MS: u64 = 200;

/// How often registries are polled, in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// How many iscas are polled at the same time.
pub const DEFAULT_POLL_CONCURRENCY: usize = 8;

/// How often a freshly updated container is checked for health, in seconds.
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 10;

/// How long an update may take to become healthy when the rollback policy sets no timeout.
pub const DEFAULT_HEALTH_CHECK_TIMEOUT_SECS: u64 = 300;

/// The registry assumed when an image reference names none.
pub const DEFAULT_REFERENCE_REGISTRY: &str = "docker.io";

/// The namespace single-segment Docker Hub repositories live in.
pub const DEFAULT_REFERENCE_NAMESPACE: &str = "library";

/// The tag assumed when an image reference names none.
pub const DEFAULT_REFERENCE_TAG: &str = "latest";

/// The path where all pescar global data is stored.
pub static DEFAULT_PESCAR_HOME: LazyLock<PathBuf> =
    LazyLock::new(|| dirs::home_dir().unwrap_or_default().join(PESCAR_HOME_DIR));
