use std::{
    error::Error,
    fmt::{self, Display},
};
use thiserror::Error;

use crate::registry::RegistryHttpError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a pescar-related operation.
pub type PescarResult<T> = Result<T, PescarError>;

/// An error that occurred while tracking, polling, updating or rolling back a deployment.
#[derive(pretty_error_debug::Debug, Error)]
pub enum PescarError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// Obtaining a bearer token from the registry failed.
    #[error("registry authentication failed for {registry}/{repository}: {reason}")]
    Authentication {
        /// The registry the token was requested for.
        registry: String,

        /// The repository the token was requested for.
        repository: String,

        /// Why the token could not be obtained.
        reason: String,
    },

    /// The registry answered with a non-2xx status.
    #[error("registry http error: {0}")]
    RegistryHttp(#[from] RegistryHttpError),

    /// The registry did not send a `Docker-Content-Digest` header for a manifest.
    #[error("registry did not return a digest for {repository}:{tag}")]
    ManifestDigestMissing {
        /// The repository of the manifest.
        repository: String,

        /// The tag of the manifest.
        tag: String,
    },

    /// The repository has no tags at all.
    #[error("repository {0} has no tags")]
    NoTags(String),

    /// No tag of the repository could be resolved with the requested strategy.
    #[error("no tag of repository {0} could be resolved")]
    NoResolvableTag(String),

    /// Polling a registry took longer than the allowed deadline.
    #[error("polling {0} timed out")]
    PollTimeout(String),

    /// An error that occurred during an HTTP request.
    #[error("http request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// An error that occurred during an HTTP middleware operation.
    #[error("http middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// The deployment kept changing under us until the retry budget was spent.
    #[error("update of {namespace}/{deployment} conflicted {attempts} times")]
    UpdateConflict {
        /// The namespace of the deployment.
        namespace: String,

        /// The name of the deployment.
        deployment: String,

        /// How many attempts were made.
        attempts: u32,
    },

    /// The tracked container does not exist in the deployment.
    #[error("container {namespace}/{deployment}/{container} could not be found")]
    ContainerNotFound {
        /// The namespace of the deployment.
        namespace: String,

        /// The name of the deployment.
        deployment: String,

        /// The name of the container.
        container: String,
    },

    /// The revision has no predecessor to go back to.
    #[error("image revision {0} has no backward revision")]
    NoBackwardRevision(i64),

    /// The isca has not recorded any image revision yet.
    #[error("isca {0} has no image revision")]
    NoImageRevision(i64),

    /// No tracked deployment with the given id exists.
    #[error("isca {0} not found")]
    IscaNotFound(i64),

    /// No anzol with the given id exists.
    #[error("anzol {0} not found")]
    AnzolNotFound(i64),

    /// No image revision with the given id exists.
    #[error("image revision {0} not found")]
    ImageRevisionNotFound(i64),

    /// An image reference could not be parsed.
    #[error("image reference error: {0}")]
    ImageReferenceError(String),

    /// An unknown pulling strategy name.
    #[error("invalid pulling strategy: {0}")]
    InvalidPullingStrategy(String),

    /// An unknown rollback strategy name.
    #[error("invalid rollback strategy: {0}")]
    InvalidRollbackStrategy(String),

    /// An unknown image revision status.
    #[error("invalid image status: {0}")]
    InvalidImageStatus(String),

    /// An error returned by the database.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An error that occurred while applying database migrations.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An error returned by the Kubernetes API.
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The Kubernetes client could not be configured.
    #[error("kubernetes config error: {0}")]
    KubeConfig(String),

    /// An error that occurred during a serde json operation.
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// The configuration file could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The configuration parsed but describes something pescar cannot run with.
    #[error("config validation errors: {0:?}")]
    ConfigValidationErrors(Vec<String>),

    /// The configuration file given explicitly does not exist.
    #[error("config file not found: {0}")]
    ConfigNotFound(String),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PescarError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> PescarError {
        PescarError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Returns `true` if the error is an optimistic-concurrency conflict from the API server.
    pub fn is_conflict(&self) -> bool {
        matches!(self, PescarError::Kube(kube::Error::Api(response)) if response.code == 409)
    }

    /// Returns `true` if the error means the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            PescarError::IscaNotFound(_)
            | PescarError::AnzolNotFound(_)
            | PescarError::ImageRevisionNotFound(_) => true,
            PescarError::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `PescarResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> PescarResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
