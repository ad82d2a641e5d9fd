//! Domain models for pescar.
//!
//! An [`Isca`] ("bait") is one container of one Deployment that pescar keeps up to date. Iscas
//! are grouped under an [`Anzol`] ("hook") which carries shared registry credentials and
//! rollback defaults. Every image pescar observes for an isca becomes an [`ImageRevision`],
//! linked to the revision before it.

use std::{fmt, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{reference::registry_host, PescarError};

//--------------------------------------------------------------------------------------------------
// Types: Isca
//--------------------------------------------------------------------------------------------------

/// A tracked container within a Kubernetes Deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Isca {
    /// The unique identifier for the isca.
    pub id: i64,

    /// The anzol the isca belongs to.
    pub anzol_id: i64,

    /// Where the isca's images come from.
    pub registry: RegistryCoordinates,

    /// How "the newest image" is picked among the repository's tags.
    pub pulling_strategy: PullingStrategy,

    /// The effective rollback policy, defaulted from the anzol.
    pub rollback: RollbackPolicy,

    /// The registry credentials of the anzol, if any.
    #[serde(skip)]
    pub credentials: Option<RegistryCredentials>,

    /// Where the container lives in the cluster.
    pub deployment: DeploymentCoordinates,
}

/// The fields needed to start tracking a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIsca {
    /// The anzol the isca belongs to.
    pub anzol_id: i64,

    /// Where the isca's images come from.
    pub registry: RegistryCoordinates,

    /// The pulling strategy, or `None` to use the anzol's default.
    pub pulling_strategy: Option<PullingStrategy>,

    /// Where the container lives in the cluster.
    pub deployment: DeploymentCoordinates,
}

/// A registry endpoint and a repository path within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryCoordinates {
    /// The base URL of the registry API (e.g. `https://registry-1.docker.io`).
    pub url: String,

    /// The repository path (e.g. `library/nginx`).
    pub repository: String,
}

/// Identifies a container within a Deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentCoordinates {
    /// The namespace of the Deployment.
    pub namespace: String,

    /// The name of the Deployment.
    pub name: String,

    /// The name of the container.
    pub container_name: String,

    /// Whether the container is currently managed.
    pub active: bool,
}

/// Credentials used against a registry's token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    /// The user name.
    pub username: String,

    /// The password or access token.
    pub password: String,
}

/// The rule used to select the newest image among a repository's tags.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullingStrategy {
    /// The lexicographically greatest tag wins.
    Lexicographic,

    /// The tag whose image was created last wins.
    #[default]
    LatestByDate,
}

//--------------------------------------------------------------------------------------------------
// Types: Rollback
//--------------------------------------------------------------------------------------------------

/// Governs whether and how a tracked deployment is reverted after a bad update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackPolicy {
    /// How long an update has to become healthy.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// How the deployment is reverted.
    pub strategy: RollbackStrategy,

    /// Whether automatic rollback is enabled.
    pub enabled: bool,
}

/// How a rollback picks the image to go back to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackStrategy {
    /// Revert to the immediately preceding revision.
    #[default]
    Changeback,
}

//--------------------------------------------------------------------------------------------------
// Types: Anzol
//--------------------------------------------------------------------------------------------------

/// A group of iscas sharing registry credentials and defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anzol {
    /// The unique identifier for the anzol.
    pub id: i64,

    /// The name of the anzol.
    pub name: String,

    /// Registry credentials shared by the group.
    pub credentials: Option<RegistryCredentials>,

    /// Default pulling strategy for the group.
    pub pulling_strategy: PullingStrategy,

    /// Default rollback policy for the group.
    pub rollback: RollbackPolicy,
}

//--------------------------------------------------------------------------------------------------
// Types: ImageRevision
//--------------------------------------------------------------------------------------------------

/// One resolved image version observed for an isca.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRevision {
    /// The unique identifier for the revision.
    pub id: i64,

    /// The isca the revision belongs to.
    pub isca_id: i64,

    /// The revision this one superseded.
    pub previous_image_revision_id: Option<i64>,

    /// The registry digest of the image.
    pub version: String,

    /// The tag the digest was resolved from.
    pub tag: Option<String>,

    /// Where the revision is in its lifecycle.
    pub status: ImageStatus,

    /// When the revision was created.
    pub created_at: DateTime<Utc>,

    /// When the revision was last modified.
    pub updated_at: DateTime<Utc>,
}

/// The fields needed to record a new revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImageRevision {
    /// The isca the revision belongs to.
    pub isca_id: i64,

    /// The revision this one supersedes.
    pub previous_image_revision_id: Option<i64>,

    /// The registry digest of the image.
    pub version: String,

    /// The tag the digest was resolved from.
    pub tag: Option<String>,

    /// The initial status.
    pub status: ImageStatus,
}

/// The lifecycle status of an image revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    /// Detected, not yet confirmed healthy.
    Pending,

    /// Applied and confirmed healthy.
    Stable,

    /// Failed to apply or to become healthy.
    Error,

    /// Reverted in favour of its predecessor.
    Rollback,

    /// Superseded by a newer revision.
    Outdated,
}

/// A newly detected revision together with the isca it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImage {
    /// The isca to update.
    pub isca: Isca,

    /// The revision to apply.
    pub revision: ImageRevision,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Isca {
    /// The image reference a revision resolves to for this isca, pinned by digest.
    pub fn image_for(&self, revision: &ImageRevision) -> String {
        format!(
            "{}/{}@{}",
            registry_host(&self.registry.url),
            self.registry.repository,
            revision.version
        )
    }
}

impl ImageStatus {
    /// Returns the status as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStatus::Pending => "pending",
            ImageStatus::Stable => "stable",
            ImageStatus::Error => "error",
            ImageStatus::Rollback => "rollback",
            ImageStatus::Outdated => "outdated",
        }
    }
}

impl PullingStrategy {
    /// Returns the strategy as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            PullingStrategy::Lexicographic => "lexicographic",
            PullingStrategy::LatestByDate => "latest-by-date",
        }
    }
}

impl RollbackStrategy {
    /// Returns the strategy as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            RollbackStrategy::Changeback => "changeback",
        }
    }
}

impl Default for RollbackPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3600),
            strategy: RollbackStrategy::Changeback,
            enabled: false,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for ImageStatus {
    type Err = PescarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ImageStatus::Pending),
            "stable" => Ok(ImageStatus::Stable),
            "error" => Ok(ImageStatus::Error),
            "rollback" => Ok(ImageStatus::Rollback),
            "outdated" => Ok(ImageStatus::Outdated),
            _ => Err(PescarError::InvalidImageStatus(s.to_string())),
        }
    }
}

impl FromStr for PullingStrategy {
    type Err = PescarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lexicographic" => Ok(PullingStrategy::Lexicographic),
            "latest-by-date" | "latest_by_date" | "latest" => Ok(PullingStrategy::LatestByDate),
            _ => Err(PescarError::InvalidPullingStrategy(s.to_string())),
        }
    }
}

impl FromStr for RollbackStrategy {
    type Err = PescarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "changeback" => Ok(RollbackStrategy::Changeback),
            _ => Err(PescarError::InvalidRollbackStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PullingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for DeploymentCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.name, self.container_name)
    }
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

//--------------------------------------------------------------------------------------------------
// Modules
//--------------------------------------------------------------------------------------------------

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_for_pins_digest_on_registry_host() {
        let isca = Isca {
            id: 1,
            anzol_id: 1,
            registry: RegistryCoordinates {
                url: "https://registry-1.docker.io".to_string(),
                repository: "library/nginx".to_string(),
            },
            pulling_strategy: PullingStrategy::LatestByDate,
            rollback: RollbackPolicy::default(),
            credentials: None,
            deployment: DeploymentCoordinates {
                namespace: "default".to_string(),
                name: "web".to_string(),
                container_name: "nginx".to_string(),
                active: true,
            },
        };
        let revision = ImageRevision {
            id: 7,
            isca_id: 1,
            previous_image_revision_id: None,
            version: "sha256:abc".to_string(),
            tag: Some("1.27".to_string()),
            status: ImageStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert_eq!(
            isca.image_for(&revision),
            "docker.io/library/nginx@sha256:abc"
        );
    }

    #[test]
    fn test_status_and_strategy_parse() {
        for status in [
            ImageStatus::Pending,
            ImageStatus::Stable,
            ImageStatus::Error,
            ImageStatus::Rollback,
            ImageStatus::Outdated,
        ] {
            assert_eq!(status.as_str().parse::<ImageStatus>().unwrap(), status);
        }

        assert_eq!(
            "Latest-By-Date".parse::<PullingStrategy>().unwrap(),
            PullingStrategy::LatestByDate
        );
        assert!("newest".parse::<PullingStrategy>().is_err());
        assert!("bogus".parse::<ImageStatus>().is_err());
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let credentials = RegistryCredentials {
            username: "fisher".to_string(),
            password: "hunter2".to_string(),
        };

        let debug = format!("{:?}", credentials);
        assert!(debug.contains("fisher"));
        assert!(!debug.contains("hunter2"));
    }
}
