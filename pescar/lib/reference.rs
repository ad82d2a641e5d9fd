//! Parsing of container image references as they appear in Deployment specs.

use std::{fmt, str::FromStr, sync::LazyLock};

use getset::Getters;
use regex::Regex;

use crate::{
    config::{DEFAULT_REFERENCE_NAMESPACE, DEFAULT_REFERENCE_REGISTRY, DEFAULT_REFERENCE_TAG},
    PescarError,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The host Docker Hub serves its registry API from.
const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";

static REGISTRY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9.-]+(:[0-9]+)?$").unwrap());

static REPOSITORY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9]+(?:[._-][a-z0-9]+)*)(/[a-z0-9]+(?:[._-][a-z0-9]+)*)*$").unwrap()
});

static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w[\w.-]{0,127}$").unwrap());

static DIGEST_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-zA-Z0-9=_-]{32,}$").unwrap()
});

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A parsed image reference such as `ghcr.io/acme/api:1.4@sha256:...`.
///
/// Missing parts are defaulted the way container runtimes do: `docker.io` for the registry,
/// `library/` for single-segment Docker Hub repositories and `latest` for the tag.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Reference {
    /// The registry host, optionally with a port.
    registry: String,

    /// The repository path.
    repository: String,

    /// The tag.
    tag: String,

    /// The digest, if the reference was pinned.
    digest: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Reference {
    /// The base URL of the registry's HTTP API.
    pub fn registry_url(&self) -> String {
        registry_url(&self.registry)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for Reference {
    type Err = PescarError;

    /// Parses an image reference.
    ///
    /// Supported formats include:
    /// - "registry/repository:tag"
    /// - "repository:tag"
    /// - "repository"
    /// - "registry/repository@digest"
    /// - "registry/repository:tag@digest"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PescarError::ImageReferenceError(
                "input string is empty".into(),
            ));
        }

        let (name, digest) = match s.split_once('@') {
            Some((name, digest)) => {
                if !DIGEST_REGEX.is_match(digest) {
                    return Err(PescarError::ImageReferenceError(format!(
                        "invalid digest: {}",
                        digest
                    )));
                }
                (name, Some(digest.to_string()))
            }
            None => (s, None),
        };

        let (registry, remainder) = extract_registry_and_path(name);
        let (repository, tag) = extract_repository_and_tag(&registry, remainder)?;

        validate(&REGISTRY_REGEX, "registry", &registry)?;
        validate(&REPOSITORY_REGEX, "repository", &repository)?;
        validate(&TAG_REGEX, "tag", &tag)?;

        Ok(Reference {
            registry,
            repository,
            tag,
            digest,
        })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)?;
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Maps a registry host as written in image references to the base URL of its API.
pub fn registry_url(registry: &str) -> String {
    if registry == DEFAULT_REFERENCE_REGISTRY || registry == "index.docker.io" {
        return format!("https://{}", DOCKER_HUB_API_HOST);
    }

    let host = registry.split(':').next().unwrap_or(registry);
    if host == "localhost" || host == "127.0.0.1" {
        format!("http://{}", registry)
    } else {
        format!("https://{}", registry)
    }
}

/// Maps a registry API base URL back to the host used in image references.
pub fn registry_host(url: &str) -> &str {
    let host = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');

    if host == DOCKER_HUB_API_HOST {
        DEFAULT_REFERENCE_REGISTRY
    } else {
        host
    }
}

fn validate(regex: &Regex, what: &str, value: &str) -> Result<(), PescarError> {
    if regex.is_match(value) {
        Ok(())
    } else {
        Err(PescarError::ImageReferenceError(format!(
            "invalid {}: {}",
            what, value
        )))
    }
}

/// Splits off the registry if the first path segment looks like a host.
fn extract_registry_and_path(reference: &str) -> (String, &str) {
    match reference.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (first.to_string(), rest)
        }
        _ => (DEFAULT_REFERENCE_REGISTRY.to_string(), reference),
    }
}

/// Splits the tag off the repository path, applying the Docker Hub namespace where needed.
fn extract_repository_and_tag(
    registry: &str,
    path: &str,
) -> Result<(String, String), PescarError> {
    let (repository, tag) = match path.rsplit_once(':') {
        Some((repository, tag)) => (repository, tag),
        None => (path, DEFAULT_REFERENCE_TAG),
    };

    if repository.is_empty() {
        return Err(PescarError::ImageReferenceError(
            "repository is empty".into(),
        ));
    }

    let repository = if registry == DEFAULT_REFERENCE_REGISTRY && !repository.contains('/') {
        format!("{}/{}", DEFAULT_REFERENCE_NAMESPACE, repository)
    } else {
        repository.to_string()
    };

    Ok((repository, tag.to_string()))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
