use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use getset::Getters;
use reqwest::{header::ACCEPT, Client};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};

use crate::{
    models::{PullingStrategy, RegistryCoordinates, RegistryCredentials},
    reference::Reference,
    PescarError, PescarResult,
};

use super::{
    select_latest_by_date, select_lexicographic,
    types::{ManifestV1, TagList},
    AuthProvider, ImageResolver, RegistryHttpError, ResolvedImage, TokenCache,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Schema 1 manifests carry the creation time of every layer in their history.
const MANIFEST_V1_MIME_TYPE: &str = "application/vnd.docker.distribution.manifest.v1+prettyjws";

/// Schema 2 manifest, requested to read the digest a tag points to.
const MANIFEST_V2_MIME_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// The header registries report a manifest's content digest in.
const DOCKER_CONTENT_DIGEST_HEADER: &str = "Docker-Content-Digest";

/// The most tag list pages followed for one repository.
pub const MAX_TAG_PAGES: usize = 100;

/// The default number of tags whose manifests are fetched at the same time.
pub const DEFAULT_TAG_CONCURRENCY: usize = 8;

/// The default number of retries for transient HTTP failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A client for the Docker Registry HTTP API v2 that finds the newest image of a repository.
///
/// The underlying HTTP client is immutable and shared. Authorization and `Accept` headers are
/// set on each request, so one client can serve any number of concurrent resolutions against
/// different registries.
///
/// [Docker Registry API]: https://distribution.github.io/distribution/spec/api/
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct DockerRegistryClient {
    /// The HTTP client used to talk to registries.
    client: ClientWithMiddleware,

    /// The token cache used to authorize requests.
    auth: TokenCache,

    /// How many tag manifests are fetched concurrently by the latest-by-date strategy.
    tag_concurrency: usize,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DockerRegistryClient {
    /// Creates a new client that retries transient failures up to `max_retries` times.
    pub fn new(max_retries: u32, tag_concurrency: usize) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let client = ClientBuilder::new(Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self {
            auth: TokenCache::new(client.clone()),
            client,
            tag_concurrency: tag_concurrency.max(1),
        }
    }

    /// Resolves the newest image of the repository an image reference points to.
    pub async fn resolve_reference(
        &self,
        reference: &Reference,
        strategy: PullingStrategy,
    ) -> PescarResult<ResolvedImage> {
        let registry = RegistryCoordinates {
            url: reference.registry_url(),
            repository: reference.get_repository().clone(),
        };

        self.resolve_latest_image(&registry, strategy, None).await
    }

    /// Lists every tag of a repository, following `Link` pagination.
    pub async fn list_tags(
        &self,
        registry_url: &str,
        repository: &str,
        token: Option<&str>,
    ) -> PescarResult<Vec<String>> {
        let mut tags = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(format!("{}/v2/{}/tags/list", registry_url, repository));

        while let Some(url) = next.take() {
            if visited.len() == MAX_TAG_PAGES {
                tracing::warn!(repository, "stopped listing tags after {} pages", MAX_TAG_PAGES);
                break;
            }
            visited.insert(url.clone());

            let response = self.get(&url, token, "application/json").await?;
            next = response
                .headers()
                .get(reqwest::header::LINK)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_next_link)
                .map(|link| absolute_url(registry_url, &link))
                .filter(|link| !visited.contains(link));

            let page = response.json::<TagList>().await?;
            tags.extend(page.tags.unwrap_or_default());
        }

        Ok(tags)
    }

    /// Fetches the newest creation time recorded in a tag's schema 1 manifest.
    pub async fn fetch_created(
        &self,
        registry_url: &str,
        repository: &str,
        tag: &str,
        token: Option<&str>,
    ) -> PescarResult<Option<DateTime<Utc>>> {
        let url = format!("{}/v2/{}/manifests/{}", registry_url, repository, tag);
        let response = self.get(&url, token, MANIFEST_V1_MIME_TYPE).await?;

        // Schema 1 is served as `prettyjws`, so the body is decoded by hand.
        let body = response.bytes().await?;
        let manifest = serde_json::from_slice::<ManifestV1>(&body)?;

        Ok(manifest.latest_created())
    }

    /// Fetches the content digest a tag points to.
    pub async fn fetch_digest(
        &self,
        registry_url: &str,
        repository: &str,
        tag: &str,
        token: Option<&str>,
    ) -> PescarResult<String> {
        let url = format!("{}/v2/{}/manifests/{}", registry_url, repository, tag);
        let response = self.get(&url, token, MANIFEST_V2_MIME_TYPE).await?;

        response
            .headers()
            .get(DOCKER_CONTENT_DIGEST_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| PescarError::ManifestDigestMissing {
                repository: repository.to_string(),
                tag: tag.to_string(),
            })
    }

    async fn get(
        &self,
        url: &str,
        token: Option<&str>,
        accept: &str,
    ) -> PescarResult<reqwest::Response> {
        let mut request = self.client.get(url).header(ACCEPT, accept);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(RegistryHttpError::from_body(status, &body).into())
    }

    async fn resolve_latest_by_date(
        &self,
        registry_url: &str,
        repository: &str,
        tags: Vec<String>,
        token: Option<&str>,
    ) -> PescarResult<(String, DateTime<Utc>)> {
        let dated: Vec<(String, DateTime<Utc>)> = stream::iter(tags)
            .map(|tag| async move {
                let created = self.fetch_created(registry_url, repository, &tag, token).await;
                (tag, created)
            })
            .buffer_unordered(self.tag_concurrency)
            .filter_map(|(tag, created)| async move {
                match created {
                    Ok(Some(created)) => Some((tag, created)),
                    Ok(None) => {
                        tracing::warn!(repository, tag = %tag, "manifest has no creation time");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(repository, tag = %tag, error = %e, "failed to fetch manifest");
                        None
                    }
                }
            })
            .collect()
            .await;

        select_latest_by_date(dated)
            .ok_or_else(|| PescarError::NoResolvableTag(repository.to_string()))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ImageResolver for DockerRegistryClient {
    async fn resolve_latest_image(
        &self,
        registry: &RegistryCoordinates,
        strategy: PullingStrategy,
        credentials: Option<&RegistryCredentials>,
    ) -> PescarResult<ResolvedImage> {
        let registry_url = registry.url.trim_end_matches('/');
        let repository = registry.repository.as_str();

        let token = self
            .auth
            .get_token(registry_url, repository, credentials)
            .await?;
        let token = token.as_deref();

        let tags = self.list_tags(registry_url, repository, token).await?;
        if tags.is_empty() {
            return Err(PescarError::NoTags(repository.to_string()));
        }

        let (tag, created) = match strategy {
            PullingStrategy::Lexicographic => {
                let tag = select_lexicographic(&tags)
                    .ok_or_else(|| PescarError::NoTags(repository.to_string()))?;
                (tag.to_string(), None)
            }
            PullingStrategy::LatestByDate => {
                let (tag, created) = self
                    .resolve_latest_by_date(registry_url, repository, tags, token)
                    .await?;
                (tag, Some(created))
            }
        };

        let digest = self
            .fetch_digest(registry_url, repository, &tag, token)
            .await?;

        tracing::debug!(repository, tag = %tag, digest = %digest, %strategy, "resolved latest image");

        Ok(ResolvedImage {
            tag,
            digest,
            created,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Extracts the target of the `rel="next"` entry of a `Link` header.
fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|param| param.trim().replace(' ', "") == r#"rel="next""#);
        is_next.then(|| {
            target
                .trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string()
        })
    })
}

fn absolute_url(registry_url: &str, link: &str) -> String {
    if link.starts_with("http://") || link.starts_with("https://") {
        link.to_string()
    } else {
        format!("{}{}", registry_url, link)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use wiremock::{
        matchers::{header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    #[test]
    fn test_parse_next_link() {
        assert_eq!(
            parse_next_link(r#"</v2/library/nginx/tags/list?n=2&last=b>; rel="next""#).as_deref(),
            Some("/v2/library/nginx/tags/list?n=2&last=b")
        );
        assert_eq!(parse_next_link(r#"</v2/x>; rel="prev""#), None);
        assert_eq!(
            absolute_url("http://localhost:5000", "/v2/x"),
            "http://localhost:5000/v2/x"
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_lexicographic_resolves_only_the_winning_digest() -> anyhow::Result<()> {
        let server = helper::anonymous_registry(&["v1", "v10", "v2"]).await;
        helper::mount_digest(&server, "v2", "sha256:v2", 1).await;
        helper::mount_digest(&server, "v10", "sha256:v10", 0).await;

        let resolved = helper::client()
            .resolve_latest_image(
                &helper::coordinates(&server),
                PullingStrategy::Lexicographic,
                None,
            )
            .await?;

        assert_eq!(resolved.tag, "v2");
        assert_eq!(resolved.digest, "sha256:v2");
        assert_eq!(resolved.created, None);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_latest_by_date_picks_newest_created() -> anyhow::Result<()> {
        let server = helper::anonymous_registry(&["a", "b", "c"]).await;
        helper::mount_created(&server, "a", &["2024-01-01T00:00:00Z"]).await;
        helper::mount_created(&server, "b", &["2024-01-01T00:00:00Z", "2024-03-01T00:00:00Z"]).await;
        helper::mount_created(&server, "c", &["2024-02-01T00:00:00Z"]).await;
        helper::mount_digest(&server, "b", "sha256:bbb", 1).await;

        let resolved = helper::client()
            .resolve_latest_image(
                &helper::coordinates(&server),
                PullingStrategy::LatestByDate,
                None,
            )
            .await?;

        assert_eq!(resolved.tag, "b");
        assert_eq!(resolved.digest, "sha256:bbb");
        assert_eq!(
            resolved.created.map(|c| c.to_rfc3339()).as_deref(),
            Some("2024-03-01T00:00:00+00:00")
        );
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_latest_by_date_skips_failing_tags() -> anyhow::Result<()> {
        let server = helper::anonymous_registry(&["good", "broken"]).await;
        helper::mount_created(&server, "good", &["2024-01-01T00:00:00Z"]).await;
        Mock::given(method("GET"))
            .and(path("/v2/team/app/manifests/broken"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "errors": [{ "code": "MANIFEST_UNKNOWN", "message": "manifest unknown" }]
            })))
            .mount(&server)
            .await;
        helper::mount_digest(&server, "good", "sha256:good", 1).await;

        let resolved = helper::client()
            .resolve_latest_image(
                &helper::coordinates(&server),
                PullingStrategy::LatestByDate,
                None,
            )
            .await?;

        assert_eq!(resolved.tag, "good");
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_latest_by_date_without_any_date_fails() {
        let server = helper::anonymous_registry(&["x"]).await;
        helper::mount_created(&server, "x", &[]).await;

        let result = helper::client()
            .resolve_latest_image(
                &helper::coordinates(&server),
                PullingStrategy::LatestByDate,
                None,
            )
            .await;

        assert!(matches!(result, Err(PescarError::NoResolvableTag(repo)) if repo == "team/app"));
    }

    #[test_log::test(tokio::test)]
    async fn test_missing_digest_header_is_an_error() {
        let server = helper::anonymous_registry(&["v1"]).await;
        Mock::given(method("GET"))
            .and(path("/v2/team/app/manifests/v1"))
            .and(header("accept", MANIFEST_V2_MIME_TYPE))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let result = helper::client()
            .resolve_latest_image(
                &helper::coordinates(&server),
                PullingStrategy::Lexicographic,
                None,
            )
            .await;

        assert!(matches!(result, Err(PescarError::ManifestDigestMissing { .. })));
    }

    #[test_log::test(tokio::test)]
    async fn test_tag_listing_follows_pagination() -> anyhow::Result<()> {
        let server = helper::anonymous_probe().await;
        Mock::given(method("GET"))
            .and(path("/v2/team/app/tags/list"))
            .and(query_param("last", "b"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "name": "team/app", "tags": ["c"] })),
            )
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/team/app/tags/list"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", r#"</v2/team/app/tags/list?n=2&last=b>; rel="next""#)
                    .set_body_json(serde_json::json!({ "name": "team/app", "tags": ["a", "b"] })),
            )
            .with_priority(2)
            .mount(&server)
            .await;

        let tags = helper::client()
            .list_tags(&server.uri(), "team/app", None)
            .await?;

        assert_eq!(tags, vec!["a", "b", "c"]);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_tag_listing_stops_on_repeated_page() -> anyhow::Result<()> {
        let server = helper::anonymous_probe().await;
        Mock::given(method("GET"))
            .and(path("/v2/team/app/tags/list"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", r#"</v2/team/app/tags/list>; rel="next""#)
                    .set_body_json(serde_json::json!({ "name": "team/app", "tags": ["a"] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let tags = helper::client()
            .list_tags(&server.uri(), "team/app", None)
            .await?;

        assert_eq!(tags, vec!["a"]);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_error_status_is_decoded() {
        let server = helper::anonymous_probe().await;
        Mock::given(method("GET"))
            .and(path("/v2/team/app/tags/list"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "errors": [{ "code": "NAME_UNKNOWN", "message": "repository name not known" }]
            })))
            .mount(&server)
            .await;

        let result = helper::client()
            .resolve_latest_image(
                &helper::coordinates(&server),
                PullingStrategy::Lexicographic,
                None,
            )
            .await;

        match result {
            Err(PescarError::RegistryHttp(error)) => {
                assert_eq!(error.status, 404);
                assert_eq!(error.code.as_deref(), Some("NAME_UNKNOWN"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    mod helper {
        use super::*;

        pub(super) fn client() -> DockerRegistryClient {
            DockerRegistryClient::new(0, 4)
        }

        pub(super) fn coordinates(server: &MockServer) -> RegistryCoordinates {
            RegistryCoordinates {
                url: server.uri(),
                repository: "team/app".to_string(),
            }
        }

        pub(super) async fn anonymous_probe() -> MockServer {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/v2/"))
                .respond_with(ResponseTemplate::new(200))
                .mount(&server)
                .await;
            server
        }

        pub(super) async fn anonymous_registry(tags: &[&str]) -> MockServer {
            let server = anonymous_probe().await;
            Mock::given(method("GET"))
                .and(path("/v2/team/app/tags/list"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(serde_json::json!({ "name": "team/app", "tags": tags })),
                )
                .mount(&server)
                .await;
            server
        }

        pub(super) async fn mount_created(server: &MockServer, tag: &str, created: &[&str]) {
            let history: Vec<_> = created
                .iter()
                .map(|c| serde_json::json!({ "v1Compatibility": format!(r#"{{"created":"{}"}}"#, c) }))
                .collect();
            Mock::given(method("GET"))
                .and(path(format!("/v2/team/app/manifests/{}", tag)))
                .and(header("accept", MANIFEST_V1_MIME_TYPE))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(serde_json::json!({ "schemaVersion": 1, "history": history })),
                )
                .mount(server)
                .await;
        }

        pub(super) async fn mount_digest(server: &MockServer, tag: &str, digest: &str, expected: u64) {
            Mock::given(method("GET"))
                .and(path(format!("/v2/team/app/manifests/{}", tag)))
                .and(header("accept", MANIFEST_V2_MIME_TYPE))
                .respond_with(
                    ResponseTemplate::new(200).insert_header(DOCKER_CONTENT_DIGEST_HEADER, digest),
                )
                .expect(expected)
                .mount(server)
                .await;
        }
    }
}
