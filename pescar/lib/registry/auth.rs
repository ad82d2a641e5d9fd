//! Bearer token acquisition and caching for registry requests.
//!
//! Registries implementing the Docker token scheme answer an unauthenticated `GET /v2/` with a
//! `401` and a `WWW-Authenticate: Bearer realm="...",service="..."` challenge. The token realm is
//! then asked for a pull-scoped token for one repository. Tokens are cached per registry,
//! repository and user until shortly before they expire.

use std::{collections::HashMap, sync::Arc, sync::LazyLock, time::Duration};

use async_trait::async_trait;
use regex::Regex;
use reqwest::{header::WWW_AUTHENTICATE, StatusCode};
use reqwest_middleware::ClientWithMiddleware;
use tokio::{sync::Mutex, time::Instant};

use crate::{models::RegistryCredentials, PescarError, PescarResult};

use super::{types::TokenResponse, AuthProvider};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// A cached token is refreshed once it is this close to expiring.
pub const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Lifetime assumed for a token whose response carried no `expires_in`.
pub const DEFAULT_TOKEN_EXPIRES_IN: u64 = 60;

/// How long an anonymous registry is remembered as not needing a token.
pub const ANONYMOUS_TOKEN_TTL: Duration = Duration::from_secs(300);

static CHALLENGE_PARAM_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([A-Za-z_]+)="([^"]*)""#).unwrap());

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A token cache keyed by registry, repository and user.
///
/// The outer map is locked only long enough to find the slot of a key. Each slot has its own
/// async mutex which is held across the refresh, so concurrent callers for the same key share
/// one token request while other keys proceed independently.
#[derive(Debug, Clone)]
pub struct TokenCache {
    client: ClientWithMiddleware,
    slots: Arc<Mutex<HashMap<String, Arc<Mutex<Option<CachedToken>>>>>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: Option<String>,
    expires_at: Instant,
}

/// The parameters of a `Bearer` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TokenCache {
    /// Creates an empty cache that fetches tokens with `client`.
    pub fn new(client: ClientWithMiddleware) -> Self {
        Self {
            client,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn slot(&self, key: &str) -> Arc<Mutex<Option<CachedToken>>> {
        let mut slots = self.slots.lock().await;
        slots.entry(key.to_string()).or_default().clone()
    }

    async fn fetch(
        &self,
        registry_url: &str,
        repository: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> PescarResult<CachedToken> {
        let auth_error = |reason: String| PescarError::Authentication {
            registry: registry_url.to_string(),
            repository: repository.to_string(),
            reason,
        };

        let probe = self
            .client
            .get(format!("{}/v2/", registry_url))
            .send()
            .await?;

        if probe.status().is_success() {
            tracing::debug!(registry = registry_url, "registry allows anonymous access");
            return Ok(CachedToken {
                token: None,
                expires_at: Instant::now() + ANONYMOUS_TOKEN_TTL,
            });
        }

        if probe.status() != StatusCode::UNAUTHORIZED {
            return Err(auth_error(format!(
                "unexpected status {} from /v2/",
                probe.status()
            )));
        }

        let header = probe
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| auth_error("missing WWW-Authenticate challenge".to_string()))?;

        let challenge = parse_bearer_challenge(header)
            .ok_or_else(|| auth_error(format!("unsupported challenge: {}", header)))?;

        let scope = format!("repository:{}:pull", repository);
        let mut query = vec![("scope", scope.as_str())];
        if let Some(service) = &challenge.service {
            query.push(("service", service.as_str()));
        }

        let mut request = self.client.get(&challenge.realm).query(&query);
        if let Some(credentials) = credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(auth_error(format!(
                "token endpoint answered {}",
                response.status()
            )));
        }

        let body = response.json::<TokenResponse>().await?;
        let expires_in = body.expires_in.unwrap_or(DEFAULT_TOKEN_EXPIRES_IN);
        let token = body
            .into_token()
            .ok_or_else(|| auth_error("token endpoint returned no token".to_string()))?;

        tracing::debug!(
            registry = registry_url,
            repository,
            expires_in,
            "obtained registry token"
        );

        Ok(CachedToken {
            token: Some(token),
            expires_at: Instant::now() + Duration::from_secs(expires_in),
        })
    }
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_EXPIRY_MARGIN < self.expires_at
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl AuthProvider for TokenCache {
    async fn get_token(
        &self,
        registry_url: &str,
        repository: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> PescarResult<Option<String>> {
        let slot = self
            .slot(&slot_key(registry_url, repository, credentials))
            .await;
        let mut cached = slot.lock().await;

        if let Some(entry) = cached.as_ref().filter(|entry| entry.is_fresh()) {
            return Ok(entry.token.clone());
        }

        let entry = self.fetch(registry_url, repository, credentials).await?;
        let token = entry.token.clone();
        *cached = Some(entry);

        Ok(token)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Anonymous and authenticated callers of the same repository get separate tokens.
fn slot_key(
    registry_url: &str,
    repository: &str,
    credentials: Option<&RegistryCredentials>,
) -> String {
    match credentials {
        Some(credentials) => format!("{}/{}#{}", registry_url, repository, credentials.username),
        None => format!("{}/{}", registry_url, repository),
    }
}

fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let (scheme, params) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut realm = None;
    let mut service = None;
    for capture in CHALLENGE_PARAM_REGEX.captures_iter(params) {
        match capture[1].to_ascii_lowercase().as_str() {
            "realm" => realm = Some(capture[2].to_string()),
            "service" => service = Some(capture[2].to_string()),
            _ => {}
        }
    }

    Some(BearerChallenge {
        realm: realm?,
        service,
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
