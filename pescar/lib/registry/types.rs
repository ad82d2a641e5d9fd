use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The newest image of a repository as chosen by a pulling strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedImage {
    /// The tag that was selected.
    pub tag: String,

    /// The content digest the tag points to.
    pub digest: String,

    /// When the image was created, if the strategy looked it up.
    pub created: Option<DateTime<Utc>>,
}

/// A non-2xx answer from a registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct RegistryHttpError {
    /// The HTTP status code.
    pub status: u16,

    /// The registry error code, e.g. `MANIFEST_UNKNOWN`.
    pub code: Option<String>,

    /// The registry error message, or the raw body if it was not a registry error document.
    pub message: String,

    /// The `detail` member of the first registry error.
    pub details: Option<serde_json::Value>,
}

//--------------------------------------------------------------------------------------------------
// Types: Wire
//--------------------------------------------------------------------------------------------------

/// Body of `GET /v2/<name>/tags/list`.
#[derive(Debug, Deserialize)]
pub(crate) struct TagList {
    #[serde(default)]
    pub(crate) tags: Option<Vec<String>>,
}

/// A schema 1 manifest. Only the history is of interest.
#[derive(Debug, Deserialize)]
pub(crate) struct ManifestV1 {
    #[serde(default, alias = "History")]
    pub(crate) history: Vec<History>,
}

/// One entry of a schema 1 manifest history.
#[derive(Debug, Deserialize)]
pub(crate) struct History {
    /// A JSON document embedded as a string.
    #[serde(rename = "v1Compatibility")]
    pub(crate) v1_compatibility: String,
}

/// The part of a `v1Compatibility` document that carries the layer creation time.
#[derive(Debug, Deserialize)]
pub(crate) struct V1Compatibility {
    #[serde(default)]
    pub(crate) created: Option<DateTime<Utc>>,
}

/// Body returned by a token realm.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub(crate) token: Option<String>,

    #[serde(default)]
    pub(crate) access_token: Option<String>,

    #[serde(default)]
    pub(crate) expires_in: Option<u64>,
}

/// The `{"errors": [...]}` document registries answer failures with.
#[derive(Debug, Deserialize)]
struct ErrorDocument {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    #[serde(default)]
    code: Option<String>,

    #[serde(default)]
    message: Option<String>,

    #[serde(default)]
    detail: Option<serde_json::Value>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ManifestV1 {
    /// The newest `created` time across the history. Entries that fail to parse are skipped.
    pub(crate) fn latest_created(&self) -> Option<DateTime<Utc>> {
        self.history
            .iter()
            .filter_map(|h| serde_json::from_str::<V1Compatibility>(&h.v1_compatibility).ok())
            .filter_map(|c| c.created)
            .max()
    }
}

impl TokenResponse {
    /// Registries disagree on the field name; `token` wins when both are present.
    pub(crate) fn into_token(self) -> Option<String> {
        self.token.or(self.access_token)
    }
}

impl RegistryHttpError {
    /// Builds the error from a status and the raw response body.
    pub fn from_body(status: u16, body: &str) -> Self {
        let first = serde_json::from_str::<ErrorDocument>(body)
            .ok()
            .and_then(|document| document.errors.into_iter().next());

        match first {
            Some(entry) => Self {
                status,
                code: entry.code,
                message: entry.message.unwrap_or_default(),
                details: entry.detail,
            },
            None => Self {
                status,
                code: None,
                message: body.trim().to_string(),
                details: None,
            },
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for RegistryHttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} {} - {}", self.status, code, self.message),
            None => write!(f, "{} - {}", self.status, self.message),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_v1_latest_created() {
        let body = serde_json::json!({
            "name": "library/nginx",
            "history": [
                { "v1Compatibility": "{\"created\":\"2024-03-01T10:00:00Z\"}" },
                { "v1Compatibility": "{\"created\":\"2024-05-01T10:00:00.123456789Z\"}" },
                { "v1Compatibility": "not json" },
                { "v1Compatibility": "{\"id\":\"x\"}" }
            ]
        });

        let manifest: ManifestV1 = serde_json::from_value(body).unwrap();
        let created = manifest.latest_created().unwrap();
        assert_eq!(created.to_rfc3339(), "2024-05-01T10:00:00.123456789+00:00");
    }

    #[test]
    fn test_manifest_v1_without_history() {
        let manifest: ManifestV1 = serde_json::from_str("{}").unwrap();
        assert!(manifest.latest_created().is_none());
    }

    #[test]
    fn test_registry_http_error_from_error_document() {
        let body = r#"{"errors":[{"code":"MANIFEST_UNKNOWN","message":"manifest unknown","detail":{"Tag":"v9"}}]}"#;
        let error = RegistryHttpError::from_body(404, body);

        assert_eq!(error.status, 404);
        assert_eq!(error.code.as_deref(), Some("MANIFEST_UNKNOWN"));
        assert_eq!(error.message, "manifest unknown");
        assert_eq!(error.details, Some(serde_json::json!({"Tag": "v9"})));
        assert_eq!(error.to_string(), "404 MANIFEST_UNKNOWN - manifest unknown");
    }

    #[test]
    fn test_registry_http_error_from_plain_body() {
        let error = RegistryHttpError::from_body(502, "bad gateway\n");
        assert_eq!(error.code, None);
        assert_eq!(error.message, "bad gateway");
        assert_eq!(error.to_string(), "502 - bad gateway");
    }

    #[test]
    fn test_token_response_field_names() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","expires_in":300}"#).unwrap();
        assert_eq!(response.expires_in, Some(300));
        assert_eq!(response.into_token().as_deref(), Some("abc"));
    }
}
