//! Network transport for update checks and content downloads.
//!
//! The engine needs exactly two requests: a JSON update check and a
//! resumable file download. [`ContentClient`] abstracts both so tests can
//! substitute a scripted server; [`HttpClient`] is the production
//! implementation.

mod http;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use serde_json::Value;

pub use http::HttpClient;

use crate::error::{SyncError, SyncResult};
use crate::state::UpdateStatus;

/// Boxed future returned by [`ContentClient`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Placeholder for the subscription name in the update-check URL.
pub const SUBS_PLACEHOLDER: &str = "{subs}";

/// Placeholder for the current content version in the update-check URL.
pub const SINCE_PLACEHOLDER: &str = "{since}";

/// Client for the content origin.
///
/// Uses `Pin<Box<dyn Future>>` so the trait stays object safe.
pub trait ContentClient: Send + Sync {
    /// GET `url` and parse the body as JSON.
    fn get_json<'a>(&'a self, url: &'a str) -> BoxFuture<'a, SyncResult<Value>>;

    /// Download `url` into `dest`, starting at byte `offset`.
    ///
    /// With `offset > 0` the server is asked for the remaining range and the
    /// bytes are appended. A server that ignores the range restarts the file.
    /// Returns the final length of `dest`.
    fn get_file<'a>(
        &'a self,
        url: &'a str,
        offset: u64,
        dest: &'a Path,
    ) -> BoxFuture<'a, SyncResult<u64>>;
}

/// Parsed update-check response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCheckResponse {
    pub status: UpdateStatus,
    pub url: Option<String>,
}

impl UpdateCheckResponse {
    /// Interpret a JSON response body.
    ///
    /// A missing or unrecognised `status` is reported as
    /// [`UpdateStatus::Unknown`].
    pub fn from_json(value: &Value) -> Self {
        let status = value
            .get("status")
            .cloned()
            .and_then(|s| serde_json::from_value(s).ok())
            .unwrap_or(UpdateStatus::Unknown);
        let url = value
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        Self { status, url }
    }
}

/// Build the update-check URL for one subscription.
///
/// `since` is the current content version; an unpacked-never subscription
/// passes an empty string.
pub fn render_check_url(template: &str, subscription: &str, since: &str) -> SyncResult<String> {
    let url = template
        .replace(SUBS_PLACEHOLDER, subscription)
        .replace(SINCE_PLACEHOLDER, since);
    validate_url(&url)?;
    Ok(url)
}

/// Reject URLs that cannot be requested.
pub fn validate_url(url: &str) -> SyncResult<()> {
    let parsed = reqwest::Url::parse(url).map_err(|e| SyncError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(SyncError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_check_url() {
        let url = render_check_url(
            "https://example.com/check?subs={subs}&since={since}",
            "news",
            "41",
        )
        .unwrap();
        assert_eq!(url, "https://example.com/check?subs=news&since=41");
    }

    #[test]
    fn test_render_check_url_empty_since() {
        let url = render_check_url("http://host/{subs}?since={since}", "news", "").unwrap();
        assert_eq!(url, "http://host/news?since=");
    }

    #[test]
    fn test_invalid_urls() {
        assert!(matches!(
            render_check_url("not a url {subs}", "news", ""),
            Err(SyncError::InvalidUrl { .. })
        ));
        assert!(matches!(
            validate_url("ftp://example.com/content.zip"),
            Err(SyncError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_response_parsing() {
        let response = UpdateCheckResponse::from_json(&json!({
            "status": "update-since",
            "url": "https://cdn.example.com/news-42.zip"
        }));
        assert_eq!(response.status, UpdateStatus::UpdateSince);
        assert_eq!(
            response.url.as_deref(),
            Some("https://cdn.example.com/news-42.zip")
        );

        let response = UpdateCheckResponse::from_json(&json!({ "status": "no-update" }));
        assert_eq!(response.status, UpdateStatus::NoUpdate);
        assert_eq!(response.url, None);
    }

    #[test]
    fn test_response_unknown_status() {
        let response = UpdateCheckResponse::from_json(&json!({ "status": "rebooting" }));
        assert_eq!(response.status, UpdateStatus::Unknown);

        let response = UpdateCheckResponse::from_json(&json!([1, 2, 3]));
        assert_eq!(response.status, UpdateStatus::Unknown);

        let response = UpdateCheckResponse::from_json(&json!({ "status": 7 }));
        assert_eq!(response.status, UpdateStatus::Unknown);
    }
}
