//! HTTP exchange capability the pipeline is written against.
//!
//! The pipeline never touches `reqwest` directly; it talks to an
//! [`HttpGateway`], which the retry-aware [`crate::client::RetryClient`]
//! implements for production and tests replace with canned responses.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::{CrawlError, Result};

/// A response returned without any success-status assertion.
///
/// POST endpoints on the admissions API answer 2xx with error payloads,
/// so the caller inspects status and body itself.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl RawResponse {
    /// Deserializes the body, mapping shape mismatches to
    /// [`CrawlError::MalformedPayload`].
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| CrawlError::MalformedPayload(e.to_string()))
    }
}

/// Capability for the three request kinds the crawl issues.
#[async_trait]
pub trait HttpGateway: Send + Sync {
    /// GET returning the response body as text; classified failures on
    /// gating statuses, error on any other non-success status.
    async fn fetch_text(&self, url: &str, cancel: &CancellationToken) -> Result<String>;

    /// GET with a JSON accept header, returning the parsed body.
    /// A body that is not valid JSON is a [`CrawlError::MalformedPayload`].
    async fn fetch_json(&self, url: &str, cancel: &CancellationToken)
        -> Result<serde_json::Value>;

    /// POST with form fields; returns the raw response without asserting
    /// a success status.
    async fn post_form(
        &self,
        url: &str,
        fields: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<RawResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct FollowUp {
        url: Option<String>,
    }

    #[test]
    fn test_raw_response_json_ok() {
        let response = RawResponse {
            status: 200,
            body: r#"{"url":"https://example.com/rows"}"#.to_string(),
        };
        let parsed: FollowUp = response.json().unwrap();
        assert_eq!(parsed.url.as_deref(), Some("https://example.com/rows"));
    }

    #[test]
    fn test_raw_response_json_malformed() {
        let response = RawResponse {
            status: 200,
            body: "<html>not json</html>".to_string(),
        };
        let err = response.json::<FollowUp>().unwrap_err();
        assert!(matches!(err, CrawlError::MalformedPayload(_)));
    }
}
