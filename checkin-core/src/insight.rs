//! Location insight sidecar: a short summary and fun fact about a point
//!
//! Provides an `InsightBackend` trait with implementations for:
//! - **Gemini**: one `generateContent` call per request, bounded by a timeout
//! - **Fallback**: wraps Gemini and degrades to a canned insight on any failure
//!
//! The capture flow never depends on this: a failed insight is replaced, not
//! reported.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::InsightSettings;

// ============================================================================
// InsightBackend trait
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationInsight {
    pub summary: String,
    pub fun_fact: String,
}

impl LocationInsight {
    pub fn canned() -> Self {
        Self {
            summary: "Your location was captured successfully.".to_string(),
            fun_fact: "GPS satellites orbit about 20,200 km above the Earth and each one \
                       circles the planet twice a day."
                .to_string(),
        }
    }
}

#[async_trait]
pub trait InsightBackend: Send + Sync {
    async fn insight(&self, latitude: f64, longitude: f64)
        -> Result<LocationInsight, InsightError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum InsightError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing text in response")]
    MissingText,

    #[error("Malformed insight: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Missing API key")]
    MissingApiKey,
}

#[derive(Debug, Clone)]
pub struct InsightConfig {
    pub api_key: String,
    pub model: String,
    pub timeout_ms: u64,
}

impl InsightConfig {
    pub fn new(api_key: Option<String>, settings: &InsightSettings) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            model: settings.model.clone(),
            timeout_ms: settings.timeout_ms,
        }
    }
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    code: u16,
    message: String,
}

fn prompt(latitude: f64, longitude: f64) -> String {
    format!(
        "A visitor just checked in at latitude {latitude}, longitude {longitude}. \
         Reply with JSON of the form {{\"summary\": string, \"funFact\": string}}: \
         a one-sentence description of the area and one short fun fact about it."
    )
}

// ============================================================================
// GeminiInsightClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeminiInsightClient {
    client: Client,
    config: InsightConfig,
    base_url: String,
}

impl GeminiInsightClient {
    pub fn new(config: InsightConfig) -> Result<Self, InsightError> {
        Self::with_base_url(
            config,
            "https://generativelanguage.googleapis.com/v1beta".to_string(),
        )
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(config: InsightConfig, base_url: String) -> Result<Self, InsightError> {
        if config.api_key.is_empty() {
            return Err(InsightError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }
}

#[async_trait]
impl InsightBackend for GeminiInsightClient {
    async fn insight(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<LocationInsight, InsightError> {
        // The key travels in a header so it never appears in a URL or in
        // reqwest error text.
        let url = format!("{}/models/{}:generateContent", self.base_url, self.config.model);

        let request = GenerateRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt(latitude, longitude),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
            },
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let (code, message) = serde_json::from_str::<GeminiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::error!(code = code, message = %message, "Gemini API error");
            return Err(InsightError::Api { code, message });
        }

        let body: GenerateResponse = response.json().await?;
        let text = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or(InsightError::MissingText)?;

        Ok(serde_json::from_str(&text)?)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ============================================================================
// FallbackInsightClient
// ============================================================================

/// Wraps `GeminiInsightClient`. On any error, or when no client could be
/// built, logs a warning and returns `LocationInsight::canned()`.
pub struct FallbackInsightClient {
    inner: Option<GeminiInsightClient>,
}

impl FallbackInsightClient {
    pub fn new(config: InsightConfig) -> Self {
        let inner = match GeminiInsightClient::new(config) {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::warn!(error = %e, "Insight client unavailable; serving canned insight");
                None
            }
        };
        Self { inner }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn wrap(inner: GeminiInsightClient) -> Self {
        Self { inner: Some(inner) }
    }

    pub fn from_settings(settings: &InsightSettings) -> Self {
        if !settings.enabled {
            return Self::disabled();
        }
        Self::new(InsightConfig::new(None, settings))
    }
}

#[async_trait]
impl InsightBackend for FallbackInsightClient {
    async fn insight(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<LocationInsight, InsightError> {
        let Some(inner) = &self.inner else {
            return Ok(LocationInsight::canned());
        };

        match inner.insight(latitude, longitude).await {
            Ok(insight) => Ok(insight),
            Err(e) => {
                tracing::warn!(error = %e, "Insight generation failed, serving canned insight");
                Ok(LocationInsight::canned())
            }
        }
    }

    fn name(&self) -> &str {
        "gemini-fallback-canned"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_key: &str) -> InsightConfig {
        InsightConfig {
            api_key: api_key.to_string(),
            model: "gemini-2.0-flash".to_string(),
            timeout_ms: 2000,
        }
    }

    fn generate_response(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": text }] }
            }]
        })
    }

    #[tokio::test]
    async fn test_gemini_insight_parses_json_reply() {
        let mock_server = MockServer::start().await;
        let client =
            GeminiInsightClient::with_base_url(test_config("test-key"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(path_regex(r"^/models/gemini-2\.0-flash:generateContent$"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(generate_response(
                r#"{"summary": "Coimbatore, Tamil Nadu.", "funFact": "Known as the Manchester of South India."}"#,
            )))
            .expect(1)
            .mount(&mock_server)
            .await;

        let insight = client.insight(11.0168, 76.9558).await.unwrap();
        assert_eq!(insight.summary, "Coimbatore, Tamil Nadu.");
        assert_eq!(insight.fun_fact, "Known as the Manchester of South India.");
    }

    #[tokio::test]
    async fn test_gemini_api_error_is_reported() {
        let mock_server = MockServer::start().await;
        let client =
            GeminiInsightClient::with_base_url(test_config("test-key"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "code": 429, "message": "quota exhausted" }
            })))
            .mount(&mock_server)
            .await;

        match client.insight(0.0, 0.0).await {
            Err(InsightError::Api { code, message }) => {
                assert_eq!(code, 429);
                assert_eq!(message, "quota exhausted");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        match GeminiInsightClient::new(test_config("")) {
            Err(InsightError::MissingApiKey) => {}
            _ => panic!("Expected MissingApiKey error"),
        }
    }

    #[tokio::test]
    async fn test_fallback_serves_canned_on_malformed_reply() {
        let mock_server = MockServer::start().await;
        let inner =
            GeminiInsightClient::with_base_url(test_config("test-key"), mock_server.uri()).unwrap();
        let fallback = FallbackInsightClient::wrap(inner);

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(generate_response("not json")))
            .mount(&mock_server)
            .await;

        let insight = fallback.insight(1.0, 2.0).await.unwrap();
        assert_eq!(insight, LocationInsight::canned());
    }

    #[tokio::test]
    async fn test_fallback_serves_canned_on_server_error() {
        let mock_server = MockServer::start().await;
        let inner =
            GeminiInsightClient::with_base_url(test_config("test-key"), mock_server.uri()).unwrap();
        let fallback = FallbackInsightClient::wrap(inner);

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let insight = fallback.insight(1.0, 2.0).await.unwrap();
        assert_eq!(insight, LocationInsight::canned());
    }

    #[tokio::test]
    async fn test_disabled_fallback_never_calls_out() {
        let fallback = FallbackInsightClient::disabled();
        let insight = fallback.insight(1.0, 2.0).await.unwrap();
        assert_eq!(insight, LocationInsight::canned());
        assert_eq!(fallback.name(), "gemini-fallback-canned");
    }

    #[tokio::test]
    async fn test_transport_error_does_not_expose_api_key() {
        let client = GeminiInsightClient::with_base_url(
            test_config("SECRET-KEY-123"),
            "http://127.0.0.1:1".to_string(),
        )
        .unwrap();

        let err = client.insight(1.0, 2.0).await.unwrap_err();
        let text = format!("{} {:?}", err, err);
        assert!(matches!(err, InsightError::Http(_)));
        assert!(!text.contains("SECRET-KEY-123"), "key leaked: {}", text);
    }

    #[tokio::test]
    async fn test_api_key_not_sent_in_query_string() {
        let mock_server = MockServer::start().await;
        let client =
            GeminiInsightClient::with_base_url(test_config("test-key"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(generate_response(
                r#"{"summary": "s", "funFact": "f"}"#,
            )))
            .mount(&mock_server)
            .await;

        client.insight(1.0, 2.0).await.unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].url.query().is_none());
        assert_eq!(
            requests[0].headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()),
            Some("test-key")
        );
    }
}
