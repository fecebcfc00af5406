//! Network write of a `SubmissionPayload` to the ingest endpoint.

use std::time::Duration;

use async_trait::async_trait;
use checkin_core::wire::IngestRequest;
use checkin_core::SubmissionPayload;
use reqwest::Client;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("Submission timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP request failed: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Endpoint returned {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl SubmissionError {
    /// Short label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SubmissionError::Timeout(_) => "timeout",
            SubmissionError::Network(_) => "network",
            SubmissionError::Status { .. } => "status",
            SubmissionError::Client(_) => "client",
        }
    }
}

#[async_trait]
pub trait LocationSink: Send + Sync {
    /// Deliver one payload. Returns the record id when the target reports one.
    async fn submit(&self, payload: &SubmissionPayload) -> Result<Option<String>, SubmissionError>;

    /// Where payloads go, for logging.
    fn target(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct HttpSubmitter {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpSubmitter {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SubmissionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SubmissionError::Client)?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        })
    }
}

#[async_trait]
impl LocationSink for HttpSubmitter {
    async fn submit(&self, payload: &SubmissionPayload) -> Result<Option<String>, SubmissionError> {
        let request = IngestRequest::from(payload);

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::USER_AGENT, &payload.client_context)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SubmissionError::Timeout(self.timeout)
                } else {
                    SubmissionError::Network(e)
                }
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(SubmissionError::Status {
                code: status.as_u16(),
                body,
            });
        }

        // Mirror-style targets answer 2xx without an id; that is still a success.
        let id = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v["id"].as_str().map(str::to_string));
        Ok(id)
    }

    fn target(&self) -> &str {
        &self.endpoint
    }
}
