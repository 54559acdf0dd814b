//! # Remote Question Client
//!
//! Calls the external question-generation service over HTTP with bounded
//! retries and a per-attempt timeout. A successful response with zero
//! candidates counts as "no result", not an error.
//!
//! ## Retry Policy:
//! - up to `max(1, max_retries)` attempts per call;
//! - each attempt is bounded by the configured timeout;
//! - non-success statuses retry after a `200ms × attempt` delay; transport,
//!   parse and timeout failures retry without an extra delay;
//! - the final attempt's failure is returned to the caller;
//! - caller cancellation (dropping the future) propagates immediately and
//!   never consumes a retry.

use crate::config::LlmConfig;
use crate::context::ContextSnapshot;
use crate::contracts::{GenerateQuestionsOptions, QuestionItem};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Errors from a remote question-generation call.
#[derive(Debug, Error)]
pub enum QuestionClientError {
    /// HTTP transport or connection error
    #[error("question request failed: {0}")]
    Request(String),

    /// An attempt did not complete within the configured timeout
    #[error("question request timed out")]
    Timeout,

    /// The service answered with a non-success status
    #[error("question request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be parsed
    #[error("failed to parse question response: {0}")]
    Parse(String),
}

impl QuestionClientError {
    /// Short reason label for telemetry.
    pub fn reason(&self) -> &'static str {
        match self {
            QuestionClientError::Request(_) => "request",
            QuestionClientError::Timeout => "timeout",
            QuestionClientError::Status { .. } => "status",
            QuestionClientError::Parse(_) => "parse",
        }
    }
}

/// Abstract question-generation collaborator.
#[async_trait]
pub trait QuestionClient: Send + Sync {
    async fn generate(
        &self,
        snapshot: &ContextSnapshot,
        options: &GenerateQuestionsOptions,
    ) -> Result<Vec<QuestionItem>, QuestionClientError>;
}

/// Stand-in used when no remote endpoint is configured. Always reports
/// "no result" so the pipeline falls through to the local generator.
pub struct NullQuestionClient;

#[async_trait]
impl QuestionClient for NullQuestionClient {
    async fn generate(
        &self,
        _snapshot: &ContextSnapshot,
        _options: &GenerateQuestionsOptions,
    ) -> Result<Vec<QuestionItem>, QuestionClientError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuestionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    topic: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    rolling_summary: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    last_window: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    known_facts: Option<HashMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    asked_recently: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    preferred_style: Option<String>,

    max_candidates: usize,
}

#[derive(Debug, Deserialize)]
struct QuestionResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    text: Option<String>,
    tags: Option<Vec<String>>,
    confidence: Option<f64>,
    novelty: Option<f64>,
}

/// HTTP client for the remote generation endpoint.
pub struct HttpQuestionClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl HttpQuestionClient {
    pub fn new(config: &LlmConfig) -> Self {
        // Per-attempt deadlines are enforced explicitly, so the underlying
        // client carries no timeout of its own.
        let http = reqwest::Client::builder()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            config: config.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/llm/questions", self.config.base_url.trim_end_matches('/'))
    }

    fn build_request(
        &self,
        snapshot: &ContextSnapshot,
        options: &GenerateQuestionsOptions,
    ) -> QuestionRequest {
        let none_if_blank = |value: &str| {
            if value.trim().is_empty() {
                None
            } else {
                Some(value.to_string())
            }
        };

        QuestionRequest {
            topic: options.topic.clone().filter(|t| !t.trim().is_empty()),
            rolling_summary: none_if_blank(&snapshot.rolling_summary),
            last_window: none_if_blank(&snapshot.last_window),
            known_facts: if snapshot.known_facts.is_empty() {
                None
            } else {
                Some(snapshot.known_facts.iter().cloned().collect())
            },
            asked_recently: if snapshot.asked_recently.is_empty() {
                None
            } else {
                Some(snapshot.asked_recently.clone())
            },
            preferred_style: options
                .preferred_style
                .clone()
                .filter(|s| !s.trim().is_empty()),
            max_candidates: self.config.max_candidates,
        }
    }

    /// One request/parse round against the service.
    async fn attempt(
        &self,
        payload: &QuestionRequest,
    ) -> Result<QuestionResponse, QuestionClientError> {
        let mut request = self.http.post(self.endpoint()).json(payload);
        if !self.config.api_key.trim().is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| QuestionClientError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QuestionClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<QuestionResponse>()
            .await
            .map_err(|e| QuestionClientError::Parse(e.to_string()))
    }
}

#[async_trait]
impl QuestionClient for HttpQuestionClient {
    async fn generate(
        &self,
        snapshot: &ContextSnapshot,
        options: &GenerateQuestionsOptions,
    ) -> Result<Vec<QuestionItem>, QuestionClientError> {
        let payload = self.build_request(snapshot, options);
        let retries = self.config.max_retries.max(1);

        for attempt in 1..=retries {
            let outcome = tokio::time::timeout(self.config.timeout(), self.attempt(&payload)).await;

            let error = match outcome {
                Ok(Ok(parsed)) => {
                    let Some(candidates) = parsed.candidates else {
                        warn!("Question service response did not contain candidates");
                        return Ok(Vec::new());
                    };

                    return Ok(candidates
                        .into_iter()
                        .map(|candidate| QuestionItem {
                            text: candidate.text.unwrap_or_default(),
                            tags: candidate.tags,
                            confidence: candidate.confidence,
                            novelty: candidate.novelty,
                        })
                        .collect());
                }
                Ok(Err(error)) => error,
                Err(_) => QuestionClientError::Timeout,
            };

            warn!(
                "Question request attempt {}/{} failed: {}",
                attempt, retries, error
            );
            if attempt == retries {
                return Err(error);
            }

            // Linear backoff only after a rejected response; transport and
            // timeout failures loop straight into the next attempt.
            if matches!(error, QuestionClientError::Status { .. }) {
                tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
            }
        }

        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn client_config(base_url: &str, max_retries: u32) -> LlmConfig {
        LlmConfig {
            base_url: base_url.to_string(),
            api_key: String::new(),
            max_candidates: 5,
            max_retries,
            timeout_ms: 2_000,
        }
    }

    /// Minimal HTTP responder that answers every request with a fixed
    /// response and counts the requests it served.
    async fn serve_fixed(listener: TcpListener, response: &'static str, hits: Arc<AtomicUsize>) {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            hits.fetch_add(1, Ordering::SeqCst);

            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    }

    async fn spawn_server(response: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        tokio::spawn(serve_fixed(listener, response, Arc::clone(&hits)));
        (format!("http://{}", addr), hits)
    }

    #[tokio::test]
    async fn test_retries_exactly_max_retries_on_persistent_failure() {
        let (base_url, hits) = spawn_server(
            "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;

        let client = HttpQuestionClient::new(&client_config(&base_url, 2));
        let result = client
            .generate(&ContextSnapshot::default(), &GenerateQuestionsOptions::default())
            .await;

        assert!(matches!(
            result,
            Err(QuestionClientError::Status { status: 500, .. })
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_candidates_is_no_result_not_error() {
        let body = r#"{"candidates":[]}"#;
        let (base_url, hits) = spawn_server(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 17\r\nconnection: close\r\n\r\n{\"candidates\":[]}",
        )
        .await;
        assert_eq!(body.len(), 17);

        let client = HttpQuestionClient::new(&client_config(&base_url, 3));
        let result = client
            .generate(&ContextSnapshot::default(), &GenerateQuestionsOptions::default())
            .await
            .unwrap();

        assert!(result.is_empty());
        // A successful empty response consumes a single attempt.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_after_retries() {
        // Nothing listens on this port.
        let client = HttpQuestionClient::new(&client_config("http://127.0.0.1:1", 2));
        let result = client
            .generate(&ContextSnapshot::default(), &GenerateQuestionsOptions::default())
            .await;
        assert!(matches!(result, Err(QuestionClientError::Request(_))));
    }

    #[tokio::test]
    async fn test_candidates_are_mapped_into_items() {
        let response = "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\nconnection: close\r\n\r\n{\"candidates\":[{\"text\":\"What is blocking the rollout?\",\"tags\":[\"risk\"],\"confidence\":0.9}]}";
        let (base_url, _) = spawn_server(response).await;

        let client = HttpQuestionClient::new(&client_config(&base_url, 1));
        let result = client
            .generate(&ContextSnapshot::default(), &GenerateQuestionsOptions::default())
            .await
            .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].text, "What is blocking the rollout?");
        assert_eq!(result[0].tags.as_deref(), Some(&["risk".to_string()][..]));
        assert_eq!(result[0].confidence, Some(0.9));
        assert_eq!(result[0].novelty, None);
    }

    #[tokio::test]
    async fn test_null_client_reports_no_result() {
        let result = NullQuestionClient
            .generate(&ContextSnapshot::default(), &GenerateQuestionsOptions::default())
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_request_body_omits_empty_fields() {
        let client = HttpQuestionClient::new(&client_config("http://localhost", 1));
        let request = client.build_request(
            &ContextSnapshot::default(),
            &GenerateQuestionsOptions::default(),
        );
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"maxCandidates":5}"#);
    }

    #[test]
    fn test_request_body_uses_camel_case() {
        let client = HttpQuestionClient::new(&client_config("http://localhost", 1));
        let snapshot = ContextSnapshot {
            rolling_summary: "summary".to_string(),
            last_window: "window".to_string(),
            known_facts: vec![("k".to_string(), "v".to_string())],
            asked_recently: vec!["asked".to_string()],
        };
        let request = client.build_request(&snapshot, &GenerateQuestionsOptions::default());
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"rollingSummary\""));
        assert!(json.contains("\"lastWindow\""));
        assert!(json.contains("\"knownFacts\""));
        assert!(json.contains("\"askedRecently\""));
    }
}
