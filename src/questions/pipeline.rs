//! # Question Pipeline
//!
//! Composes the redactor, the remote question client and the local fallback
//! generator. Only the sanitized snapshot/options pair is sent externally;
//! the fallback always works on the original, unredacted data. Remote
//! failures are recorded and absorbed, never propagated to the caller.

use crate::context::ContextSnapshot;
use crate::contracts::{GenerateQuestionsOptions, QuestionItem};
use crate::questions::{FallbackGenerator, PiiRedactor, QuestionClient};
use crate::telemetry::TelemetryRecorder;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

pub struct QuestionPipeline {
    client: Arc<dyn QuestionClient>,
    fallback: FallbackGenerator,
    redactor: PiiRedactor,
    telemetry: Arc<dyn TelemetryRecorder>,
}

impl QuestionPipeline {
    pub fn new(
        client: Arc<dyn QuestionClient>,
        fallback: FallbackGenerator,
        redactor: PiiRedactor,
        telemetry: Arc<dyn TelemetryRecorder>,
    ) -> Self {
        Self {
            client,
            fallback,
            redactor,
            telemetry,
        }
    }

    /// Produce question items for one connection. The result may be empty but
    /// is never an error.
    pub async fn generate(
        &self,
        connection_id: &str,
        snapshot: &ContextSnapshot,
        options: &GenerateQuestionsOptions,
    ) -> Vec<QuestionItem> {
        let (sanitized_snapshot, sanitized_options) = self.redactor.redact(snapshot, options);
        let started = Instant::now();

        match self.client.generate(&sanitized_snapshot, &sanitized_options).await {
            Ok(items) if !items.is_empty() => {
                self.telemetry.record_llm_latency(started.elapsed(), false);
                debug!(
                    "Remote generator returned {} candidates for {}",
                    items.len(),
                    connection_id
                );
                return items;
            }
            Ok(_) => {
                info!(
                    "Remote generator returned no candidates for {}. Using fallback templates",
                    connection_id
                );
            }
            Err(err) => {
                error!("Remote question generation failed for {}: {}", connection_id, err);
                self.telemetry.record_error("llm", err.reason());
            }
        }

        self.telemetry.record_llm_latency(started.elapsed(), true);
        let fallback = self.fallback.generate(snapshot, options);
        debug!(
            "Generated {} fallback questions for {}",
            fallback.len(),
            connection_id
        );
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::questions::QuestionClientError;
    use crate::telemetry::NoopTelemetry;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn pipeline_with(client: Arc<dyn QuestionClient>) -> QuestionPipeline {
        QuestionPipeline::new(
            client,
            FallbackGenerator::new(3),
            PiiRedactor::new(true),
            Arc::new(NoopTelemetry),
        )
    }

    /// Always succeeds with the given candidates.
    struct AlwaysOk(Vec<QuestionItem>);

    #[async_trait]
    impl QuestionClient for AlwaysOk {
        async fn generate(
            &self,
            _snapshot: &ContextSnapshot,
            _options: &GenerateQuestionsOptions,
        ) -> Result<Vec<QuestionItem>, QuestionClientError> {
            Ok(self.0.clone())
        }
    }

    /// Always fails with a transport error.
    struct AlwaysFails;

    #[async_trait]
    impl QuestionClient for AlwaysFails {
        async fn generate(
            &self,
            _snapshot: &ContextSnapshot,
            _options: &GenerateQuestionsOptions,
        ) -> Result<Vec<QuestionItem>, QuestionClientError> {
            Err(QuestionClientError::Request("connection refused".into()))
        }
    }

    /// Records the snapshot it was handed, then reports "no result".
    struct CapturingClient {
        seen: Mutex<Option<ContextSnapshot>>,
    }

    #[async_trait]
    impl QuestionClient for CapturingClient {
        async fn generate(
            &self,
            snapshot: &ContextSnapshot,
            _options: &GenerateQuestionsOptions,
        ) -> Result<Vec<QuestionItem>, QuestionClientError> {
            *self.seen.lock().unwrap() = Some(snapshot.clone());
            Ok(Vec::new())
        }
    }

    fn remote_item(text: &str) -> QuestionItem {
        QuestionItem {
            text: text.to_string(),
            tags: None,
            confidence: Some(0.8),
            novelty: None,
        }
    }

    #[tokio::test]
    async fn test_remote_candidates_returned_as_is() {
        let pipeline = pipeline_with(Arc::new(AlwaysOk(vec![remote_item("What changed?")])));
        let items = pipeline
            .generate("conn-1", &ContextSnapshot::default(), &GenerateQuestionsOptions::default())
            .await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "What changed?");
    }

    #[tokio::test]
    async fn test_empty_remote_result_falls_back() {
        let pipeline = pipeline_with(Arc::new(AlwaysOk(Vec::new())));
        let items = pipeline
            .generate("conn-1", &ContextSnapshot::default(), &GenerateQuestionsOptions::default())
            .await;
        assert_eq!(items.len(), 3);
        assert!(items[0].text.contains("this discussion"));
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_without_error() {
        let pipeline = pipeline_with(Arc::new(AlwaysFails));
        let items = pipeline
            .generate("conn-1", &ContextSnapshot::default(), &GenerateQuestionsOptions::default())
            .await;
        assert!(!items.is_empty());
    }

    #[tokio::test]
    async fn test_remote_sees_redacted_data_fallback_sees_original() {
        let client = Arc::new(CapturingClient {
            seen: Mutex::new(None),
        });
        let pipeline = pipeline_with(client.clone());

        let snapshot = ContextSnapshot {
            rolling_summary: "Call 555-123-4567 about the launch.".to_string(),
            ..ContextSnapshot::default()
        };
        let items = pipeline
            .generate("conn-1", &snapshot, &GenerateQuestionsOptions::default())
            .await;

        let seen = client.seen.lock().unwrap().clone().unwrap();
        assert!(seen.rolling_summary.contains("<pii:phone>"));
        assert!(!seen.rolling_summary.contains("4567"));

        // Fallback derives its focus from the unredacted summary.
        assert!(items[0].text.contains("555-123-4567"));
    }
}
