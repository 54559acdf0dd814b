//! # Application State Management
//!
//! Shared state accessed by HTTP handlers and the WebSocket layer:
//! configuration, aggregated metrics, and the wired core components (session
//! manager, outbound notifier). Construction here is the composition root —
//! collaborators are selected from configuration and injected once.

use crate::config::AppConfig;
use crate::context::{ContextStore, RollingSummarizer};
use crate::questions::{
    FallbackGenerator, HttpQuestionClient, NullQuestionClient, PiiRedactor, QuestionClient,
    QuestionPipeline,
};
use crate::session::{ClientNotifier, SessionManager};
use crate::speech::{NoopEngineFactory, RecognitionEngineFactory};
use crate::telemetry::{MetricsTelemetry, TelemetryRecorder};
use crate::throttle::RateGovernor;
use crate::websocket::WsNotifier;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::warn;

/// The main application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (runtime-tunable parts can be updated)
    pub config: Arc<RwLock<AppConfig>>,

    /// Aggregated performance metrics
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,

    /// The session orchestrator
    pub sessions: Arc<SessionManager>,

    /// Outbound delivery registry for live WebSocket connections
    pub notifier: Arc<WsNotifier>,
}

/// Running count/total pair for a latency series.
#[derive(Debug, Default, Clone)]
pub struct LatencyStat {
    pub count: u64,
    pub total_ms: u64,
}

impl LatencyStat {
    pub fn record(&mut self, millis: u64) {
        self.count += 1;
        self.total_ms += millis;
    }

    pub fn average_ms(&self) -> f64 {
        if self.count > 0 {
            self.total_ms as f64 / self.count as f64
        } else {
            0.0
        }
    }
}

/// Metrics collected across HTTP requests and the core pipelines.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of failed HTTP requests since server start
    pub error_count: u64,

    /// Current number of live WebSocket connections
    pub active_sessions: u32,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,

    /// End-to-end latency from last audio activity to a final transcript
    pub asr_latency: LatencyStat,

    /// Question-generation pipeline latency
    pub llm_latency: LatencyStat,

    /// Question-generation calls served by the local fallback
    pub llm_fallbacks: u64,

    /// Component error counters, keyed by "component/reason"
    pub component_errors: HashMap<String, u64>,
}

/// Performance metrics for a specific HTTP endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl AppState {
    /// Wire all core components from configuration.
    ///
    /// Collaborator selection mirrors startup of the original service: with
    /// no remote generation endpoint configured the null client is used, and
    /// without a speech SDK binding the noop engine factory stands in.
    pub fn new(config: AppConfig) -> Self {
        let metrics = Arc::new(RwLock::new(AppMetrics::default()));
        let telemetry: Arc<dyn TelemetryRecorder> =
            Arc::new(MetricsTelemetry::new(Arc::clone(&metrics)));

        let context = Arc::new(ContextStore::new(config.context.clone()));
        let summarizer = Arc::new(RollingSummarizer::new(
            Arc::clone(&context),
            config.summary.clone(),
        ));
        let throttle = Arc::new(RateGovernor::new(config.throttling.clone()));

        let client: Arc<dyn QuestionClient> = if config.llm.base_url.trim().is_empty() {
            warn!("LLM service is not configured. Question generation will rely on fallback templates");
            Arc::new(NullQuestionClient)
        } else {
            Arc::new(HttpQuestionClient::new(&config.llm))
        };
        let pipeline = Arc::new(QuestionPipeline::new(
            client,
            FallbackGenerator::new(config.questions.fallback_question_count),
            PiiRedactor::new(config.redaction.enabled),
            Arc::clone(&telemetry),
        ));

        let factory: Arc<dyn RecognitionEngineFactory> = Arc::new(NoopEngineFactory);

        let notifier = Arc::new(WsNotifier::default());
        let sessions = Arc::new(SessionManager::new(
            factory,
            pipeline,
            context,
            summarizer,
            throttle,
            telemetry,
            Arc::clone(&notifier) as Arc<dyn ClientNotifier>,
            config.speech.max_queued_frames,
        ));

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics,
            start_time: Instant::now(),
            sessions,
            notifier,
        }
    }

    /// Get a copy of the current configuration.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Update the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn increment_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_sessions += 1;
    }

    pub fn decrement_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    /// Consistent copy of the metrics for serialization.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
