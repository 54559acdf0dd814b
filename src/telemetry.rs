//! # Telemetry
//!
//! Injected recorder seam for latency and error accounting. Core components
//! take an `Arc<dyn TelemetryRecorder>` so tests can plug in the no-op
//! implementation; the production recorder feeds the application metrics
//! exposed by the health endpoints.

use crate::state::AppMetrics;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Recorder for the latency/error signals the core emits.
pub trait TelemetryRecorder: Send + Sync {
    /// End-to-end latency from last audio activity to a final transcript.
    fn record_asr_latency(&self, latency: Duration);

    /// Duration of one question-generation pipeline run, flagged when it was
    /// served by the local fallback.
    fn record_llm_latency(&self, latency: Duration, used_fallback: bool);

    /// A component-level error with a short reason label.
    fn record_error(&self, component: &str, reason: &str);
}

/// Production recorder writing into the shared application metrics.
pub struct MetricsTelemetry {
    metrics: Arc<RwLock<AppMetrics>>,
}

impl MetricsTelemetry {
    pub fn new(metrics: Arc<RwLock<AppMetrics>>) -> Self {
        Self { metrics }
    }
}

impl TelemetryRecorder for MetricsTelemetry {
    fn record_asr_latency(&self, latency: Duration) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.asr_latency.record(latency.as_millis() as u64);
    }

    fn record_llm_latency(&self, latency: Duration, used_fallback: bool) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.llm_latency.record(latency.as_millis() as u64);
        if used_fallback {
            metrics.llm_fallbacks += 1;
        }
    }

    fn record_error(&self, component: &str, reason: &str) {
        let mut metrics = self.metrics.write().unwrap();
        let key = format!("{}/{}", component, reason);
        *metrics.component_errors.entry(key).or_insert(0) += 1;
    }
}

/// Recorder that drops everything. Used in tests.
pub struct NoopTelemetry;

impl TelemetryRecorder for NoopTelemetry {
    fn record_asr_latency(&self, _latency: Duration) {}

    fn record_llm_latency(&self, _latency: Duration, _used_fallback: bool) {}

    fn record_error(&self, _component: &str, _reason: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_telemetry_accumulates() {
        let metrics = Arc::new(RwLock::new(AppMetrics::default()));
        let telemetry = MetricsTelemetry::new(Arc::clone(&metrics));

        telemetry.record_asr_latency(Duration::from_millis(120));
        telemetry.record_asr_latency(Duration::from_millis(80));
        telemetry.record_llm_latency(Duration::from_millis(300), true);
        telemetry.record_error("speech", "AudioPumpFailed");
        telemetry.record_error("speech", "AudioPumpFailed");

        let snapshot = metrics.read().unwrap();
        assert_eq!(snapshot.asr_latency.count, 2);
        assert_eq!(snapshot.asr_latency.average_ms(), 100.0);
        assert_eq!(snapshot.llm_fallbacks, 1);
        assert_eq!(snapshot.component_errors["speech/AudioPumpFailed"], 2);
    }
}
