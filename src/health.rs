use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Liveness probe, mirrored at `/healthz` and `/api/v1/health`.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "followup-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "sessions": {
            "active_connections": metrics.active_sessions,
            "registered_sessions": state.sessions.active_session_count()
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "asr_latency_avg_ms": metrics.asr_latency.average_ms(),
            "llm_latency_avg_ms": metrics.llm_latency.average_ms(),
            "llm_fallbacks": metrics.llm_fallbacks
        }
    }))
}

/// Detailed metrics snapshot: per-endpoint HTTP statistics plus the core
/// pipeline counters.
pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    let mut component_errors = Vec::new();
    for (key, count) in metrics.component_errors.iter() {
        component_errors.push(json!({
            "error": key,
            "count": count
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_connections": metrics.active_sessions,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "pipelines": {
            "asr_latency": {
                "count": metrics.asr_latency.count,
                "average_ms": metrics.asr_latency.average_ms()
            },
            "llm_latency": {
                "count": metrics.llm_latency.count,
                "average_ms": metrics.llm_latency.average_ms()
            },
            "llm_fallbacks": metrics.llm_fallbacks
        },
        "endpoints": endpoint_stats,
        "component_errors": component_errors
    }))
}
