use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

fn config_json(config: &crate::config::AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "speech": {
            "language": config.speech.language,
            "sample_rate": config.speech.sample_rate,
            "bits_per_sample": config.speech.bits_per_sample,
            "channels": config.speech.channels,
            "max_queued_frames": config.speech.max_queued_frames
        },
        "context": {
            "sliding_window_ms": config.context.sliding_window_ms,
            "max_window_characters": config.context.max_window_characters,
            "max_asked_recently": config.context.max_asked_recently,
            "max_known_facts": config.context.max_known_facts
        },
        "questions": {
            "fallback_question_count": config.questions.fallback_question_count
        },
        "redaction": {
            "enabled": config.redaction.enabled
        },
        "throttling": {
            "max_audio_frames_per_second": config.throttling.max_audio_frames_per_second,
            "max_audio_payload_bytes": config.throttling.max_audio_payload_bytes,
            "generate_questions_cooldown_ms": config.throttling.generate_questions_cooldown_ms
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_json(&config)
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::BadRequest)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_json(&current_config)
    })))
}
