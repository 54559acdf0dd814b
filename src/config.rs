//! # Configuration Management
//!
//! Loads and manages application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_THROTTLING_MAXAUDIOPAYLOADBYTES, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub speech: SpeechConfig,
    pub context: ContextConfig,
    pub summary: SummaryConfig,
    pub llm: LlmConfig,
    pub questions: QuestionConfig,
    pub redaction: RedactionConfig,
    pub throttling: ThrottlingConfig,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Audio format and queueing settings for the speech-recognition pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Recognition language passed to the engine
    pub language: String,

    /// PCM sample rate expected by the engine (Hz)
    pub sample_rate: u32,

    /// Bits per sample (PCM16 by default)
    pub bits_per_sample: u8,

    /// Number of audio channels (mono = 1)
    pub channels: u8,

    /// Maximum number of audio frames buffered before applying backpressure.
    /// Each frame contains ~20-40ms of audio.
    pub max_queued_frames: usize,
}

/// Bounds for the per-connection conversational context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Sliding window duration for retained transcripts (ms)
    pub sliding_window_ms: u64,

    /// Maximum amount of text preserved in the sliding window
    pub max_window_characters: usize,

    /// Maximum number of questions tracked for duplicate suppression
    pub max_asked_recently: usize,

    /// Maximum number of known facts kept in memory
    pub max_known_facts: usize,
}

impl ContextConfig {
    pub fn sliding_window(&self) -> Duration {
        Duration::from_millis(self.sliding_window_ms)
    }
}

/// Rolling-summary settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    /// Maximum length of the rolling summary text
    pub max_summary_characters: usize,
}

/// Remote question-generation service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base endpoint of the generation service; empty disables remote calls
    pub base_url: String,

    /// Bearer token attached when non-empty
    pub api_key: String,

    /// Maximum candidates requested per call
    pub max_candidates: usize,

    /// Attempts per call (clamped to at least 1)
    pub max_retries: u32,

    /// Per-attempt timeout (ms)
    pub timeout_ms: u64,
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Local question-generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionConfig {
    /// Number of questions the fallback generator renders
    pub fallback_question_count: usize,
}

/// PII redaction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionConfig {
    pub enabled: bool,
}

/// Per-connection rate limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottlingConfig {
    /// Audio frames admitted per rolling one-second window
    pub max_audio_frames_per_second: u32,

    /// Maximum audio frame payload size (bytes); larger frames are rejected
    pub max_audio_payload_bytes: usize,

    /// Minimum delay between question-generation requests (ms)
    pub generate_questions_cooldown_ms: u64,
}

impl ThrottlingConfig {
    pub fn generate_questions_cooldown(&self) -> Duration {
        Duration::from_millis(self.generate_questions_cooldown_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            speech: SpeechConfig {
                language: "en-US".to_string(),
                sample_rate: 16_000,
                bits_per_sample: 16,
                channels: 1,
                max_queued_frames: 256,
            },
            context: ContextConfig {
                sliding_window_ms: 300_000, // 5 minutes
                max_window_characters: 4_000,
                max_asked_recently: 50,
                max_known_facts: 64,
            },
            summary: SummaryConfig {
                max_summary_characters: 2_000,
            },
            llm: LlmConfig {
                base_url: String::new(),
                api_key: String::new(),
                max_candidates: 20,
                max_retries: 3,
                timeout_ms: 12_000,
            },
            questions: QuestionConfig {
                fallback_question_count: 3,
            },
            redaction: RedactionConfig { enabled: true },
            throttling: ThrottlingConfig {
                max_audio_frames_per_second: 50,
                max_audio_payload_bytes: 4096,
                generate_questions_cooldown_ms: 5_000,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml and APP_-prefixed
    /// environment variables, in that priority order.
    ///
    /// `HOST` and `PORT` are honored as bare overrides because deployment
    /// platforms commonly inject them without a prefix.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.speech.max_queued_frames == 0 {
            return Err(anyhow::anyhow!("Speech frame queue size must be greater than 0"));
        }

        if self.context.sliding_window_ms == 0 {
            return Err(anyhow::anyhow!("Context sliding window must be greater than 0"));
        }

        if self.context.max_window_characters == 0 {
            return Err(anyhow::anyhow!("Context window character cap must be greater than 0"));
        }

        if self.throttling.max_audio_frames_per_second == 0 {
            return Err(anyhow::anyhow!("Audio frame rate limit must be greater than 0"));
        }

        if self.throttling.max_audio_payload_bytes == 0 {
            return Err(anyhow::anyhow!("Audio payload byte cap must be greater than 0"));
        }

        if self.questions.fallback_question_count == 0 {
            return Err(anyhow::anyhow!("Fallback question count must be greater than 0"));
        }

        Ok(())
    }

    /// Update the runtime-tunable parts of the configuration from a JSON
    /// string (used by the config endpoint). Only some fields may be changed
    /// at runtime; the rest require a restart.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(throttling) = partial_config.get("throttling") {
            if let Some(fps) = throttling
                .get("max_audio_frames_per_second")
                .and_then(|v| v.as_u64())
            {
                self.throttling.max_audio_frames_per_second = fps as u32;
            }
            if let Some(bytes) = throttling
                .get("max_audio_payload_bytes")
                .and_then(|v| v.as_u64())
            {
                self.throttling.max_audio_payload_bytes = bytes as usize;
            }
            if let Some(cooldown) = throttling
                .get("generate_questions_cooldown_ms")
                .and_then(|v| v.as_u64())
            {
                self.throttling.generate_questions_cooldown_ms = cooldown;
            }
        }

        if let Some(questions) = partial_config.get("questions") {
            if let Some(count) = questions
                .get("fallback_question_count")
                .and_then(|v| v.as_u64())
            {
                self.questions.fallback_question_count = count as usize;
            }
        }

        if let Some(redaction) = partial_config.get("redaction") {
            if let Some(enabled) = redaction.get("enabled").and_then(|v| v.as_bool()) {
                self.redaction.enabled = enabled;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.throttling.max_audio_payload_bytes, 4096);
        assert_eq!(config.context.sliding_window_ms, 300_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.throttling.max_audio_payload_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"throttling": {"max_audio_frames_per_second": 25}, "questions": {"fallback_question_count": 5}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.throttling.max_audio_frames_per_second, 25);
        assert_eq!(config.questions.fallback_question_count, 5);
        // Other fields should remain unchanged
        assert_eq!(config.throttling.max_audio_payload_bytes, 4096);
    }

    #[test]
    fn test_config_update_rejects_invalid_values() {
        let mut config = AppConfig::default();
        let json = r#"{"questions": {"fallback_question_count": 0}}"#;
        assert!(config.update_from_json(json).is_err());
    }
}
