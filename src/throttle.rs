//! # Rate Governor
//!
//! Per-connection admission control for inbound operations:
//! - audio frames are checked against a payload byte cap and a rolling
//!   one-second frequency window;
//! - question-generation requests are held to a cooldown interval.
//!
//! Violations are reported to the caller as admission errors, never silently
//! dropped. State for different connections never contends: each connection's
//! counters sit behind their own lock inside a concurrent map.

use crate::config::ThrottlingConfig;
use crate::error::{AppError, AppResult};
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Counter for the current one-second audio window of one connection.
#[derive(Debug)]
struct AudioRateState {
    window_start: Instant,
    count: u32,
}

/// Sliding-window limiter for audio frames plus a cooldown limiter for
/// question-generation requests, keyed by connection id.
pub struct RateGovernor {
    config: ThrottlingConfig,
    audio: DashMap<String, Mutex<AudioRateState>>,
    questions: DashMap<String, Mutex<Option<Instant>>>,
}

impl RateGovernor {
    pub fn new(config: ThrottlingConfig) -> Self {
        Self {
            config,
            audio: DashMap::new(),
            questions: DashMap::new(),
        }
    }

    /// Admit or reject one audio frame.
    ///
    /// The payload size check applies regardless of the current window
    /// occupancy. The frequency window resets once it is older than one
    /// second of wall clock.
    pub fn check_audio_frame(&self, connection_id: &str, payload_size: usize) -> AppResult<()> {
        if payload_size > self.config.max_audio_payload_bytes {
            return Err(AppError::PayloadTooLarge {
                size: payload_size,
                limit: self.config.max_audio_payload_bytes,
            });
        }

        let now = Instant::now();
        let entry = self
            .audio
            .entry(connection_id.to_string())
            .or_insert_with(|| {
                Mutex::new(AudioRateState {
                    window_start: now,
                    count: 0,
                })
            });

        let mut state = entry.lock().expect("audio rate lock poisoned");
        if now.duration_since(state.window_start) >= Duration::from_secs(1) {
            state.window_start = now;
            state.count = 0;
        }

        if state.count >= self.config.max_audio_frames_per_second {
            return Err(AppError::AudioRateExceeded);
        }

        state.count += 1;
        Ok(())
    }

    /// Admit or reject one question-generation request, recording the request
    /// time on success.
    pub fn check_generate_questions(&self, connection_id: &str) -> AppResult<()> {
        let now = Instant::now();
        let entry = self
            .questions
            .entry(connection_id.to_string())
            .or_insert_with(|| Mutex::new(None));

        let mut last = entry.lock().expect("questions rate lock poisoned");
        if let Some(previous) = *last {
            if now.duration_since(previous) < self.config.generate_questions_cooldown() {
                return Err(AppError::QuestionsRateExceeded);
            }
        }

        *last = Some(now);
        Ok(())
    }

    /// Drop both limiter states for a connection.
    pub fn reset(&self, connection_id: &str) {
        self.audio.remove(connection_id);
        self.questions.remove(connection_id);
    }

    /// Whether any limiter state is currently tracked for a connection.
    /// Used by tests to verify rejected operations leave no residue.
    pub fn has_state(&self, connection_id: &str) -> bool {
        self.audio.contains_key(connection_id) || self.questions.contains_key(connection_id)
    }
}
