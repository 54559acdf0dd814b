//! # Session Manager
//!
//! Top-level orchestrator for active connections. Owns the session registry,
//! enforces the rate governor, drives the question pipeline, and — as the
//! speech pipeline's observer — turns recognition events into context updates
//! and outbound notifications.
//!
//! ## Registry:
//! A concurrent map keyed by connection id. Insertion and removal are atomic
//! single operations; exactly one live session per connection id is permitted
//! (enforced by add-if-absent, with the losing session disposed).

use crate::context::{ContextStore, RollingSummarizer};
use crate::contracts::{AudioFrame, FinalTranscript, GenerateQuestionsOptions, PartialTranscript, QuestionItem};
use crate::error::{AppError, AppResult};
use crate::questions::QuestionPipeline;
use crate::speech::{RecognitionEngineFactory, SpeechObserver, SpeechSession};
use crate::telemetry::TelemetryRecorder;
use crate::throttle::RateGovernor;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Notification pushed to the originating connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Session lifecycle announcement
    #[serde(rename = "session")]
    Session { state: String },

    /// Interim transcript; subject to revision, never persisted
    #[serde(rename = "partial")]
    Partial {
        text: String,
        offset: i64,
        duration: i64,
    },

    /// Confirmed transcript
    #[serde(rename = "final")]
    Final {
        text: String,
        offset: i64,
        duration: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        facts: Option<Vec<String>>,
    },

    /// Question-generation result
    #[serde(rename = "questions")]
    Questions { items: Vec<QuestionItem> },

    /// Structured error event; the session stays up
    #[serde(rename = "error")]
    Error { reason: String, details: String },
}

/// Outbound delivery seam so the core never depends on transport types.
#[async_trait]
pub trait ClientNotifier: Send + Sync {
    async fn notify(&self, connection_id: &str, message: ServerMessage);
}

/// Registry entry: one live speech session plus activity tracking.
struct ConversationSession {
    speech: Arc<SpeechSession>,
    last_activity: Mutex<Instant>,
    last_sequence: AtomicU32,
}

impl ConversationSession {
    fn new(speech: Arc<SpeechSession>) -> Self {
        Self {
            speech,
            last_activity: Mutex::new(Instant::now()),
            last_sequence: AtomicU32::new(0),
        }
    }

    fn track_activity(&self, sequence: u32) {
        *self.last_activity.lock().expect("activity lock poisoned") = Instant::now();
        self.last_sequence.store(sequence, Ordering::SeqCst);
    }

    fn last_activity(&self) -> Instant {
        *self.last_activity.lock().expect("activity lock poisoned")
    }
}

pub struct SessionManager {
    sessions: Arc<DashMap<String, ConversationSession>>,
    factory: Arc<dyn RecognitionEngineFactory>,
    pipeline: Arc<QuestionPipeline>,
    context: Arc<ContextStore>,
    throttle: Arc<RateGovernor>,
    observer: Arc<SessionObserver>,
    max_queued_frames: usize,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factory: Arc<dyn RecognitionEngineFactory>,
        pipeline: Arc<QuestionPipeline>,
        context: Arc<ContextStore>,
        summarizer: Arc<RollingSummarizer>,
        throttle: Arc<RateGovernor>,
        telemetry: Arc<dyn TelemetryRecorder>,
        notifier: Arc<dyn ClientNotifier>,
        max_queued_frames: usize,
    ) -> Self {
        let sessions = Arc::new(DashMap::new());
        let observer = Arc::new(SessionObserver {
            sessions: Arc::clone(&sessions),
            context: Arc::clone(&context),
            summarizer,
            telemetry,
            notifier,
        });

        Self {
            sessions,
            factory,
            pipeline,
            context,
            throttle,
            observer,
            max_queued_frames,
        }
    }

    /// Register a new connection: create its speech session, add it to the
    /// registry atomically, and initialize fresh context state.
    ///
    /// Fails with a duplicate-registration error when the id is already
    /// registered; a session created for a lost insertion race is disposed.
    pub async fn register_connection(&self, connection_id: &str) -> AppResult<()> {
        if self.sessions.contains_key(connection_id) {
            warn!("Connection {} is already registered", connection_id);
            return Err(AppError::DuplicateSession(connection_id.to_string()));
        }

        let handle = self.factory.create(connection_id).await.map_err(|e| {
            AppError::Internal(format!("Failed to create recognition engine: {}", e))
        })?;
        let speech = SpeechSession::start(
            connection_id,
            handle,
            Arc::clone(&self.observer) as Arc<dyn SpeechObserver>,
            self.max_queued_frames,
        )
        .await
        .map_err(|e| AppError::Internal(format!("Failed to start speech session: {}", e)))?;

        let inserted = match self.sessions.entry(connection_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(ConversationSession::new(Arc::clone(&speech)));
                true
            }
        };

        if !inserted {
            speech.dispose().await;
            return Err(AppError::DuplicateSession(connection_id.to_string()));
        }

        self.context.create_or_reset(connection_id);
        info!("Registered connection {}", connection_id);
        Ok(())
    }

    /// Admit one audio frame and queue it for the connection's pump.
    ///
    /// May suspend the caller while the session's frame queue is full.
    pub async fn handle_audio_frame(&self, connection_id: &str, frame: AudioFrame) -> AppResult<()> {
        let speech = {
            let session = self
                .sessions
                .get(connection_id)
                .ok_or(AppError::SessionNotInitialized)?;
            Arc::clone(&session.speech)
        };

        self.throttle
            .check_audio_frame(connection_id, frame.payload.len())?;

        let sequence = frame.sequence;
        speech.enqueue_frame(frame).await;

        if let Some(session) = self.sessions.get(connection_id) {
            session.track_activity(sequence);
        }

        Ok(())
    }

    /// Drain and stop the connection's speech session. No-op when the id is
    /// unknown; idempotent otherwise.
    pub async fn stop_stream(&self, connection_id: &str) -> AppResult<()> {
        let Some(speech) = self
            .sessions
            .get(connection_id)
            .map(|session| Arc::clone(&session.speech))
        else {
            return Ok(());
        };

        speech
            .stop()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to stop speech session: {}", e)))?;
        info!("StopStream requested for connection {}", connection_id);
        Ok(())
    }

    /// Produce follow-up questions for a connection.
    ///
    /// Unknown ids fail before any throttle or context access, so a rejected
    /// call leaves no state behind. Returned question texts are recorded into
    /// the asked-question history.
    pub async fn generate_questions(
        &self,
        connection_id: &str,
        options: GenerateQuestionsOptions,
    ) -> AppResult<Vec<QuestionItem>> {
        if !self.sessions.contains_key(connection_id) {
            return Err(AppError::SessionNotInitialized);
        }

        self.throttle.check_generate_questions(connection_id)?;
        let snapshot = self.context.snapshot(connection_id);
        let items = self.pipeline.generate(connection_id, &snapshot, &options).await;

        for item in &items {
            self.context.register_asked_question(connection_id, &item.text);
        }

        Ok(items)
    }

    /// Tear down everything tied to a connection. Idempotent, and safe to
    /// call even if registration partially failed.
    pub async fn cleanup_connection(&self, connection_id: &str) {
        if let Some((_, session)) = self.sessions.remove(connection_id) {
            session.speech.dispose().await;
            info!("Cleaned up connection {}", connection_id);
        }

        self.context.remove(connection_id);
        self.throttle.reset(connection_id);
    }

    /// Number of currently registered connections.
    pub fn active_session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// The manager's observer half: reacts to speech events for any registered
/// connection. Split into its own type so speech sessions can hold it without
/// a reference cycle through the registry.
struct SessionObserver {
    sessions: Arc<DashMap<String, ConversationSession>>,
    context: Arc<ContextStore>,
    summarizer: Arc<RollingSummarizer>,
    telemetry: Arc<dyn TelemetryRecorder>,
    notifier: Arc<dyn ClientNotifier>,
}

#[async_trait]
impl SpeechObserver for SessionObserver {
    async fn on_partial(&self, connection_id: &str, partial: PartialTranscript) {
        debug!("Partial transcript for {}: {}", connection_id, partial.text);
        self.notifier
            .notify(
                connection_id,
                ServerMessage::Partial {
                    text: partial.text,
                    offset: partial.offset_ms,
                    duration: partial.duration_ms,
                },
            )
            .await;
    }

    async fn on_final(&self, connection_id: &str, transcript: FinalTranscript) {
        self.context
            .register_final_transcript(connection_id, &transcript);
        self.summarizer.update(connection_id, &transcript.text);
        debug!("Final transcript for {}: {}", connection_id, transcript.text);

        self.notifier
            .notify(
                connection_id,
                ServerMessage::Final {
                    text: transcript.text,
                    offset: transcript.offset_ms,
                    duration: transcript.duration_ms,
                    facts: transcript.facts,
                },
            )
            .await;

        let last_activity = self
            .sessions
            .get(connection_id)
            .map(|session| session.last_activity());
        if let Some(last_activity) = last_activity {
            let latency = Instant::now().duration_since(last_activity);
            if latency > Duration::ZERO {
                self.telemetry.record_asr_latency(latency);
            }
        }
    }

    async fn on_error(&self, connection_id: &str, reason: &str, details: String) {
        error!(
            "Speech pipeline error for {}: {} ({})",
            connection_id, reason, details
        );
        self.telemetry.record_error("speech", reason);
        self.notifier
            .notify(
                connection_id,
                ServerMessage::Error {
                    reason: reason.to_string(),
                    details,
                },
            )
            .await;
    }
}
