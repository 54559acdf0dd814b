//! # Recognition Engine Seam
//!
//! The external speech-recognition engine is a black box behind these traits:
//! a factory produces one engine per connection, the engine accepts a PCM
//! byte stream and pushes a small closed set of events over a per-session
//! channel. The engine adapter translates whatever native callback surface an
//! SDK offers into `EngineEvent`s; nothing above this boundary ever touches
//! SDK types.

use crate::contracts::{FinalTranscript, PartialTranscript};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::warn;

/// Reason code attached to a recognized (final) utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionOutcome {
    /// Confirmed speech; the text is usable
    Speech,
    /// The engine finalized without recognizing speech (silence, noise)
    NoMatch,
}

/// Engine-native events, pushed onto the per-session channel by the adapter.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// In-progress hypothesis, subject to revision
    Recognizing {
        text: String,
        offset_ms: i64,
        duration_ms: i64,
    },

    /// Finalized utterance with its outcome code
    Recognized {
        outcome: RecognitionOutcome,
        text: String,
        offset_ms: i64,
        duration_ms: i64,
        facts: Option<Vec<String>>,
    },

    /// The engine canceled recognition (error or service-side stop)
    Canceled { details: String },
}

/// Receiver half of the events the Session Manager reacts to.
///
/// Implemented by the Session Manager; a speech session's event task calls
/// into it in the order events were raised by the engine.
#[async_trait]
pub trait SpeechObserver: Send + Sync {
    async fn on_partial(&self, connection_id: &str, partial: PartialTranscript);

    async fn on_final(&self, connection_id: &str, transcript: FinalTranscript);

    async fn on_error(&self, connection_id: &str, reason: &str, details: String);
}

/// One engine instance, exclusively owned by one speech session.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Start continuous recognition.
    async fn start(&self) -> anyhow::Result<()>;

    /// Write one frame's PCM payload into the engine input stream.
    async fn write_audio(&self, payload: &[u8]) -> anyhow::Result<()>;

    /// Close the audio input stream. Called exactly once by the pump on exit.
    async fn close_input(&self);

    /// Stop continuous recognition. Implementations close their event
    /// channel here (or in `shutdown`) so the session's event task can drain
    /// trailing events and exit.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Release all engine resources. Must succeed on every exit path,
    /// including after a failed stop.
    async fn shutdown(&self);
}

/// A freshly created engine together with its event channel.
pub struct EngineHandle {
    pub engine: Arc<dyn RecognitionEngine>,
    pub events: mpsc::Receiver<EngineEvent>,
}

/// Creates one recognition engine per connection.
#[async_trait]
pub trait RecognitionEngineFactory: Send + Sync {
    async fn create(&self, connection_id: &str) -> anyhow::Result<EngineHandle>;
}

/// Development-time stub that fulfils the engine contract without external
/// dependencies: audio is accepted and discarded, no events are emitted.
#[derive(Default)]
pub struct NoopEngineFactory;

#[async_trait]
impl RecognitionEngineFactory for NoopEngineFactory {
    async fn create(&self, connection_id: &str) -> anyhow::Result<EngineHandle> {
        warn!(
            "Using noop recognition engine for connection {}. No speech engine is configured",
            connection_id
        );

        let (events_tx, events_rx) = mpsc::channel(8);
        Ok(EngineHandle {
            engine: Arc::new(NoopEngine {
                events: Mutex::new(Some(events_tx)),
            }),
            events: events_rx,
        })
    }
}

/// Holds the sender so the event channel stays open until shutdown.
struct NoopEngine {
    events: Mutex<Option<mpsc::Sender<EngineEvent>>>,
}

#[async_trait]
impl RecognitionEngine for NoopEngine {
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn write_audio(&self, _payload: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close_input(&self) {}

    async fn stop(&self) -> anyhow::Result<()> {
        self.events.lock().expect("noop engine lock poisoned").take();
        Ok(())
    }

    async fn shutdown(&self) {
        self.events.lock().expect("noop engine lock poisoned").take();
    }
}
