//! # Speech Session
//!
//! Wraps one recognition engine instance for one connection. Owns a bounded
//! audio queue and two background tasks: a single pump draining the queue in
//! FIFO order into the engine input, and an event task translating engine
//! events into observer calls.
//!
//! ## Session Lifecycle:
//! `Created → Started → Stopping → Stopped`. Enqueueing is valid while
//! `Started` and a silent no-op from `Stopping` on. `stop` is idempotent: the
//! first caller closes the queue, cancels the pump, awaits it and stops the
//! engine; later callers return immediately. Disposal routes through stop,
//! swallowing stop-time failures, then always releases the engine.
//!
//! ## Backpressure:
//! The frame queue is a bounded channel with blocking (never dropping)
//! producers: enqueueing into a full queue suspends the caller until the
//! pump frees space.

use crate::contracts::{AudioFrame, FinalTranscript, PartialTranscript};
use crate::speech::engine::{
    EngineEvent, EngineHandle, RecognitionEngine, RecognitionOutcome, SpeechObserver,
};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const STATE_CREATED: u8 = 0;
const STATE_STARTED: u8 = 1;
const STATE_STOPPING: u8 = 2;
const STATE_STOPPED: u8 = 3;

/// Observable lifecycle state of a speech session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Started,
    Stopping,
    Stopped,
}

pub struct SpeechSession {
    connection_id: String,
    engine: Arc<dyn RecognitionEngine>,

    /// Producer half of the audio queue; taken (closed) on stop
    frames: Mutex<Option<mpsc::Sender<AudioFrame>>>,

    state: AtomicU8,
    stop_signal: watch::Sender<bool>,
    pump_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    event_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SpeechSession {
    /// Launch the background tasks and start continuous recognition.
    ///
    /// On engine start failure the tasks are torn down and the engine is
    /// released before the error is returned.
    pub async fn start(
        connection_id: &str,
        handle: EngineHandle,
        observer: Arc<dyn SpeechObserver>,
        max_queued_frames: usize,
    ) -> anyhow::Result<Arc<Self>> {
        let EngineHandle { engine, events } = handle;
        let (frames_tx, frames_rx) = mpsc::channel(max_queued_frames.max(8));
        let (stop_tx, stop_rx) = watch::channel(false);

        let session = Arc::new(Self {
            connection_id: connection_id.to_string(),
            engine: Arc::clone(&engine),
            frames: Mutex::new(Some(frames_tx)),
            state: AtomicU8::new(STATE_CREATED),
            stop_signal: stop_tx,
            pump_task: tokio::sync::Mutex::new(None),
            event_task: tokio::sync::Mutex::new(None),
        });

        let pump = tokio::spawn(Self::pump_audio(
            connection_id.to_string(),
            Arc::clone(&engine),
            frames_rx,
            stop_rx.clone(),
            Arc::clone(&observer),
        ));
        let events = tokio::spawn(Self::pump_events(
            connection_id.to_string(),
            events,
            stop_rx,
            observer,
        ));
        *session.pump_task.lock().await = Some(pump);
        *session.event_task.lock().await = Some(events);

        if let Err(err) = engine.start().await {
            session.state.store(STATE_STOPPING, Ordering::SeqCst);
            session.frames.lock().expect("frames lock poisoned").take();
            let _ = session.stop_signal.send(true);
            if let Some(task) = session.pump_task.lock().await.take() {
                let _ = task.await;
            }
            engine.shutdown().await;
            if let Some(task) = session.event_task.lock().await.take() {
                let _ = task.await;
            }
            session.state.store(STATE_STOPPED, Ordering::SeqCst);
            return Err(err);
        }

        session.state.store(STATE_STARTED, Ordering::SeqCst);
        info!("Speech session started for {}", connection_id);
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        match self.state.load(Ordering::SeqCst) {
            STATE_CREATED => SessionState::Created,
            STATE_STARTED => SessionState::Started,
            STATE_STOPPING => SessionState::Stopping,
            _ => SessionState::Stopped,
        }
    }

    /// Queue one frame for the pump.
    ///
    /// Suspends while the queue is full (bounded-queue backpressure). A
    /// silent no-op once the session is stopping or stopped; frames racing a
    /// concurrent stop are likewise dropped silently.
    pub async fn enqueue_frame(&self, frame: AudioFrame) {
        if self.state.load(Ordering::SeqCst) >= STATE_STOPPING {
            return;
        }

        let sender = self.frames.lock().expect("frames lock poisoned").clone();
        let Some(sender) = sender else {
            return;
        };

        let _ = sender.send(frame).await;
    }

    /// Drain and stop the session. Idempotent: only the first caller does
    /// work; concurrent and repeated callers return immediately.
    pub async fn stop(&self) -> anyhow::Result<()> {
        if self
            .state
            .compare_exchange(
                STATE_STARTED,
                STATE_STOPPING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Ok(());
        }

        // Close the input queue, cancel the pump, await its completion.
        self.frames.lock().expect("frames lock poisoned").take();
        let _ = self.stop_signal.send(true);
        if let Some(task) = self.pump_task.lock().await.take() {
            if let Err(err) = task.await {
                error!("Audio pump task failed for {}: {}", self.connection_id, err);
            }
        }

        let result = self.engine.stop().await;

        // The engine closes its event channel on stop, which lets the event
        // task drain trailing events and exit.
        if let Some(task) = self.event_task.lock().await.take() {
            if let Err(err) = task.await {
                error!("Event task failed for {}: {}", self.connection_id, err);
            }
        }

        self.state.store(STATE_STOPPED, Ordering::SeqCst);
        info!("Speech session stopped for {}", self.connection_id);
        result
    }

    /// Stop (swallowing and logging failures) and release engine resources.
    /// The engine is released on every exit path.
    pub async fn dispose(&self) {
        if let Err(err) = self.stop().await {
            warn!(
                "Error while stopping speech session for {}: {}",
                self.connection_id, err
            );
        }

        self.engine.shutdown().await;
    }

    /// Single consumer of the frame queue. Writes payloads to the engine in
    /// FIFO order; sequence and timestamp values are not inspected — frame
    /// ordering is the producer's responsibility. A write failure is reported
    /// once and ends the pump; it does not restart.
    async fn pump_audio(
        connection_id: String,
        engine: Arc<dyn RecognitionEngine>,
        mut frames: mpsc::Receiver<AudioFrame>,
        mut stop: watch::Receiver<bool>,
        observer: Arc<dyn SpeechObserver>,
    ) {
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        break;
                    };

                    if let Err(err) = engine.write_audio(&frame.payload).await {
                        error!("Audio pump failed for {}: {}", connection_id, err);
                        observer
                            .on_error(&connection_id, "AudioPumpFailed", err.to_string())
                            .await;
                        break;
                    }
                }
            }
        }

        engine.close_input().await;
    }

    /// Translates engine events into observer calls, preserving the order the
    /// engine raised them. Runs until the engine closes its event channel or
    /// the session stops; on stop, events already queued are still delivered.
    async fn pump_events(
        connection_id: String,
        mut events: mpsc::Receiver<EngineEvent>,
        mut stop: watch::Receiver<bool>,
        observer: Arc<dyn SpeechObserver>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    Self::dispatch_event(&connection_id, event, observer.as_ref()).await;
                }
                _ = stop.changed() => {
                    while let Ok(event) = events.try_recv() {
                        Self::dispatch_event(&connection_id, event, observer.as_ref()).await;
                    }
                    break;
                }
            }
        }
    }

    /// Filter and translate one engine event into the corresponding observer
    /// call. Blank text is discarded, as are finalized events whose outcome
    /// is not recognized speech.
    async fn dispatch_event(
        connection_id: &str,
        event: EngineEvent,
        observer: &dyn SpeechObserver,
    ) {
        match event {
            EngineEvent::Recognizing {
                text,
                offset_ms,
                duration_ms,
            } => {
                if text.trim().is_empty() {
                    return;
                }

                observer
                    .on_partial(
                        connection_id,
                        PartialTranscript {
                            text,
                            offset_ms,
                            duration_ms,
                        },
                    )
                    .await;
            }
            EngineEvent::Recognized {
                outcome,
                text,
                offset_ms,
                duration_ms,
                facts,
            } => {
                if outcome != RecognitionOutcome::Speech || text.trim().is_empty() {
                    return;
                }

                observer
                    .on_final(
                        connection_id,
                        FinalTranscript {
                            text,
                            offset_ms,
                            duration_ms,
                            facts,
                        },
                    )
                    .await;
            }
            EngineEvent::Canceled { details } => {
                observer
                    .on_error(connection_id, "SpeechCanceled", details)
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    struct FakeEngine {
        written: Mutex<Vec<Vec<u8>>>,
        fail_writes: AtomicBool,
        fail_stop: AtomicBool,
        stop_calls: AtomicUsize,
        input_closed: AtomicBool,
        shutdown_called: AtomicBool,
        events_tx: Mutex<Option<mpsc::Sender<EngineEvent>>>,
    }

    impl FakeEngine {
        fn create() -> (Arc<Self>, EngineHandle, mpsc::Sender<EngineEvent>) {
            let (events_tx, events_rx) = mpsc::channel(16);
            let engine = Arc::new(Self {
                written: Mutex::new(Vec::new()),
                fail_writes: AtomicBool::new(false),
                fail_stop: AtomicBool::new(false),
                stop_calls: AtomicUsize::new(0),
                input_closed: AtomicBool::new(false),
                shutdown_called: AtomicBool::new(false),
                events_tx: Mutex::new(Some(events_tx.clone())),
            });
            let handle = EngineHandle {
                engine: Arc::clone(&engine) as Arc<dyn RecognitionEngine>,
                events: events_rx,
            };
            (engine, handle, events_tx)
        }
    }

    #[async_trait]
    impl RecognitionEngine for FakeEngine {
        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn write_audio(&self, payload: &[u8]) -> anyhow::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(anyhow::anyhow!("input stream broken"));
            }
            self.written.lock().unwrap().push(payload.to_vec());
            Ok(())
        }

        async fn close_input(&self) {
            self.input_closed.store(true, Ordering::SeqCst);
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            self.events_tx.lock().unwrap().take();
            if self.fail_stop.load(Ordering::SeqCst) {
                return Err(anyhow::anyhow!("engine refused to stop"));
            }
            Ok(())
        }

        async fn shutdown(&self) {
            self.events_tx.lock().unwrap().take();
            self.shutdown_called.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        partials: Mutex<Vec<PartialTranscript>>,
        finals: Mutex<Vec<FinalTranscript>>,
        errors: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SpeechObserver for RecordingObserver {
        async fn on_partial(&self, _connection_id: &str, partial: PartialTranscript) {
            self.partials.lock().unwrap().push(partial);
        }

        async fn on_final(&self, _connection_id: &str, transcript: FinalTranscript) {
            self.finals.lock().unwrap().push(transcript);
        }

        async fn on_error(&self, _connection_id: &str, reason: &str, details: String) {
            self.errors.lock().unwrap().push((reason.to_string(), details));
        }
    }

    fn frame(sequence: u32, byte: u8) -> AudioFrame {
        AudioFrame {
            sequence,
            timestamp: sequence as f64 * 20.0,
            payload: vec![byte; 4],
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met within timeout");
    }

    #[tokio::test]
    async fn test_frames_reach_engine_in_fifo_order() {
        let (engine, handle, events) = FakeEngine::create();
        drop(events);
        let observer = Arc::new(RecordingObserver::default());
        let session = SpeechSession::start("conn-1", handle, observer, 8).await.unwrap();
        assert_eq!(session.state(), SessionState::Started);

        session.enqueue_frame(frame(1, 0xAA)).await;
        session.enqueue_frame(frame(2, 0xBB)).await;
        session.enqueue_frame(frame(3, 0xCC)).await;

        wait_until(|| engine.written.lock().unwrap().len() == 3).await;
        let written = engine.written.lock().unwrap().clone();
        assert_eq!(written, vec![vec![0xAA; 4], vec![0xBB; 4], vec![0xCC; 4]]);

        session.stop().await.unwrap();
        assert!(engine.input_closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (engine, handle, events) = FakeEngine::create();
        drop(events);
        let session = SpeechSession::start(
            "conn-1",
            handle,
            Arc::new(RecordingObserver::default()),
            8,
        )
        .await
        .unwrap();

        session.stop().await.unwrap();
        session.stop().await.unwrap();
        assert_eq!(engine.stop_calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_enqueue_after_stop_is_silent_noop() {
        let (engine, handle, events) = FakeEngine::create();
        drop(events);
        let session = SpeechSession::start(
            "conn-1",
            handle,
            Arc::new(RecordingObserver::default()),
            8,
        )
        .await
        .unwrap();

        session.stop().await.unwrap();
        session.enqueue_frame(frame(1, 0xAA)).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(engine.written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_reports_pipeline_error() {
        let (engine, handle, events) = FakeEngine::create();
        drop(events);
        let observer = Arc::new(RecordingObserver::default());
        let session = SpeechSession::start("conn-1", handle, (observer.clone() as Arc<dyn SpeechObserver>), 8)
            .await
            .unwrap();

        engine.fail_writes.store(true, Ordering::SeqCst);
        session.enqueue_frame(frame(1, 0xAA)).await;

        wait_until(|| !observer.errors.lock().unwrap().is_empty()).await;
        let errors = observer.errors.lock().unwrap().clone();
        assert_eq!(errors[0].0, "AudioPumpFailed");
        assert!(errors[0].1.contains("input stream broken"));
        assert!(engine.input_closed.load(Ordering::SeqCst));

        session.dispose().await;
    }

    #[tokio::test]
    async fn test_event_translation_and_filtering() {
        let (_engine, handle, events) = FakeEngine::create();
        let observer = Arc::new(RecordingObserver::default());
        let session = SpeechSession::start("conn-1", handle, (observer.clone() as Arc<dyn SpeechObserver>), 8)
            .await
            .unwrap();

        events
            .send(EngineEvent::Recognizing {
                text: "   ".to_string(),
                offset_ms: 0,
                duration_ms: 0,
            })
            .await
            .unwrap();
        events
            .send(EngineEvent::Recognizing {
                text: "we need".to_string(),
                offset_ms: 10,
                duration_ms: 300,
            })
            .await
            .unwrap();
        events
            .send(EngineEvent::Recognized {
                outcome: RecognitionOutcome::NoMatch,
                text: "noise".to_string(),
                offset_ms: 10,
                duration_ms: 300,
                facts: None,
            })
            .await
            .unwrap();
        events
            .send(EngineEvent::Recognized {
                outcome: RecognitionOutcome::Speech,
                text: "we need a launch plan".to_string(),
                offset_ms: 10,
                duration_ms: 900,
                facts: None,
            })
            .await
            .unwrap();
        events
            .send(EngineEvent::Canceled {
                details: "service unavailable".to_string(),
            })
            .await
            .unwrap();

        wait_until(|| !observer.errors.lock().unwrap().is_empty()).await;

        let partials = observer.partials.lock().unwrap().clone();
        assert_eq!(partials.len(), 1);
        assert_eq!(partials[0].text, "we need");

        let finals = observer.finals.lock().unwrap().clone();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].text, "we need a launch plan");

        let errors = observer.errors.lock().unwrap().clone();
        assert_eq!(errors[0].0, "SpeechCanceled");
        assert_eq!(errors[0].1, "service unavailable");

        drop(events);
        session.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_releases_engine_even_when_stop_fails() {
        let (engine, handle, events) = FakeEngine::create();
        drop(events);
        let session = SpeechSession::start(
            "conn-1",
            handle,
            Arc::new(RecordingObserver::default()),
            8,
        )
        .await
        .unwrap();

        engine.fail_stop.store(true, Ordering::SeqCst);
        session.dispose().await;

        assert!(engine.shutdown_called.load(Ordering::SeqCst));
        assert_eq!(session.state(), SessionState::Stopped);
    }
}
