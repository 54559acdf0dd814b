//! # Speech Pipeline
//!
//! The per-connection bridge between inbound audio frames and the external
//! recognition engine: a bounded queue with blocking producers, a single pump
//! task feeding the engine, and an event task translating engine events into
//! observer calls.

pub mod engine;
pub mod session;

pub use engine::{
    EngineEvent, EngineHandle, NoopEngineFactory, RecognitionEngine, RecognitionEngineFactory,
    RecognitionOutcome, SpeechObserver,
};
pub use session::SpeechSession;
