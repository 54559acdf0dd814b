//! # Question Generation
//!
//! Produces suggested follow-up questions from a context snapshot:
//! redaction → remote generation with bounded retries → deterministic local
//! fallback. Remote failures degrade gracefully; the pipeline never
//! propagates them to the caller.

pub mod client;
pub mod fallback;
pub mod pipeline;
pub mod redactor;

pub use client::{HttpQuestionClient, NullQuestionClient, QuestionClient, QuestionClientError};
pub use fallback::FallbackGenerator;
pub use pipeline::QuestionPipeline;
pub use redactor::PiiRedactor;
