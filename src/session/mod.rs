//! # Session Orchestration
//!
//! The per-connection session registry and the orchestration wiring between
//! transport operations, the speech pipeline, the context store, the rate
//! governor and the question pipeline.

pub mod manager;

pub use manager::{ClientNotifier, ServerMessage, SessionManager};
