//! # Context Store
//!
//! Bounded, time/size-limited per-connection memory of transcript text, the
//! rolling summary, asked-question history and extracted facts.
//!
//! ## Bounds (all configured):
//! - transcript window: entries older than the sliding window duration are
//!   dropped, and total text length is capped;
//! - asked questions: insertion-ordered set, oldest evicted beyond the cap;
//! - known facts: case-insensitive keys with FIFO eviction by first-insertion
//!   order (updating a value does not change its eviction order).
//!
//! ## Thread Safety:
//! Each connection's state sits behind its own mutex inside a concurrent map,
//! so operations on different connections never block each other.

use crate::config::ContextConfig;
use crate::contracts::FinalTranscript;
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

/// One retained transcript entry in the sliding window.
#[derive(Debug, Clone)]
struct TranscriptRecord {
    text: String,
    received_at: Instant,
    #[allow(dead_code)]
    offset_ms: i64,
    #[allow(dead_code)]
    duration_ms: i64,
}

/// A fact value together with the key casing it was first inserted with.
#[derive(Debug, Clone)]
struct FactEntry {
    key: String,
    value: String,
}

/// Mutable per-connection context state, always accessed under its lock.
#[derive(Debug, Default)]
struct ContextState {
    transcripts: Vec<TranscriptRecord>,
    rolling_summary: String,
    asked_recently: VecDeque<String>,
    /// Keyed by lowercased fact key
    known_facts: HashMap<String, FactEntry>,
    /// Lowercased fact keys in first-insertion order
    fact_order: VecDeque<String>,
}

/// Immutable read of one connection's context, taken under its lock.
/// Never aliases mutable state afterward.
#[derive(Debug, Clone, Default)]
pub struct ContextSnapshot {
    pub rolling_summary: String,

    /// Chronological window text, single-space separated, capped in length
    pub last_window: String,

    /// Facts in first-insertion order, original key casing preserved
    pub known_facts: Vec<(String, String)>,

    /// Asked questions from oldest to most recent
    pub asked_recently: Vec<String>,
}

impl ContextSnapshot {
    pub fn is_empty(&self) -> bool {
        self.rolling_summary.is_empty()
            && self.last_window.is_empty()
            && self.known_facts.is_empty()
            && self.asked_recently.is_empty()
    }
}

/// In-memory context store for all active connections.
pub struct ContextStore {
    state: DashMap<String, Mutex<ContextState>>,
    config: ContextConfig,
}

impl ContextStore {
    pub fn new(config: ContextConfig) -> Self {
        Self {
            state: DashMap::new(),
            config,
        }
    }

    /// Replace or create a fresh state for a connection. Last writer wins.
    pub fn create_or_reset(&self, connection_id: &str) {
        self.state
            .insert(connection_id.to_string(), Mutex::new(ContextState::default()));
        tracing::debug!("Initialized context for {}", connection_id);
    }

    /// Append a final transcript and eagerly re-apply the window trim.
    /// Unknown connection ids are a no-op, never an error.
    pub fn register_final_transcript(&self, connection_id: &str, transcript: &FinalTranscript) {
        let Some(entry) = self.state.get(connection_id) else {
            return;
        };

        let mut ctx = entry.lock().expect("context lock poisoned");
        ctx.transcripts.push(TranscriptRecord {
            text: transcript.text.clone(),
            received_at: Instant::now(),
            offset_ms: transcript.offset_ms,
            duration_ms: transcript.duration_ms,
        });
        self.trim_window(&mut ctx);
    }

    /// Replace the rolling summary atomically.
    pub fn update_rolling_summary(&self, connection_id: &str, summary: &str) {
        let Some(entry) = self.state.get(connection_id) else {
            return;
        };

        let mut ctx = entry.lock().expect("context lock poisoned");
        ctx.rolling_summary = summary.to_string();
    }

    /// Insert a question into the asked-question history. A duplicate moves
    /// to the most-recent end; the set is then trimmed from the oldest end.
    pub fn register_asked_question(&self, connection_id: &str, question: &str) {
        let Some(entry) = self.state.get(connection_id) else {
            return;
        };

        let mut ctx = entry.lock().expect("context lock poisoned");
        if let Some(position) = ctx.asked_recently.iter().position(|q| q == question) {
            // Move to the end to reflect recent usage.
            ctx.asked_recently.remove(position);
        }
        ctx.asked_recently.push_back(question.to_string());

        while ctx.asked_recently.len() > self.config.max_asked_recently {
            ctx.asked_recently.pop_front();
        }
    }

    /// Upsert facts. Existing keys (case-insensitive) are updated in place
    /// without changing their eviction order; new keys are appended. Facts
    /// are then evicted from the oldest-inserted end until within the cap.
    /// An empty slice is a no-op.
    pub fn upsert_known_facts(&self, connection_id: &str, facts: &[(String, String)]) {
        if facts.is_empty() {
            return;
        }

        let Some(entry) = self.state.get(connection_id) else {
            return;
        };

        let mut ctx = entry.lock().expect("context lock poisoned");
        for (key, value) in facts {
            let lookup = key.to_lowercase();
            if let Some(existing) = ctx.known_facts.get_mut(&lookup) {
                existing.value = value.clone();
                continue;
            }

            ctx.known_facts.insert(
                lookup.clone(),
                FactEntry {
                    key: key.clone(),
                    value: value.clone(),
                },
            );
            ctx.fact_order.push_back(lookup);
        }

        while ctx.known_facts.len() > self.config.max_known_facts {
            let Some(oldest) = ctx.fact_order.pop_front() else {
                break;
            };
            ctx.known_facts.remove(&oldest);
        }
    }

    /// Take an immutable snapshot of one connection's context.
    /// Unknown connection ids yield an all-empty snapshot, not an error.
    pub fn snapshot(&self, connection_id: &str) -> ContextSnapshot {
        let Some(entry) = self.state.get(connection_id) else {
            return ContextSnapshot::default();
        };

        let mut ctx = entry.lock().expect("context lock poisoned");
        self.trim_window(&mut ctx);

        let last_window = build_window_text(&ctx.transcripts, self.config.max_window_characters);
        let asked_recently: Vec<String> = ctx.asked_recently.iter().cloned().collect();
        let known_facts: Vec<(String, String)> = ctx
            .fact_order
            .iter()
            .filter_map(|key| {
                ctx.known_facts
                    .get(key)
                    .map(|fact| (fact.key.clone(), fact.value.clone()))
            })
            .collect();

        ContextSnapshot {
            rolling_summary: ctx.rolling_summary.clone(),
            last_window,
            known_facts,
            asked_recently,
        }
    }

    /// Discard a connection's state. Idempotent.
    pub fn remove(&self, connection_id: &str) {
        self.state.remove(connection_id);
        tracing::debug!("Removed context for {}", connection_id);
    }

    /// Drop expired entries, then trim from the oldest end until the total
    /// character count fits the cap.
    fn trim_window(&self, ctx: &mut ContextState) {
        let window = self.config.sliding_window();
        let now = Instant::now();
        ctx.transcripts
            .retain(|t| now.duration_since(t.received_at) < window);

        let mut total_chars: usize = ctx.transcripts.iter().map(|t| t.text.chars().count()).sum();
        while total_chars > self.config.max_window_characters && !ctx.transcripts.is_empty() {
            total_chars -= ctx.transcripts[0].text.chars().count();
            ctx.transcripts.remove(0);
        }
    }
}

/// Join transcript texts chronologically with single spaces, stopping once
/// the accumulated length reaches `max_chars` and hard-truncating the final
/// overshoot (character counted, so truncation is char-boundary safe).
fn build_window_text(transcripts: &[TranscriptRecord], max_chars: usize) -> String {
    if transcripts.is_empty() {
        return String::new();
    }

    let mut text = String::new();
    let mut chars = 0usize;
    for record in transcripts {
        if !text.is_empty() {
            text.push(' ');
            chars += 1;
        }

        text.push_str(&record.text);
        chars += record.text.chars().count();
        if chars >= max_chars {
            break;
        }
    }

    if chars > max_chars {
        if let Some((byte_index, _)) = text.char_indices().nth(max_chars) {
            text.truncate(byte_index);
        }
    }

    text
}
