//! # Rolling Summary
//!
//! Lightweight summarizer that derives a rolling summary from the latest
//! final transcripts. A placeholder until an LLM-backed implementation is
//! introduced: it concatenates, normalizes whitespace and keeps the most
//! recent tail within the configured length.

use crate::config::SummaryConfig;
use crate::context::ContextStore;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

pub struct RollingSummarizer {
    context: Arc<ContextStore>,
    config: SummaryConfig,
}

impl RollingSummarizer {
    pub fn new(context: Arc<ContextStore>, config: SummaryConfig) -> Self {
        Self { context, config }
    }

    /// Fold a new final transcript into the connection's rolling summary.
    ///
    /// Pieces are joined in order: existing summary, then the new text; when
    /// both are blank the current window text is used instead. The result is
    /// whitespace-normalized and trimmed to the configured tail length.
    pub fn update(&self, connection_id: &str, final_text: &str) {
        let snapshot = self.context.snapshot(connection_id);

        let mut pieces: Vec<&str> = Vec::with_capacity(3);
        if !snapshot.rolling_summary.trim().is_empty() {
            pieces.push(&snapshot.rolling_summary);
        }

        if !final_text.trim().is_empty() {
            pieces.push(final_text);
        }

        if pieces.is_empty() && !snapshot.last_window.trim().is_empty() {
            pieces.push(&snapshot.last_window);
        }

        if pieces.is_empty() {
            tracing::debug!("No content to summarize for {}", connection_id);
            return;
        }

        let normalized = normalize(&pieces.join(" "));
        let trimmed = trim_to_limit(&normalized, self.config.max_summary_characters);
        self.context.update_rolling_summary(connection_id, &trimmed);
    }
}

fn normalize(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Keep the trailing `limit` characters, advanced to the next word boundary
/// so the summary never starts mid-word.
fn trim_to_limit(text: &str, limit: usize) -> String {
    let total = text.chars().count();
    if total <= limit {
        return text.to_string();
    }

    let start_char = total - limit;
    let byte_start = text
        .char_indices()
        .nth(start_char)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let candidate = &text[byte_start..];

    match candidate.find(' ') {
        Some(space) if space > 0 => candidate[space + 1..].trim_start().to_string(),
        _ => candidate.trim_start().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextConfig;
    use crate::contracts::FinalTranscript;

    fn setup(max_summary_characters: usize) -> (Arc<ContextStore>, RollingSummarizer) {
        let context = Arc::new(ContextStore::new(ContextConfig {
            sliding_window_ms: 300_000,
            max_window_characters: 4_000,
            max_asked_recently: 50,
            max_known_facts: 64,
        }));
        let summarizer = RollingSummarizer::new(
            Arc::clone(&context),
            SummaryConfig { max_summary_characters },
        );
        (context, summarizer)
    }

    #[test]
    fn test_summary_accumulates_final_text() {
        let (context, summarizer) = setup(2_000);
        context.create_or_reset("conn-1");

        summarizer.update("conn-1", "We need a launch plan.");
        summarizer.update("conn-1", "Marketing owns the rollout.");

        let snapshot = context.snapshot("conn-1");
        assert_eq!(
            snapshot.rolling_summary,
            "We need a launch plan. Marketing owns the rollout."
        );
    }

    #[test]
    fn test_summary_normalizes_whitespace() {
        let (context, summarizer) = setup(2_000);
        context.create_or_reset("conn-1");

        summarizer.update("conn-1", "  spaced \t out\n text ");

        assert_eq!(context.snapshot("conn-1").rolling_summary, "spaced out text");
    }

    #[test]
    fn test_summary_keeps_most_recent_tail() {
        let (context, summarizer) = setup(20);
        context.create_or_reset("conn-1");

        summarizer.update("conn-1", "an opening statement that overflows the limit");

        let summary = context.snapshot("conn-1").rolling_summary;
        assert!(summary.chars().count() <= 20);
        assert!(summary.ends_with("the limit"));
        // Cut lands on a word boundary, not mid-word.
        assert!(!summary.starts_with(' '));
    }

    #[test]
    fn test_blank_final_text_falls_back_to_window() {
        let (context, summarizer) = setup(2_000);
        context.create_or_reset("conn-1");
        context.register_final_transcript(
            "conn-1",
            &FinalTranscript {
                text: "window text".to_string(),
                offset_ms: 0,
                duration_ms: 100,
                facts: None,
            },
        );

        summarizer.update("conn-1", "   ");

        assert_eq!(context.snapshot("conn-1").rolling_summary, "window text");
    }

    #[test]
    fn test_nothing_to_summarize_leaves_summary_untouched() {
        let (context, summarizer) = setup(2_000);
        context.create_or_reset("conn-1");
        summarizer.update("conn-1", "  ");
        assert!(context.snapshot("conn-1").rolling_summary.is_empty());
    }
}
