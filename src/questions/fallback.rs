//! # Fallback Question Generator
//!
//! Deterministic local question synthesis used when the remote generator is
//! unavailable or returns nothing. Renders fixed goal/ownership/timeline/
//! scope/risk templates around a focus phrase extracted from the context.

use crate::context::ContextSnapshot;
use crate::contracts::{GenerateQuestionsOptions, QuestionItem};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Question templates with their tags. `{}` is replaced by the focus phrase.
const TEMPLATES: [(&str, &str); 5] = [
    ("What is the primary goal for {}?", "goal"),
    ("Who is responsible for delivering {}?", "ownership"),
    ("When do we expect key milestones for {}?", "timeline"),
    ("Where will {} have the biggest impact?", "scope"),
    ("How will we mitigate the main risks around {}?", "risk"),
];

/// Longest focus phrase taken from a leading sentence before elision.
const MAX_FOCUS_CHARS: usize = 120;

static SENTENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^.!?]+[.!?]").expect("valid sentence regex"));

pub struct FallbackGenerator {
    question_count: usize,
}

impl FallbackGenerator {
    pub fn new(question_count: usize) -> Self {
        Self { question_count }
    }

    /// Render up to the configured number of template questions, skipping any
    /// whose text case-insensitively matches an already-asked question.
    pub fn generate(
        &self,
        snapshot: &ContextSnapshot,
        options: &GenerateQuestionsOptions,
    ) -> Vec<QuestionItem> {
        let focus = determine_focus(snapshot, options);
        let asked: HashSet<String> = snapshot
            .asked_recently
            .iter()
            .map(|q| q.to_lowercase())
            .collect();

        let mut results = Vec::new();
        for (template, tag) in TEMPLATES {
            let text = template.replacen("{}", &focus, 1);
            if asked.contains(&text.to_lowercase()) {
                continue;
            }

            results.push(QuestionItem {
                text,
                tags: Some(vec![tag.to_string()]),
                confidence: Some(0.2),
                novelty: Some(0.1),
            });
            if results.len() >= self.question_count {
                break;
            }
        }

        results
    }
}

/// Focus phrase precedence: explicit topic, leading sentence of the rolling
/// summary, leading sentence of the window text, first known fact, generic.
fn determine_focus(snapshot: &ContextSnapshot, options: &GenerateQuestionsOptions) -> String {
    if let Some(topic) = options.topic.as_deref() {
        if !topic.trim().is_empty() {
            return topic.trim().to_string();
        }
    }

    if !snapshot.rolling_summary.trim().is_empty() {
        let sentence = leading_sentence(&snapshot.rolling_summary);
        if !sentence.trim().is_empty() {
            return sentence.trim().to_string();
        }
    }

    if !snapshot.last_window.trim().is_empty() {
        let sentence = leading_sentence(&snapshot.last_window);
        if !sentence.trim().is_empty() {
            return sentence.trim().to_string();
        }
    }

    if let Some((key, value)) = snapshot.known_facts.first() {
        return format!("the detail '{}: {}'", key, value);
    }

    "this discussion".to_string()
}

/// First sentence ending in `.`, `!` or `?`, elided past 120 characters.
/// Text without sentence punctuation is used (and elided) as-is.
fn leading_sentence(text: &str) -> String {
    if let Some(found) = SENTENCE.find(text) {
        return elide(found.as_str());
    }

    elide(text)
}

fn elide(text: &str) -> String {
    match text.char_indices().nth(MAX_FOCUS_CHARS) {
        Some((byte_index, _)) => format!("{}…", text[..byte_index].trim()),
        None => text.to_string(),
    }
}
