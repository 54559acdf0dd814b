//! # PII Redaction
//!
//! Pure transform that masks detectable email-like and phone-like substrings
//! with fixed placeholder tokens before context leaves the process. The
//! sanitized copies are what the remote question client sends externally; the
//! originals never leave.

use crate::context::ContextSnapshot;
use crate::contracts::GenerateQuestionsOptions;
use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}").expect("valid email regex")
});

static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+\d{1,3}[\s-]?)?(?:\(\d{2,3}\)[\s-]?)?\d{3}[\s-]?\d{2,4}[\s-]?\d{2,4}")
        .expect("valid phone regex")
});

const EMAIL_TOKEN: &str = "<pii:email>";
const PHONE_TOKEN: &str = "<pii:phone>";

/// Replaces detected PII with placeholder tokens. When disabled, inputs pass
/// through untouched.
pub struct PiiRedactor {
    enabled: bool,
}

impl PiiRedactor {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Produce sanitized copies of a snapshot and options pair.
    pub fn redact(
        &self,
        snapshot: &ContextSnapshot,
        options: &GenerateQuestionsOptions,
    ) -> (ContextSnapshot, GenerateQuestionsOptions) {
        if !self.enabled {
            return (snapshot.clone(), options.clone());
        }

        let known_facts: Vec<(String, String)> = snapshot
            .known_facts
            .iter()
            .map(|(key, value)| (sanitize(key), sanitize(value)))
            .filter(|(key, value)| !key.trim().is_empty() && !value.trim().is_empty())
            .collect();

        let asked_recently: Vec<String> = snapshot
            .asked_recently
            .iter()
            .map(|q| sanitize(q).trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();

        let sanitized_snapshot = ContextSnapshot {
            rolling_summary: sanitize(&snapshot.rolling_summary),
            last_window: sanitize(&snapshot.last_window),
            known_facts,
            asked_recently,
        };

        let sanitized_options = GenerateQuestionsOptions {
            topic: options.topic.as_deref().map(sanitize),
            preferred_style: options.preferred_style.as_deref().map(sanitize),
            force_refresh: options.force_refresh,
        };

        (sanitized_snapshot, sanitized_options)
    }
}

fn sanitize(value: &str) -> String {
    let result = EMAIL.replace_all(value, EMAIL_TOKEN);
    PHONE.replace_all(&result, PHONE_TOKEN).into_owned()
}
