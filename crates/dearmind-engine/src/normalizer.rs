//! Turns free-form classification output into a typed [`AnalysisResult`].
//!
//! The model is asked for `["emotion","severity"]` but does not always comply,
//! so extraction degrades through three tiers instead of failing the analysis:
//!
//! 1. a quoted two-element array anywhere in the text (ASCII case-insensitive)
//! 2. the first emotion keyword present, in vocabulary order, with severity
//!    `emergency` iff that word occurs anywhere
//! 3. `(positive, safe)`

use std::sync::OnceLock;

use dearmind_contracts::{AnalysisResult, Emotion, Severity};
use regex::Regex;

static CLASSIFICATION_ARRAY_REGEX: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseTier {
    Structured,
    Keyword,
    Default,
}

impl ParseTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Keyword => "keyword",
            Self::Default => "default",
        }
    }
}

fn classification_array_regex() -> &'static Regex {
    CLASSIFICATION_ARRAY_REGEX.get_or_init(|| {
        Regex::new(
            r#"(?i-u)\[\s*"(?P<emotion>positive|depressed|anxious|angry)"\s*,\s*"(?P<severity>safe|emergency)"\s*\]"#,
        )
        .expect("classification regex is valid")
    })
}

pub fn extract_emotion_severity(output: &str) -> AnalysisResult {
    extract_with_tier(output).0
}

/// Same as [`extract_emotion_severity`], also reporting which tier matched.
pub fn extract_with_tier(output: &str) -> (AnalysisResult, ParseTier) {
    let (raw_emotion, raw_severity, tier) = raw_tokens(output);
    // Both vocabularies are closed, so the lookups cannot miss; the defaults
    // only keep the mapping total.
    let emotion = Emotion::from_raw(&raw_emotion).unwrap_or(Emotion::Happy);
    let severity = Severity::from_raw(&raw_severity).unwrap_or(Severity::Safe);
    (AnalysisResult::new(emotion, severity), tier)
}

fn raw_tokens(output: &str) -> (String, String, ParseTier) {
    if let Some(captures) = classification_array_regex().captures(output) {
        return (
            captures["emotion"].to_ascii_lowercase(),
            captures["severity"].to_ascii_lowercase(),
            ParseTier::Structured,
        );
    }

    let lowered = output.to_lowercase();
    for keyword in Emotion::RAW_TOKENS {
        if lowered.contains(keyword) {
            let severity = if lowered.contains("emergency") {
                "emergency"
            } else {
                "safe"
            };
            return (keyword.to_string(), severity.to_string(), ParseTier::Keyword);
        }
    }

    ("positive".to_string(), "safe".to_string(), ParseTier::Default)
}
