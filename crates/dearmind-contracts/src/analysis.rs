use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Emotion {
    Happy,
    Gloomy,
    Anxious,
    Angry,
}

impl Emotion {
    /// Lowercase vocabulary the classification prompt asks the model for.
    pub const RAW_TOKENS: [&'static str; 4] = ["positive", "depressed", "anxious", "angry"];

    pub fn from_raw(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "positive" => Some(Self::Happy),
            "depressed" => Some(Self::Gloomy),
            "anxious" => Some(Self::Anxious),
            "angry" => Some(Self::Angry),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Happy => "HAPPY",
            Self::Gloomy => "GLOOMY",
            Self::Anxious => "ANXIOUS",
            Self::Angry => "ANGRY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Safe,
    Emergency,
}

impl Severity {
    pub const RAW_TOKENS: [&'static str; 2] = ["safe", "emergency"];

    pub fn from_raw(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "safe" => Some(Self::Safe),
            "emergency" => Some(Self::Emergency),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "SAFE",
            Self::Emergency => "EMERGENCY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub emotion: Emotion,
    pub severity: Severity,
}

impl AnalysisResult {
    pub fn new(emotion: Emotion, severity: Severity) -> Self {
        Self { emotion, severity }
    }
}

impl Default for AnalysisResult {
    fn default() -> Self {
        Self::new(Emotion::Happy, Severity::Safe)
    }
}
