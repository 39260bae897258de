use std::env;
use std::time::Duration;

use crate::invoker::RetryPolicy;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_VERTEX_REGION: &str = "us-central1";
pub const DEFAULT_HISTORY_URL: &str = "https://dearmind-be.onrender.com/chat/history";
pub const DEFAULT_DIARY_URL: &str = "https://dearmind-be.onrender.com/diary/by-date";

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub gemini_api_base: String,
    pub gemini_api_key: Option<String>,
    pub vertex_project: Option<String>,
    pub vertex_region: String,
    pub vertex_access_token: Option<String>,
    pub rag_corpus: Option<String>,
    pub history_url: String,
    pub diary_url: String,
    pub analysis_model: Option<String>,
    pub letter_model: Option<String>,
    pub chat_model: Option<String>,
    /// Timeout for history, diary and drawing-URL fetches.
    pub fetch_timeout: Duration,
    pub image_retry: RetryPolicy,
    pub retrieval_top_k: u32,
    pub retrieval_threshold: f64,
    /// Whether today's diary entries are folded into the chat system context.
    pub chat_includes_diary: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gemini_api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            gemini_api_key: None,
            vertex_project: None,
            vertex_region: DEFAULT_VERTEX_REGION.to_string(),
            vertex_access_token: None,
            rag_corpus: None,
            history_url: DEFAULT_HISTORY_URL.to_string(),
            diary_url: DEFAULT_DIARY_URL.to_string(),
            analysis_model: None,
            letter_model: None,
            chat_model: None,
            fetch_timeout: Duration::from_secs(5),
            image_retry: RetryPolicy::image_generation(),
            retrieval_top_k: 5,
            retrieval_threshold: 0.5,
            chat_includes_diary: true,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| -> Option<String> {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let image_retry = match get("DEARMIND_IMAGE_RETRY_ATTEMPTS").and_then(|raw| raw.parse().ok())
        {
            Some(attempts) => RetryPolicy::fixed(attempts, defaults.image_retry.delay),
            None => defaults.image_retry,
        };

        Self {
            gemini_api_base: get("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.gemini_api_base),
            gemini_api_key: get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY")),
            vertex_project: get("DEARMIND_VERTEX_PROJECT")
                .or_else(|| get("GOOGLE_CLOUD_PROJECT")),
            vertex_region: get("DEARMIND_VERTEX_REGION").unwrap_or(defaults.vertex_region),
            vertex_access_token: get("DEARMIND_VERTEX_ACCESS_TOKEN"),
            rag_corpus: get("DEARMIND_RAG_CORPUS"),
            history_url: get("DEARMIND_HISTORY_URL").unwrap_or(defaults.history_url),
            diary_url: get("DEARMIND_DIARY_URL").unwrap_or(defaults.diary_url),
            analysis_model: get("DEARMIND_ANALYSIS_MODEL"),
            letter_model: get("DEARMIND_LETTER_MODEL"),
            chat_model: get("DEARMIND_CHAT_MODEL"),
            fetch_timeout: get("DEARMIND_FETCH_TIMEOUT_SECS")
                .and_then(|raw| raw.parse::<f64>().ok())
                .filter(|secs| *secs > 0.0)
                .map(Duration::from_secs_f64)
                .unwrap_or(defaults.fetch_timeout),
            image_retry,
            retrieval_top_k: defaults.retrieval_top_k,
            retrieval_threshold: defaults.retrieval_threshold,
            chat_includes_diary: get("DEARMIND_CHAT_INCLUDE_DIARY")
                .map(|raw| !matches!(raw.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(defaults.chat_includes_diary),
        }
    }
}
