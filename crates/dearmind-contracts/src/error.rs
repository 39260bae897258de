//! Terminal failures surfaced by the generation pipelines.

use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Every variant is terminal for the request that produced it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Image input could not be decoded, or a drawing URL could not be fetched.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Image generation failed on every allowed attempt.
    #[error("Image generation failed after {attempts} attempts: {last_error}")]
    GenerationExhausted { attempts: u32, last_error: String },

    /// A single-attempt text or chat call failed.
    #[error("Model invocation failed: {0}")]
    Invocation(String),

    /// The generated image handle exposed no usable shape.
    #[error("Image adapter failed: {0}")]
    ImageAdapter(String),

    /// History or diary service answered with a failure (diary 404 excluded).
    #[error("{service} fetch failed{}: {message}", .status.map(|code| format!(" ({code})")).unwrap_or_default())]
    UpstreamFetch {
        service: String,
        status: Option<u16>,
        message: String,
    },

    /// A collaborator could not be constructed from the environment.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn upstream(service: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::UpstreamFetch {
            service: service.to_string(),
            status,
            message: message.into(),
        }
    }

    /// True when the caller sent something unusable rather than a dependency failing.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    /// Stable snake_case label used in event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::GenerationExhausted { .. } => "generation_exhausted",
            Self::Invocation(_) => "invocation",
            Self::ImageAdapter(_) => "image_adapter",
            Self::UpstreamFetch { .. } => "upstream_fetch",
            Self::Configuration(_) => "configuration",
        }
    }
}

/// Flattens an `anyhow` chain into one line, skipping repeated causes.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
