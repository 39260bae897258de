use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HarmCategory {
    #[serde(rename = "HARM_CATEGORY_HATE_SPEECH")]
    HateSpeech,
    #[serde(rename = "HARM_CATEGORY_DANGEROUS_CONTENT")]
    DangerousContent,
    #[serde(rename = "HARM_CATEGORY_SEXUALLY_EXPLICIT")]
    SexuallyExplicit,
    #[serde(rename = "HARM_CATEGORY_HARASSMENT")]
    Harassment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmBlockThreshold {
    BlockLowAndAbove,
    BlockMediumAndAbove,
    BlockOnlyHigh,
    BlockNone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: HarmBlockThreshold,
}

impl SafetySetting {
    /// The four categories, each blocking medium probability and above.
    pub fn block_medium_and_above() -> Vec<SafetySetting> {
        [
            HarmCategory::HateSpeech,
            HarmCategory::DangerousContent,
            HarmCategory::SexuallyExplicit,
            HarmCategory::Harassment,
        ]
        .into_iter()
        .map(|category| SafetySetting {
            category,
            threshold: HarmBlockThreshold::BlockMediumAndAbove,
        })
        .collect()
    }
}

/// Sampling and safety knobs for a text generation call. `None` leaves the provider default.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenerationConfig {
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub safety_settings: Vec<SafetySetting>,
}

impl GenerationConfig {
    pub fn analysis() -> Self {
        Self {
            max_output_tokens: Some(8192),
            temperature: Some(1.0),
            top_p: Some(0.95),
            safety_settings: SafetySetting::block_medium_and_above(),
        }
    }

    pub fn letter() -> Self {
        Self {
            max_output_tokens: Some(150),
            temperature: Some(0.8),
            top_p: Some(0.9),
            safety_settings: SafetySetting::block_medium_and_above(),
        }
    }

    pub fn chat() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageGenerationConfig {
    pub model: String,
    pub number_of_images: u32,
    pub add_watermark: bool,
}

impl ImageGenerationConfig {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            number_of_images: 1,
            add_watermark: false,
        }
    }
}

/// Terminal result of invoking a generator, possibly after retries.
#[derive(Debug)]
pub enum GenerationOutcome<T> {
    Success(T),
    Failure {
        last_error: anyhow::Error,
        attempts: u32,
    },
}

impl<T> GenerationOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Failure becomes [`PipelineError::GenerationExhausted`].
    pub fn into_image_result(self) -> Result<T, PipelineError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure {
                last_error,
                attempts,
            } => Err(PipelineError::GenerationExhausted {
                attempts,
                last_error: crate::error::error_chain_text(&last_error, 1024),
            }),
        }
    }

    /// Failure becomes [`PipelineError::Invocation`].
    pub fn into_invocation_result(self) -> Result<T, PipelineError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure { last_error, .. } => Err(PipelineError::Invocation(
                crate::error::error_chain_text(&last_error, 1024),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn safety_settings_serialize_to_wire_names() -> anyhow::Result<()> {
        let settings = SafetySetting::block_medium_and_above();
        assert_eq!(settings.len(), 4);
        let encoded = serde_json::to_value(&settings[0])?;
        assert_eq!(
            encoded,
            json!({
                "category": "HARM_CATEGORY_HATE_SPEECH",
                "threshold": "BLOCK_MEDIUM_AND_ABOVE",
            })
        );
        Ok(())
    }

    #[test]
    fn presets_match_pipeline_budgets() {
        let analysis = GenerationConfig::analysis();
        assert_eq!(analysis.max_output_tokens, Some(8192));
        assert_eq!(analysis.top_p, Some(0.95));

        let letter = GenerationConfig::letter();
        assert_eq!(letter.max_output_tokens, Some(150));
        assert_eq!(letter.temperature, Some(0.8));

        let chat = GenerationConfig::chat();
        assert!(chat.max_output_tokens.is_none());
        assert!(chat.safety_settings.is_empty());
    }

    #[test]
    fn failure_maps_to_the_matching_error_variant() {
        let exhausted: GenerationOutcome<()> = GenerationOutcome::Failure {
            last_error: anyhow::anyhow!("quota exceeded"),
            attempts: 3,
        };
        assert_eq!(
            exhausted.into_image_result().unwrap_err(),
            PipelineError::GenerationExhausted {
                attempts: 3,
                last_error: "quota exceeded".to_string(),
            }
        );

        let single: GenerationOutcome<()> = GenerationOutcome::Failure {
            last_error: anyhow::anyhow!("blocked"),
            attempts: 1,
        };
        assert_eq!(
            single.into_invocation_result().unwrap_err(),
            PipelineError::Invocation("blocked".to_string())
        );
    }
}
