use std::fmt;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dearmind_contracts::error::truncate_text;
use dearmind_contracts::{GenerationConfig, PromptBundle, PromptPart};
use reqwest::blocking::{RequestBuilder, Response as HttpResponse};
use serde_json::{json, Map, Value};

use crate::config::EngineConfig;

/// Where and how Google model calls are authorized.
#[derive(Clone, PartialEq, Eq)]
pub enum GoogleEndpoint {
    /// Generative Language API, `?key=` auth.
    ApiKey { api_base: String, api_key: String },
    /// Vertex AI, bearer access token.
    Vertex {
        project: String,
        region: String,
        access_token: String,
    },
}

impl fmt::Debug for GoogleEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey { api_base, .. } => f
                .debug_struct("ApiKey")
                .field("api_base", api_base)
                .field("api_key", &"<redacted>")
                .finish(),
            Self::Vertex {
                project, region, ..
            } => f
                .debug_struct("Vertex")
                .field("project", project)
                .field("region", region)
                .field("access_token", &"<redacted>")
                .finish(),
        }
    }
}

impl GoogleEndpoint {
    /// Vertex when fully configured, otherwise the API-key endpoint, otherwise nothing.
    pub fn from_config(config: &EngineConfig) -> Option<Self> {
        if let (Some(project), Some(access_token)) = (
            config.vertex_project.as_ref(),
            config.vertex_access_token.as_ref(),
        ) {
            return Some(Self::Vertex {
                project: project.clone(),
                region: config.vertex_region.clone(),
                access_token: access_token.clone(),
            });
        }
        config.gemini_api_key.as_ref().map(|api_key| Self::ApiKey {
            api_base: config.gemini_api_base.clone(),
            api_key: api_key.clone(),
        })
    }

    pub fn model_url(&self, model: &str, method: &str) -> String {
        let model = model.trim().trim_start_matches("models/");
        match self {
            Self::ApiKey { api_base, .. } => format!("{api_base}/models/{model}:{method}"),
            Self::Vertex {
                project, region, ..
            } => format!(
                "https://{region}-aiplatform.googleapis.com/v1/projects/{project}/locations/{region}/publishers/google/models/{model}:{method}"
            ),
        }
    }

    /// Location-scoped Vertex method such as `retrieveContexts`.
    pub fn location_url(&self, method: &str) -> Option<String> {
        match self {
            Self::ApiKey { .. } => None,
            Self::Vertex {
                project, region, ..
            } => Some(format!(
                "https://{region}-aiplatform.googleapis.com/v1beta1/projects/{project}/locations/{region}:{method}"
            )),
        }
    }

    pub fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self {
            Self::ApiKey { api_key, .. } => builder.query(&[("key", api_key)]),
            Self::Vertex { access_token, .. } => builder.bearer_auth(access_token),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ApiKey { .. } => "gemini-api",
            Self::Vertex { .. } => "vertex",
        }
    }
}

pub fn parts_json(bundle: &PromptBundle) -> Vec<Value> {
    bundle
        .parts()
        .iter()
        .map(|part| match part {
            PromptPart::Text(text) => json!({ "text": text }),
            PromptPart::InlineImage { mime_type, data } => json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": BASE64.encode(data),
                }
            }),
        })
        .collect()
}

pub fn generation_config_json(config: &GenerationConfig) -> Option<Value> {
    let mut out = Map::new();
    if let Some(max_output_tokens) = config.max_output_tokens {
        out.insert("maxOutputTokens".to_string(), json!(max_output_tokens));
    }
    if let Some(temperature) = config.temperature {
        out.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(top_p) = config.top_p {
        out.insert("topP".to_string(), json!(top_p));
    }
    if out.is_empty() {
        return None;
    }
    Some(Value::Object(out))
}

pub fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

/// Text of the first candidate, all text parts concatenated.
pub fn response_text(provider: &str, payload: &Value) -> Result<String> {
    let candidates = payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let Some(first) = candidates.first() else {
        let block_reason = payload
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReason"))
            .and_then(Value::as_str);
        if let Some(reason) = block_reason {
            bail!("{provider} blocked the prompt ({reason})");
        }
        bail!("{provider} returned no candidates");
    };
    let text = first
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<&str>>()
                .join("")
        })
        .unwrap_or_default();
    if text.trim().is_empty() {
        let finish_reason = first
            .get("finishReason")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        bail!("{provider} returned an empty candidate (finishReason={finish_reason})");
    }
    Ok(text)
}
