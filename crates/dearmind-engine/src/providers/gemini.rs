use anyhow::{Context, Result};
use dearmind_contracts::{ConversationTurn, GenerationConfig, PromptBundle};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use super::google::{
    generation_config_json, parts_json, response_json_or_error, response_text, GoogleEndpoint,
};
use crate::services::{ChatModel, TextGenerator};

/// `generateContent` client used for classification, letters and chat.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    endpoint: GoogleEndpoint,
    http: HttpClient,
}

impl GeminiClient {
    pub fn new(endpoint: GoogleEndpoint) -> Self {
        Self {
            endpoint,
            http: HttpClient::new(),
        }
    }

    fn post(&self, model: &str, payload: &Value) -> Result<String> {
        let url = self.endpoint.model_url(model, "generateContent");
        tracing::debug!(
            target: "dearmind::gemini",
            model,
            transport = self.endpoint.label(),
            "generateContent"
        );
        let response = self
            .endpoint
            .authorize(self.http.post(&url))
            .json(payload)
            .send()
            .with_context(|| format!("Gemini request failed ({model})"))?;
        let response_payload = response_json_or_error("Gemini", response)?;
        response_text("Gemini", &response_payload)
    }
}

fn base_payload(contents: Vec<Value>, config: &GenerationConfig) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("contents".to_string(), Value::Array(contents));
    if let Some(generation_config) = generation_config_json(config) {
        payload.insert("generationConfig".to_string(), generation_config);
    }
    if !config.safety_settings.is_empty() {
        payload.insert(
            "safetySettings".to_string(),
            serde_json::to_value(&config.safety_settings).unwrap_or(Value::Null),
        );
    }
    payload
}

pub fn generate_payload(bundle: &PromptBundle, config: &GenerationConfig) -> Value {
    Value::Object(base_payload(
        vec![json!({
            "role": "user",
            "parts": parts_json(bundle),
        })],
        config,
    ))
}

/// Prior turns in order, then the new user message.
pub fn chat_payload(
    system_instruction: &str,
    history: &[ConversationTurn],
    message: &str,
    config: &GenerationConfig,
) -> Value {
    let mut contents: Vec<Value> = history
        .iter()
        .map(|turn| {
            json!({
                "role": turn.role.as_str(),
                "parts": [{ "text": turn.content }],
            })
        })
        .collect();
    contents.push(json!({
        "role": "user",
        "parts": [{ "text": message }],
    }));
    let mut payload = base_payload(contents, config);
    if !system_instruction.trim().is_empty() {
        payload.insert(
            "systemInstruction".to_string(),
            json!({ "parts": [{ "text": system_instruction }] }),
        );
    }
    Value::Object(payload)
}

impl TextGenerator for GeminiClient {
    fn generate(
        &self,
        model: &str,
        bundle: &PromptBundle,
        config: &GenerationConfig,
    ) -> Result<String> {
        self.post(model, &generate_payload(bundle, config))
    }
}

impl ChatModel for GeminiClient {
    fn reply(
        &self,
        model: &str,
        system_instruction: &str,
        history: &[ConversationTurn],
        message: &str,
        config: &GenerationConfig,
    ) -> Result<String> {
        self.post(
            model,
            &chat_payload(system_instruction, history, message, config),
        )
    }
}
