use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dearmind_contracts::{ImageGenerationConfig, PromptBundle};
use image::{DynamicImage, ImageFormat};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::google::{response_json_or_error, GoogleEndpoint};
use crate::image_adapter::{GeneratedImage, WrappedImage};
use crate::services::ImageGenerator;

/// Raw prediction bytes the client could not decode in memory. It can only
/// write itself to disk, which is what the adapter's file fallback expects.
#[derive(Debug, Clone)]
pub struct PredictionImage {
    pub bytes: Vec<u8>,
}

impl GeneratedImage for PredictionImage {
    fn can_save(&self) -> bool {
        true
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.bytes)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    fn describe(&self) -> &'static str {
        "imagen prediction"
    }
}

#[derive(Debug, Clone)]
struct ImageBytes {
    bytes: Vec<u8>,
    mime_type: Option<String>,
}

/// `:predict` client for Imagen models.
#[derive(Debug, Clone)]
pub struct ImagenClient {
    endpoint: GoogleEndpoint,
    http: HttpClient,
}

impl ImagenClient {
    pub fn new(endpoint: GoogleEndpoint) -> Self {
        Self {
            endpoint,
            http: HttpClient::new(),
        }
    }

    pub fn predict_payload(prompt: &str, config: &ImageGenerationConfig) -> Value {
        json!({
            "instances": [{
                "prompt": prompt,
            }],
            "parameters": {
                "sampleCount": config.number_of_images.max(1),
                "addWatermark": config.add_watermark,
            },
        })
    }

    fn extract_predictions(response_payload: &Value) -> Result<Vec<ImageBytes>> {
        let mut out = Vec::new();
        let predictions = response_payload
            .get("predictions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for row in predictions {
            let Some(obj) = row.as_object() else {
                continue;
            };
            if let Some(encoded) = obj
                .get("bytesBase64Encoded")
                .or_else(|| obj.get("bytes_base64_encoded"))
                .and_then(Value::as_str)
            {
                let bytes = BASE64
                    .decode(encoded.as_bytes())
                    .context("Imagen image base64 decode failed")?;
                out.push(ImageBytes {
                    bytes,
                    mime_type: obj
                        .get("mimeType")
                        .or_else(|| obj.get("mime_type"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                });
                continue;
            }

            let generated = obj
                .get("image")
                .and_then(Value::as_object)
                .or_else(|| obj.get("generatedImage").and_then(Value::as_object))
                .cloned()
                .unwrap_or_default();
            if let Some(encoded) = generated
                .get("imageBytes")
                .or_else(|| generated.get("bytesBase64Encoded"))
                .and_then(Value::as_str)
            {
                let bytes = BASE64
                    .decode(encoded.as_bytes())
                    .context("Imagen generated image base64 decode failed")?;
                out.push(ImageBytes {
                    bytes,
                    mime_type: generated
                        .get("mimeType")
                        .or_else(|| generated.get("mime_type"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                });
            }
        }
        Ok(out)
    }

    /// Decodes with the reported mime type when it names a known format,
    /// otherwise by sniffing the bytes.
    fn decode(item: &ImageBytes) -> image::ImageResult<DynamicImage> {
        match item
            .mime_type
            .as_deref()
            .and_then(ImageFormat::from_mime_type)
        {
            Some(format) => image::load_from_memory_with_format(&item.bytes, format),
            None => image::load_from_memory(&item.bytes),
        }
    }

    /// Decodable bytes become a wrapped image; anything else stays persist-only.
    fn into_handle(item: ImageBytes) -> Box<dyn GeneratedImage> {
        match Self::decode(&item) {
            Ok(decoded) => Box::new(WrappedImage {
                image: Some(decoded),
            }),
            Err(err) => {
                tracing::debug!(
                    target: "dearmind::imagen",
                    "prediction not decodable in memory ({err}); deferring to file round trip"
                );
                Box::new(PredictionImage { bytes: item.bytes })
            }
        }
    }
}

impl ImageGenerator for ImagenClient {
    fn generate_image(
        &self,
        bundle: &PromptBundle,
        config: &ImageGenerationConfig,
    ) -> Result<Box<dyn GeneratedImage>> {
        let prompt = bundle.joined_text();
        if prompt.trim().is_empty() {
            bail!("Imagen prompt is empty");
        }
        let url = self.endpoint.model_url(&config.model, "predict");
        tracing::debug!(
            target: "dearmind::imagen",
            model = %config.model,
            transport = self.endpoint.label(),
            "predict"
        );
        let response = self
            .endpoint
            .authorize(self.http.post(&url))
            .json(&Self::predict_payload(&prompt, config))
            .send()
            .with_context(|| format!("Imagen request failed ({})", config.model))?;
        let response_payload = response_json_or_error("Imagen", response)?;
        let Some(first) = Self::extract_predictions(&response_payload)?.into_iter().next() else {
            bail!("Imagen returned no images");
        };
        Ok(Self::into_handle(first))
    }
}
