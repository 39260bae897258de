use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::google::{response_json_or_error, GoogleEndpoint};
use crate::services::Retriever;

/// Vertex RAG Engine `retrieveContexts` over a single corpus.
#[derive(Debug, Clone)]
pub struct VertexRagRetriever {
    url: String,
    endpoint: GoogleEndpoint,
    corpus: String,
    http: HttpClient,
}

impl VertexRagRetriever {
    /// `None` unless `endpoint` is a Vertex endpoint.
    pub fn new(endpoint: GoogleEndpoint, corpus: impl Into<String>) -> Option<Self> {
        let url = endpoint.location_url("retrieveContexts")?;
        Some(Self {
            url,
            endpoint,
            corpus: corpus.into(),
            http: HttpClient::new(),
        })
    }

    pub fn request_payload(corpus: &str, query: &str, top_k: u32, threshold: f64) -> Value {
        json!({
            "vertexRagStore": {
                "ragResources": [{ "ragCorpus": corpus }],
                "vectorDistanceThreshold": threshold,
            },
            "query": {
                "text": query,
                "similarityTopK": top_k,
            },
        })
    }

    pub fn context_texts(payload: &Value) -> Vec<String> {
        payload
            .get("contexts")
            .and_then(|contexts| contexts.get("contexts"))
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row.get("text").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Retriever for VertexRagRetriever {
    fn retrieve(&self, query: &str, top_k: u32, similarity_threshold: f64) -> Result<Vec<String>> {
        tracing::debug!(target: "dearmind::rag", top_k, similarity_threshold, "retrieveContexts");
        let response = self
            .endpoint
            .authorize(self.http.post(&self.url))
            .json(&Self::request_payload(
                &self.corpus,
                query,
                top_k,
                similarity_threshold,
            ))
            .send()
            .context("RAG retrieval request failed")?;
        let payload = response_json_or_error("RAG", response)?;
        Ok(Self::context_texts(&payload))
    }
}

/// Stand-in when no corpus is configured: analysis runs without retrieved context.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetrieval;

impl Retriever for NoRetrieval {
    fn retrieve(&self, _query: &str, _top_k: u32, _threshold: f64) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
