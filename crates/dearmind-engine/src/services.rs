//! Collaborator seams consumed by the pipelines.
//!
//! Implementations are constructed once per process and shared read-only;
//! tests substitute fakes.

use anyhow::Result;
use chrono::NaiveDate;
use dearmind_contracts::{
    ConversationTurn, GenerationConfig, ImageGenerationConfig, PipelineResult, PromptBundle,
};

use crate::image_adapter::GeneratedImage;

/// Text (and vision) generation: one prompt in, raw model text out.
pub trait TextGenerator: Send + Sync {
    fn generate(
        &self,
        model: &str,
        bundle: &PromptBundle,
        config: &GenerationConfig,
    ) -> Result<String>;
}

/// Image generation returning a handle of provider-specific shape.
pub trait ImageGenerator: Send + Sync {
    fn generate_image(
        &self,
        bundle: &PromptBundle,
        config: &ImageGenerationConfig,
    ) -> Result<Box<dyn GeneratedImage>>;
}

/// Multi-turn chat. The system instruction and history are fixed for a session;
/// each call contributes one new user message.
pub trait ChatModel: Send + Sync {
    fn reply(
        &self,
        model: &str,
        system_instruction: &str,
        history: &[ConversationTurn],
        message: &str,
        config: &GenerationConfig,
    ) -> Result<String>;
}

/// Document index used to ground the analysis prompt.
pub trait Retriever: Send + Sync {
    fn retrieve(&self, query: &str, top_k: u32, similarity_threshold: f64) -> Result<Vec<String>>;
}

pub trait HistoryService: Send + Sync {
    fn fetch_history(&self, credential: &str) -> PipelineResult<Vec<ConversationTurn>>;
}

pub trait DiaryService: Send + Sync {
    /// Entries for `date`, or for the caller's current date when `None`.
    fn fetch_entries_for_date(
        &self,
        credential: &str,
        date: Option<NaiveDate>,
    ) -> PipelineResult<Vec<String>>;
}

/// Downloads user drawings referenced by URL.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}
