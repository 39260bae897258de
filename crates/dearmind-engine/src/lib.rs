//! Generation orchestration core for DearMind: prompt assembly, model
//! invocation with retries, output normalization, image adaptation and
//! chat session context.

pub mod config;
pub mod image_adapter;
pub mod invoker;
pub mod normalizer;
pub mod pipelines;
pub mod prompts;
pub mod providers;
pub mod services;
pub mod session;

pub use config::EngineConfig;
pub use image_adapter::{encode_png, GeneratedImage, InlineImage, WrappedImage};
pub use invoker::{RetryPolicy, RetryingInvoker};
pub use normalizer::{extract_emotion_severity, ParseTier};
pub use pipelines::{Engine, EngineBuilder};
pub use services::{
    ChatModel, DiaryService, HistoryService, ImageFetcher, ImageGenerator, Retriever,
    TextGenerator,
};
pub use session::{ChatSession, SessionContext, SessionContextBuilder};
