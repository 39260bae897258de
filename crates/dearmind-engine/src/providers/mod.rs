//! HTTP-backed implementations of the collaborator traits.

pub mod fetch;
pub mod gemini;
pub mod google;
pub mod imagen;
pub mod rag;

pub use fetch::HttpImageFetcher;
pub use gemini::GeminiClient;
pub use google::GoogleEndpoint;
pub use imagen::{ImagenClient, PredictionImage};
pub use rag::{NoRetrieval, VertexRagRetriever};
