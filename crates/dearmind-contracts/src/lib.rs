pub mod analysis;
pub mod conversation;
pub mod error;
pub mod events;
pub mod generation;
pub mod models;
pub mod prompt;
pub mod reward;

pub use analysis::{AnalysisResult, Emotion, Severity};
pub use conversation::{ConversationTurn, Role};
pub use error::{PipelineError, PipelineResult};
pub use generation::{
    GenerationConfig, GenerationOutcome, HarmBlockThreshold, HarmCategory, ImageGenerationConfig,
    SafetySetting,
};
pub use prompt::{PromptBundle, PromptPart};
pub use reward::RewardResult;
