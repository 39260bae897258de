//! The analysis, reward and chat pipelines.
//!
//! An [`Engine`] is built once per process from injected collaborators and
//! shared across requests. Every error a pipeline returns is terminal for
//! that request.

use std::sync::Arc;

use dearmind_contracts::error::error_chain_text;
use dearmind_contracts::events::{EventPayload, EventWriter, RequestEvents};
use dearmind_contracts::models::{
    ModelRegistry, ModelSelector, CAP_CHAT, CAP_IMAGE, CAP_VISION,
};
use dearmind_contracts::{
    AnalysisResult, GenerationConfig, ImageGenerationConfig, PipelineError, PipelineResult,
    RewardResult,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::image_adapter::encode_png;
use crate::invoker::{RetryPolicy, RetryingInvoker};
use crate::normalizer::extract_with_tier;
use crate::prompts::{
    analysis_prompt, analysis_retrieval_query, decode_base64_image, load_user_images,
    reward_image_prompt, reward_letter_prompt, CHAT_GREETING,
};
use crate::providers::{
    GeminiClient, GoogleEndpoint, HttpImageFetcher, ImagenClient, NoRetrieval, VertexRagRetriever,
};
use crate::services::{
    ChatModel, DiaryService, HistoryService, ImageFetcher, ImageGenerator, Retriever,
    TextGenerator,
};
use crate::session::{ChatSession, HttpSessionStore, SessionContextBuilder};

/// Letters come from the newer flash model even though the registry's first
/// vision model is the analysis default.
pub const DEFAULT_LETTER_MODEL: &str = "gemini-2.0-flash";

fn event_payload(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    }
}

pub struct Engine {
    text: Arc<dyn TextGenerator>,
    images: Arc<dyn ImageGenerator>,
    chat: Arc<dyn ChatModel>,
    retriever: Arc<dyn Retriever>,
    history: Arc<dyn HistoryService>,
    diary: Arc<dyn DiaryService>,
    fetcher: Arc<dyn ImageFetcher>,
    registry: ModelRegistry,
    analysis_model: String,
    letter_model: String,
    chat_model: String,
    image_retry: RetryPolicy,
    retrieval_top_k: u32,
    retrieval_threshold: f64,
    chat_includes_diary: bool,
    events: Option<EventWriter>,
}

/// Collects collaborators for an [`Engine`]. Text, image and chat generators
/// are required; the rest default to the HTTP implementations.
pub struct EngineBuilder {
    config: EngineConfig,
    registry: ModelRegistry,
    text: Option<Arc<dyn TextGenerator>>,
    images: Option<Arc<dyn ImageGenerator>>,
    chat: Option<Arc<dyn ChatModel>>,
    retriever: Option<Arc<dyn Retriever>>,
    history: Option<Arc<dyn HistoryService>>,
    diary: Option<Arc<dyn DiaryService>>,
    fetcher: Option<Arc<dyn ImageFetcher>>,
    events: Option<EventWriter>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: ModelRegistry::default(),
            text: None,
            images: None,
            chat: None,
            retriever: None,
            history: None,
            diary: None,
            fetcher: None,
            events: None,
        }
    }

    pub fn registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn text_generator(mut self, text: Arc<dyn TextGenerator>) -> Self {
        self.text = Some(text);
        self
    }

    pub fn image_generator(mut self, images: Arc<dyn ImageGenerator>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn chat_model(mut self, chat: Arc<dyn ChatModel>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn history_service(mut self, history: Arc<dyn HistoryService>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn diary_service(mut self, diary: Arc<dyn DiaryService>) -> Self {
        self.diary = Some(diary);
        self
    }

    pub fn image_fetcher(mut self, fetcher: Arc<dyn ImageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn events(mut self, events: Option<EventWriter>) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> PipelineResult<Engine> {
        let missing = |name: &str| {
            PipelineError::Configuration(format!("engine requires a {name}"))
        };
        let text = self.text.ok_or_else(|| missing("text generator"))?;
        let images = self.images.ok_or_else(|| missing("image generator"))?;
        let chat = self.chat.ok_or_else(|| missing("chat model"))?;

        let selector = ModelSelector::new(Some(self.registry.clone()));
        let resolve = |requested: Option<&str>, capability: &str| -> PipelineResult<String> {
            let selection = selector
                .select(requested, capability)
                .map_err(PipelineError::Configuration)?;
            if let Some(reason) = selection.fallback_reason.as_deref() {
                tracing::warn!(
                    target: "dearmind::engine",
                    model = %selection.model.name,
                    "{reason} Falling back."
                );
            }
            Ok(selection.model.name)
        };
        let analysis_model = resolve(self.config.analysis_model.as_deref(), CAP_VISION)?;
        let letter_model = resolve(
            Some(
                self.config
                    .letter_model
                    .as_deref()
                    .unwrap_or(DEFAULT_LETTER_MODEL),
            ),
            CAP_VISION,
        )?;
        let chat_model = resolve(self.config.chat_model.as_deref(), CAP_CHAT)?;
        if self.registry.by_capability(CAP_IMAGE).is_empty() {
            return Err(PipelineError::Configuration(
                "no image models registered".to_string(),
            ));
        }

        let store = Arc::new(HttpSessionStore::from_config(&self.config));
        let history = self
            .history
            .unwrap_or_else(|| store.clone() as Arc<dyn HistoryService>);
        let diary = self.diary.unwrap_or_else(|| store as Arc<dyn DiaryService>);
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| {
                Arc::new(HttpImageFetcher::new(self.config.fetch_timeout)) as Arc<dyn ImageFetcher>
            });
        let retriever = self
            .retriever
            .unwrap_or_else(|| Arc::new(NoRetrieval) as Arc<dyn Retriever>);

        Ok(Engine {
            text,
            images,
            chat,
            retriever,
            history,
            diary,
            fetcher,
            registry: self.registry,
            analysis_model,
            letter_model,
            chat_model,
            image_retry: self.config.image_retry,
            retrieval_top_k: self.config.retrieval_top_k,
            retrieval_threshold: self.config.retrieval_threshold,
            chat_includes_diary: self.config.chat_includes_diary,
            events: self.events,
        })
    }
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Wires the Google-backed collaborators described by `config`.
    pub fn from_config(config: &EngineConfig, events: Option<EventWriter>) -> PipelineResult<Self> {
        let endpoint = GoogleEndpoint::from_config(config).ok_or_else(|| {
            PipelineError::Configuration(
                "set GEMINI_API_KEY, or DEARMIND_VERTEX_PROJECT with DEARMIND_VERTEX_ACCESS_TOKEN"
                    .to_string(),
            )
        })?;
        tracing::info!(target: "dearmind::engine", transport = endpoint.label(), "engine configured");
        let gemini = Arc::new(GeminiClient::new(endpoint.clone()));
        let retriever: Arc<dyn Retriever> = match config
            .rag_corpus
            .as_deref()
            .and_then(|corpus| VertexRagRetriever::new(endpoint.clone(), corpus))
        {
            Some(rag) => Arc::new(rag),
            None => {
                tracing::info!(
                    target: "dearmind::engine",
                    "no RAG corpus on a Vertex endpoint; analysis runs without retrieved context"
                );
                Arc::new(NoRetrieval)
            }
        };
        EngineBuilder::new(config.clone())
            .text_generator(gemini.clone())
            .chat_model(gemini)
            .image_generator(Arc::new(ImagenClient::new(endpoint)))
            .retriever(retriever)
            .events(events)
            .build()
    }

    pub fn analysis_model(&self) -> &str {
        &self.analysis_model
    }

    pub fn letter_model(&self) -> &str {
        &self.letter_model
    }

    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    fn request(&self, pipeline: &'static str) -> RequestEvents {
        RequestEvents::new(self.events.clone(), Uuid::new_v4().to_string(), pipeline)
    }

    fn finish<T>(&self, events: &RequestEvents, result: PipelineResult<T>) -> PipelineResult<T> {
        if let Err(err) = &result {
            tracing::warn!(
                target: "dearmind::engine",
                pipeline = events.pipeline(),
                request_id = events.request_id(),
                kind = err.kind(),
                "pipeline failed: {err}"
            );
            events.emit(
                "pipeline_failed",
                event_payload(json!({
                    "error_kind": err.kind(),
                    "error": err.to_string(),
                })),
            );
        }
        result
    }

    /// Classifies a drawing (base64) with optional accompanying writing.
    pub fn analyze(
        &self,
        image_b64: &str,
        subject: &str,
        text: Option<&str>,
    ) -> PipelineResult<AnalysisResult> {
        let events = self.request("analysis");
        let result = self.run_analysis(&events, image_b64, subject, text);
        self.finish(&events, result)
    }

    fn run_analysis(
        &self,
        events: &RequestEvents,
        image_b64: &str,
        subject: &str,
        text: Option<&str>,
    ) -> PipelineResult<AnalysisResult> {
        let image = decode_base64_image(image_b64)?;
        let query = analysis_retrieval_query(subject);
        let snippets = self
            .retriever
            .retrieve(&query, self.retrieval_top_k, self.retrieval_threshold)
            .map_err(|err| {
                PipelineError::Invocation(format!(
                    "retrieval failed: {}",
                    error_chain_text(&err, 1024)
                ))
            })?;
        let retrieved = snippets.join(" ");
        let bundle = analysis_prompt(subject, image, text, &retrieved);
        let config = GenerationConfig::analysis();

        let raw = RetryingInvoker::new("analysis", RetryPolicy::single_attempt())
            .invoke(
                |_| self.text.generate(&self.analysis_model, &bundle, &config),
                |_, _| {},
            )
            .into_invocation_result()?;
        let (result, tier) = extract_with_tier(&raw);
        tracing::info!(
            target: "dearmind::engine",
            request_id = events.request_id(),
            emotion = result.emotion.as_str(),
            severity = result.severity.as_str(),
            tier = tier.as_str(),
            "analysis completed"
        );
        events.emit(
            "analysis_completed",
            event_payload(json!({
                "model": self.analysis_model,
                "emotion": result.emotion,
                "severity": result.severity,
                "parse_tier": tier.as_str(),
                "retrieved_snippets": snippets.len(),
            })),
        );
        Ok(result)
    }

    /// Generates a reward painting for `art_style` and a letter about the
    /// user's drawings and diary entries.
    pub fn reward(
        &self,
        images: &[String],
        art_style: &str,
        diaries: Option<&[String]>,
    ) -> PipelineResult<RewardResult> {
        let events = self.request("reward");
        let result = self.run_reward(&events, images, art_style, diaries.unwrap_or(&[]));
        self.finish(&events, result)
    }

    fn run_reward(
        &self,
        events: &RequestEvents,
        images: &[String],
        art_style: &str,
        diaries: &[String],
    ) -> PipelineResult<RewardResult> {
        let image_model = self
            .registry
            .image_model_for_style(art_style)
            .ok_or_else(|| PipelineError::Configuration("no image models registered".to_string()))?;
        let image_config = ImageGenerationConfig::for_model(&image_model.name);
        let image_bundle = reward_image_prompt(art_style, diaries);

        let invoker = RetryingInvoker::new("reward_image", self.image_retry);
        let handle = invoker
            .invoke(
                |_| self.images.generate_image(&image_bundle, &image_config),
                |attempt, err| {
                    events.emit(
                        "generation_retry",
                        event_payload(json!({
                            "model": image_config.model,
                            "attempt": attempt,
                            "max_attempts": invoker.policy().max_attempts,
                            "error": error_chain_text(err, 512),
                        })),
                    );
                },
            )
            .into_image_result()?;
        let png = encode_png(handle.as_ref())?;

        let drawings = load_user_images(images, self.fetcher.as_ref())?;
        let drawing_count = drawings.len();
        let letter_bundle = reward_letter_prompt(diaries, drawings);
        let letter_config = GenerationConfig::letter();
        let letter = RetryingInvoker::new("reward_letter", RetryPolicy::single_attempt())
            .invoke(
                |_| {
                    self.text
                        .generate(&self.letter_model, &letter_bundle, &letter_config)
                },
                |_, _| {},
            )
            .into_invocation_result()?;
        let letter = letter.trim().to_string();

        tracing::info!(
            target: "dearmind::engine",
            request_id = events.request_id(),
            image_model = %image_model.name,
            png_bytes = png.len(),
            "reward completed"
        );
        events.emit(
            "reward_completed",
            event_payload(json!({
                "image_model": image_model.name,
                "letter_model": self.letter_model,
                "art_style": art_style,
                "drawings": drawing_count,
                "diaries": diaries.len(),
                "png_bytes": png.len(),
            })),
        );
        Ok(RewardResult { image: png, letter })
    }

    /// Replies to `message` in the context of the user's stored history and
    /// today's diary.
    pub fn chat(&self, message: &str, credential: &str) -> PipelineResult<String> {
        let events = self.request("chat");
        let result = self.run_chat(&events, message, credential);
        self.finish(&events, result)
    }

    fn run_chat(
        &self,
        events: &RequestEvents,
        message: &str,
        credential: &str,
    ) -> PipelineResult<String> {
        let context = SessionContextBuilder::new(self.history.clone(), self.diary.clone())
            .include_diary(self.chat_includes_diary)
            .build(credential)?;
        let history_turns = context.history.len();
        let diary_entries = context.diary_entries.len();
        let mut session = ChatSession::create(&self.chat_model, context);
        let reply = session.send_message(self.chat.as_ref(), message)?;

        tracing::info!(
            target: "dearmind::engine",
            request_id = events.request_id(),
            history_turns,
            diary_entries,
            "chat replied"
        );
        events.emit(
            "chat_replied",
            event_payload(json!({
                "model": self.chat_model,
                "history_turns": history_turns,
                "diary_entries": diary_entries,
            })),
        );
        Ok(reply)
    }

    /// Greeting shown when a chat view opens. Needs no collaborators, so it
    /// is available before an engine can be configured.
    pub fn initial_greeting() -> &'static str {
        CHAT_GREETING
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::{anyhow, bail};
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use chrono::NaiveDate;
    use dearmind_contracts::{ConversationTurn, Emotion, PromptBundle, Severity};
    use image::{DynamicImage, ImageFormat, RgbImage};

    use super::*;
    use crate::image_adapter::{GeneratedImage, InlineImage};
    use crate::prompts::CHAT_PERSONA;

    #[derive(Default)]
    struct FakeText {
        replies: Mutex<Vec<anyhow::Result<String>>>,
        calls: Mutex<Vec<(String, PromptBundle, GenerationConfig)>>,
    }

    impl FakeText {
        fn replying(replies: Vec<anyhow::Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl TextGenerator for FakeText {
        fn generate(
            &self,
            model: &str,
            bundle: &PromptBundle,
            config: &GenerationConfig,
        ) -> anyhow::Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((model.to_string(), bundle.clone(), config.clone()));
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                bail!("no scripted reply");
            }
            replies.remove(0)
        }
    }

    struct FakeImages {
        failures_before_success: Mutex<u32>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeImages {
        fn failing(times: u32) -> Arc<Self> {
            Arc::new(Self {
                failures_before_success: Mutex::new(times),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl ImageGenerator for FakeImages {
        fn generate_image(
            &self,
            _bundle: &PromptBundle,
            config: &ImageGenerationConfig,
        ) -> anyhow::Result<Box<dyn GeneratedImage>> {
            self.calls.lock().unwrap().push(config.model.clone());
            let mut remaining = self.failures_before_success.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(anyhow!("quota exceeded"));
            }
            Ok(Box::new(InlineImage(DynamicImage::ImageRgb8(RgbImage::new(3, 3)))))
        }
    }

    #[derive(Default)]
    struct FakeChat {
        calls: Mutex<Vec<(String, String, Vec<ConversationTurn>, String)>>,
    }

    impl ChatModel for FakeChat {
        fn reply(
            &self,
            model: &str,
            system_instruction: &str,
            history: &[ConversationTurn],
            message: &str,
            _config: &GenerationConfig,
        ) -> anyhow::Result<String> {
            self.calls.lock().unwrap().push((
                model.to_string(),
                system_instruction.to_string(),
                history.to_vec(),
                message.to_string(),
            ));
            Ok("That sounds like a lot. Want to tell me more?".to_string())
        }
    }

    struct FakeRetriever(Vec<String>);

    impl Retriever for FakeRetriever {
        fn retrieve(&self, _query: &str, top_k: u32, threshold: f64) -> anyhow::Result<Vec<String>> {
            assert_eq!(top_k, 5);
            assert_eq!(threshold, 0.5);
            Ok(self.0.clone())
        }
    }

    struct FakeStore {
        history: Vec<ConversationTurn>,
        diary: PipelineResult<Vec<String>>,
    }

    impl HistoryService for FakeStore {
        fn fetch_history(&self, credential: &str) -> PipelineResult<Vec<ConversationTurn>> {
            assert_eq!(credential, "token-1");
            Ok(self.history.clone())
        }
    }

    impl DiaryService for FakeStore {
        fn fetch_entries_for_date(
            &self,
            _credential: &str,
            _date: Option<NaiveDate>,
        ) -> PipelineResult<Vec<String>> {
            self.diary.clone()
        }
    }

    struct FakeFetcher;

    impl ImageFetcher for FakeFetcher {
        fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
            if url.contains("missing") {
                bail!("image download failed ({url}): HTTP 404");
            }
            Ok(vec![9, 9])
        }
    }

    fn png_b64() -> String {
        let mut buffer = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(2, 2))
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        BASE64.encode(buffer.into_inner())
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            image_retry: RetryPolicy::fixed(3, Duration::ZERO),
            ..EngineConfig::default()
        }
    }

    fn store(history: Vec<ConversationTurn>, diary: Vec<String>) -> Arc<FakeStore> {
        Arc::new(FakeStore {
            history,
            diary: Ok(diary),
        })
    }

    fn engine(
        text: Arc<FakeText>,
        images: Arc<FakeImages>,
        chat: Arc<FakeChat>,
        store: Arc<FakeStore>,
        events: Option<EventWriter>,
    ) -> Engine {
        Engine::builder(fast_config())
            .text_generator(text)
            .image_generator(images)
            .chat_model(chat)
            .retriever(Arc::new(FakeRetriever(vec![
                "Dark colors can signal low mood.".to_string(),
                "Small figures may suggest withdrawal.".to_string(),
            ])))
            .history_service(store.clone())
            .diary_service(store)
            .image_fetcher(Arc::new(FakeFetcher))
            .events(events)
            .build()
            .unwrap()
    }

    #[test]
    fn builder_requires_generators_and_resolves_default_models() {
        let missing = Engine::builder(EngineConfig::default()).build();
        assert!(matches!(missing, Err(PipelineError::Configuration(_))));

        let engine = engine(
            FakeText::replying(Vec::new()),
            FakeImages::failing(0),
            Arc::new(FakeChat::default()),
            store(Vec::new(), Vec::new()),
            None,
        );
        assert_eq!(engine.analysis_model(), "gemini-1.5-flash-002");
        assert_eq!(engine.letter_model(), "gemini-2.0-flash");
        assert_eq!(engine.chat_model(), "gemini-2.0-flash");
        assert_eq!(Engine::initial_greeting(), CHAT_GREETING);
    }

    #[test]
    fn from_config_without_credentials_is_a_configuration_error() {
        assert!(matches!(
            Engine::from_config(&EngineConfig::default(), None),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn analyze_normalizes_reply_and_sends_retrieved_context() {
        let text = FakeText::replying(vec![Ok("```json\n[\"depressed\",\"safe\"]\n```".to_string())]);
        let engine = engine(
            text.clone(),
            FakeImages::failing(0),
            Arc::new(FakeChat::default()),
            store(Vec::new(), Vec::new()),
            None,
        );

        let result = engine
            .analyze(&png_b64(), "a house in the rain", Some("I stayed in all day"))
            .unwrap();
        assert_eq!(result, AnalysisResult::new(Emotion::Gloomy, Severity::Safe));

        let calls = text.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (model, bundle, config) = &calls[0];
        assert_eq!(model, "gemini-1.5-flash-002");
        assert_eq!(config, &GenerationConfig::analysis());
        let instruction = bundle.parts()[0].as_text().unwrap();
        assert!(instruction.contains(
            "Dark colors can signal low mood. Small figures may suggest withdrawal."
        ));
        assert_eq!(bundle.parts()[2].as_text(), Some("I stayed in all day"));
    }

    #[test]
    fn analyze_defaults_on_unparseable_reply() {
        let engine = engine(
            FakeText::replying(vec![Ok("I cannot determine this.".to_string())]),
            FakeImages::failing(0),
            Arc::new(FakeChat::default()),
            store(Vec::new(), Vec::new()),
            None,
        );
        let result = engine.analyze(&png_b64(), "a tree", None).unwrap();
        assert_eq!(result, AnalysisResult::default());
    }

    #[test]
    fn analyze_rejects_bad_image_without_calling_model() {
        let text = FakeText::replying(Vec::new());
        let engine = engine(
            text.clone(),
            FakeImages::failing(0),
            Arc::new(FakeChat::default()),
            store(Vec::new(), Vec::new()),
            None,
        );
        let err = engine.analyze("%%%", "a tree", None).unwrap_err();
        assert!(err.is_client_error());
        assert!(text.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn analyze_does_not_retry_text_failures() {
        let text = FakeText::replying(vec![
            Err(anyhow!("503 overloaded")),
            Ok("[\"angry\",\"safe\"]".to_string()),
        ]);
        let engine = engine(
            text.clone(),
            FakeImages::failing(0),
            Arc::new(FakeChat::default()),
            store(Vec::new(), Vec::new()),
            None,
        );
        assert!(matches!(
            engine.analyze(&png_b64(), "a tree", None),
            Err(PipelineError::Invocation(_))
        ));
        assert_eq!(text.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn reward_retries_image_then_writes_letter() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let text = FakeText::replying(vec![Ok("  You are doing wonderfully.  ".to_string())]);
        let images = FakeImages::failing(2);
        let engine = engine(
            text.clone(),
            images.clone(),
            Arc::new(FakeChat::default()),
            store(Vec::new(), Vec::new()),
            Some(EventWriter::new(&events_path)),
        );

        let drawings = vec![png_b64(), "https://cdn.example/drawing.png".to_string()];
        let diaries = vec!["Walked by the river".to_string()];
        let reward = engine.reward(&drawings, "watercolor", Some(diaries.as_slice()))?;

        assert_eq!(image::guess_format(&reward.image)?, ImageFormat::Png);
        assert_eq!(reward.letter, "You are doing wonderfully.");
        assert_eq!(
            images.calls.lock().unwrap().clone(),
            vec!["imagegeneration@002"; 3]
        );

        let calls = text.calls.lock().unwrap();
        let (model, bundle, config) = &calls[0];
        assert_eq!(model, "gemini-2.0-flash");
        assert_eq!(config, &GenerationConfig::letter());
        assert_eq!(bundle.image_count(), 2);

        let content = fs::read_to_string(&events_path)?;
        let lines: Vec<Value> = content
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        let types: Vec<&str> = lines
            .iter()
            .filter_map(|event| event["type"].as_str())
            .collect();
        assert_eq!(
            types,
            vec!["generation_retry", "generation_retry", "reward_completed"]
        );
        assert_eq!(lines[1]["attempt"], 2);
        assert_eq!(lines[2]["drawings"], 2);
        Ok(())
    }

    #[test]
    fn reward_picks_default_image_model_for_other_styles() -> anyhow::Result<()> {
        let images = FakeImages::failing(0);
        let engine = engine(
            FakeText::replying(vec![Ok("Keep going.".to_string())]),
            images.clone(),
            Arc::new(FakeChat::default()),
            store(Vec::new(), Vec::new()),
            None,
        );
        engine.reward(&[], "sketch", None)?;
        assert_eq!(
            images.calls.lock().unwrap().clone(),
            vec!["imagegeneration@006"]
        );
        Ok(())
    }

    #[test]
    fn reward_fails_after_exhausting_image_attempts() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let text = FakeText::replying(vec![Ok("unused".to_string())]);
        let images = FakeImages::failing(10);
        let engine = engine(
            text.clone(),
            images.clone(),
            Arc::new(FakeChat::default()),
            store(Vec::new(), Vec::new()),
            Some(EventWriter::new(&events_path)),
        );

        match engine.reward(&[], "oil_painting", None) {
            Err(PipelineError::GenerationExhausted {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("quota exceeded"));
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(images.calls.lock().unwrap().len(), 3);
        assert!(text.calls.lock().unwrap().is_empty());

        let content = fs::read_to_string(&events_path)?;
        let last: Value = serde_json::from_str(content.lines().last().unwrap_or("{}"))?;
        assert_eq!(last["type"], "pipeline_failed");
        assert_eq!(last["error_kind"], "generation_exhausted");
        Ok(())
    }

    #[test]
    fn reward_fails_when_a_drawing_url_cannot_be_fetched() {
        let text = FakeText::replying(vec![Ok("unused".to_string())]);
        let engine = engine(
            text.clone(),
            FakeImages::failing(0),
            Arc::new(FakeChat::default()),
            store(Vec::new(), Vec::new()),
            None,
        );
        let drawings = vec!["https://cdn.example/missing.png".to_string()];
        let err = engine.reward(&drawings, "sketch", None).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert!(text.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn chat_replays_history_and_diary() {
        let chat = Arc::new(FakeChat::default());
        let engine = engine(
            FakeText::replying(Vec::new()),
            FakeImages::failing(0),
            chat.clone(),
            store(
                vec![
                    ConversationTurn::user("hi"),
                    ConversationTurn::model("hello"),
                ],
                vec!["Argued with my sister".to_string()],
            ),
            None,
        );

        let reply = engine.chat("I feel bad about today", "token-1").unwrap();
        assert_eq!(reply, "That sounds like a lot. Want to tell me more?");

        let calls = chat.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (model, system, history, message) = &calls[0];
        assert_eq!(model, "gemini-2.0-flash");
        assert!(system.starts_with(CHAT_PERSONA));
        assert!(system.ends_with("User's diary for today:\n- Argued with my sister"));
        assert_eq!(
            history,
            &vec![ConversationTurn::user("hi"), ConversationTurn::model("hello")]
        );
        assert_eq!(message, "I feel bad about today");
    }

    #[test]
    fn chat_fails_when_diary_service_fails() {
        let chat = Arc::new(FakeChat::default());
        let engine = engine(
            FakeText::replying(Vec::new()),
            FakeImages::failing(0),
            chat.clone(),
            Arc::new(FakeStore {
                history: Vec::new(),
                diary: Err(PipelineError::upstream("diary", Some(500), "internal error")),
            }),
            None,
        );
        assert!(matches!(
            engine.chat("hello", "token-1"),
            Err(PipelineError::UpstreamFetch { .. })
        ));
        assert!(chat.calls.lock().unwrap().is_empty());
    }
}
