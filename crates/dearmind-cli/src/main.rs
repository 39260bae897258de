use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Args, Parser, Subcommand};
use dearmind_contracts::events::EventWriter;
use dearmind_contracts::PipelineError;
use dearmind_engine::prompts::is_remote_image;
use dearmind_engine::{Engine, EngineConfig};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dearmind", version, about = "DearMind generation core CLI")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// Append pipeline lifecycle events to this JSONL file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[arg(long, global = true)]
    analysis_model: Option<String>,
    #[arg(long, global = true)]
    letter_model: Option<String>,
    #[arg(long, global = true)]
    chat_model: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Classify a drawing and optional writing.
    Analyze(AnalyzeArgs),
    /// Generate a reward painting and letter.
    Reward(RewardArgs),
    /// Send one chat message in the context of stored history.
    Chat(ChatArgs),
    /// Print the greeting shown when a chat opens.
    Greeting,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    /// Drawing file to classify.
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    subject: String,
    #[arg(long)]
    text: Option<String>,
}

#[derive(Debug, Parser)]
struct RewardArgs {
    /// Drawing file or http(s) URL; repeatable.
    #[arg(long = "image")]
    images: Vec<String>,
    #[arg(long)]
    style: String,
    /// Diary entry; repeatable.
    #[arg(long = "diary")]
    diaries: Vec<String>,
    /// Write the generated PNG here instead of printing it as base64.
    #[arg(long)]
    out_png: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    /// Bearer token for the history/diary service.
    #[arg(long, env = "DEARMIND_TOKEN", hide_env_values = true)]
    token: String,
    #[arg(long)]
    message: String,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("dearmind error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = env::var("DEARMIND_LOG")
        .ok()
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Greeting => Ok(json!({ "reply": Engine::initial_greeting() })),
        Command::Analyze(args) => run_analyze(&build_engine(&cli.global)?, args),
        Command::Reward(args) => run_reward(&build_engine(&cli.global)?, args),
        Command::Chat(args) => build_engine(&cli.global)?
            .chat(&args.message, &args.token)
            .map(|reply| json!({ "reply": reply }))
            .map_err(anyhow::Error::from),
    };
    match outcome {
        Ok(payload) => {
            print_json(&payload)?;
            Ok(0)
        }
        Err(err)
            if err
                .downcast_ref::<PipelineError>()
                .is_some_and(PipelineError::is_client_error) =>
        {
            eprintln!("dearmind error: {err:#}");
            Ok(2)
        }
        Err(err) => Err(err),
    }
}

/// Environment config with CLI model overrides applied.
fn engine_config(global: &GlobalArgs, mut config: EngineConfig) -> EngineConfig {
    if global.analysis_model.is_some() {
        config.analysis_model = global.analysis_model.clone();
    }
    if global.letter_model.is_some() {
        config.letter_model = global.letter_model.clone();
    }
    if global.chat_model.is_some() {
        config.chat_model = global.chat_model.clone();
    }
    config
}

fn build_engine(global: &GlobalArgs) -> Result<Engine> {
    let config = engine_config(global, EngineConfig::from_env());
    let events = global.events.as_ref().map(EventWriter::new);
    let engine = Engine::from_config(&config, events).context("failed to configure engine")?;
    tracing::info!(
        analysis_model = engine.analysis_model(),
        letter_model = engine.letter_model(),
        chat_model = engine.chat_model(),
        rag_corpus = config.rag_corpus.is_some(),
        events = ?global.events,
        "engine ready"
    );
    Ok(engine)
}

fn run_analyze(engine: &Engine, args: AnalyzeArgs) -> Result<Value> {
    let image_b64 = read_image_b64(&args.image)?;
    let result = engine.analyze(&image_b64, &args.subject, args.text.as_deref())?;
    Ok(json!({
        "emotion": result.emotion,
        "severity": result.severity,
    }))
}

fn run_reward(engine: &Engine, args: RewardArgs) -> Result<Value> {
    let images = args
        .images
        .iter()
        .map(|raw| reward_image_arg(raw))
        .collect::<Result<Vec<String>>>()?;
    let diaries = (!args.diaries.is_empty()).then_some(args.diaries.as_slice());
    let reward = engine.reward(&images, &args.style, diaries)?;

    match args.out_png {
        Some(path) => {
            fs::write(&path, &reward.image)
                .with_context(|| format!("failed to write {}", path.display()))?;
            Ok(json!({
                "image_path": path.display().to_string(),
                "letter": reward.letter,
            }))
        }
        None => Ok(serde_json::to_value(reward.to_payload())?),
    }
}

/// URLs are passed through for the engine to fetch; anything else is a file.
fn reward_image_arg(raw: &str) -> Result<String> {
    if is_remote_image(raw) {
        return Ok(raw.to_string());
    }
    read_image_b64(Path::new(raw))
}

fn read_image_b64(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|err| {
        PipelineError::invalid_input(format!("failed to read {}: {err}", path.display()))
    })?;
    Ok(BASE64.encode(bytes))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
