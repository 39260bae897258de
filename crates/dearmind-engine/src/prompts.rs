//! Prompt templates for the three pipelines, plus decoding of user-supplied
//! drawings into prompt image parts.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dearmind_contracts::error::error_chain_text;
use dearmind_contracts::{PipelineError, PipelineResult, PromptBundle};

use crate::services::ImageFetcher;

pub const IMAGE_MIME: &str = "image/png";

pub const CHAT_PERSONA: &str = "You are DearMind, an empathetic art-therapy companion. \
Speak in a calm, encouraging tone with expertise in Psychological counseling, but be sure to maintain a friendly and buddy vibe. \
Recall everything the user has shared in this session.";

pub const CHAT_GREETING: &str = "Hello! It’s wonderful to meet you, and I’m genuinely happy you’re here. \
I’m here to listen and gently guide you as you express yourself through art and language. \
How can I support you with your feelings today?";

/// Role-play framing used both as the retrieval query and as the head of the analysis prompt.
pub fn analysis_retrieval_query(subject: &str) -> String {
    format!(
        "<context>Your role is an art therapist; my role is a client. \
You instructed me to draw {subject}.</context> \
<question>What insight can you offer from art therapy theory? \
Also judge if the client’s feelings are negative. \
If negative, pick one: anxiety, depression, or anger.</question>"
    )
}

fn analysis_instruction(subject: &str, retrieved_context: &str) -> String {
    let mut out = analysis_retrieval_query(subject);
    out.push_str("\n\nAdditional Context from Retrieval:\n");
    out.push_str(retrieved_context);
    out.push_str("\n\nNow interpret the attached artwork and writing.");
    out.push_str(
        "\nAnd if you detect any negative feelings, suggest if the client shows \
a tendency toward suicidal or self-harm—only if you’re quite sure.",
    );
    out.push_str(
        "\n\n**EXACTLY** output _only_ a JSON array of two strings like [\"emotion\",\"severity\"] \
where emotion ∈ {\"positive\",\"depressed\",\"anxious\",\"angry\"} and \
severity ∈ {\"safe\",\"emergency\"}. NO OTHER TEXT or explanation.",
    );
    out
}

/// Instruction, then the drawing, then the optional writing last.
pub fn analysis_prompt(
    subject: &str,
    image: Vec<u8>,
    text: Option<&str>,
    retrieved_context: &str,
) -> PromptBundle {
    PromptBundle::new()
        .text(analysis_instruction(subject, retrieved_context))
        .image(IMAGE_MIME, image)
        .optional_text(text)
}

pub fn diary_bullets(diaries: &[String]) -> String {
    diaries
        .iter()
        .map(|entry| format!("- {entry}"))
        .collect::<Vec<String>>()
        .join("\n")
}

/// Text-only: the image model gets no image input.
pub fn reward_image_prompt(art_style: &str, diaries: &[String]) -> PromptBundle {
    PromptBundle::new().text(format!(
        "Create an inspirational painting in {art_style}.\n\
Include motifs that reflect soothing vibe if appropriate. \
Do not draw overly abstract pictures. \
Avoid portrait of a person. \
Also try to reflect user's emotions (not the direct anecdotes but the emotions) \
from their recent diary entries. Here are some of them\n{}",
        diary_bullets(diaries)
    ))
}

pub fn reward_letter_prompt(diaries: &[String], drawings: Vec<Vec<u8>>) -> PromptBundle {
    let instruction = format!(
        "You are a friendly app character on a picture diary app. \
Here are some of user's recent diary entries and user's drawings:\n{}\n\n\
Write a short letter (2–3 sentences) praising their work and \
encouraging them to keep up caring themselves emotionally. \
You should focus on user's emotions from their diary entries.\n\
Try to avoid direct mentions about user's drawings and content of diaries. \
Instead focus on their feelings and emotions.\n\
And always maintain friendly and soothing vibe, \
try to write your letter as if you're one of user's close friends.",
        diary_bullets(diaries)
    );
    drawings
        .into_iter()
        .fold(PromptBundle::new().text(instruction), |bundle, drawing| {
            bundle.image(IMAGE_MIME, drawing)
        })
}

/// Persona plus, when there are entries, today's diary block.
pub fn chat_system_instruction(diary_entries: &[String]) -> String {
    let block = diary_bullets(diary_entries);
    if block.is_empty() {
        return CHAT_PERSONA.to_string();
    }
    format!("{CHAT_PERSONA}\n\nUser's diary for today:\n{block}")
}

/// Decodes standard base64, tolerating a `data:<mime>;base64,` prefix and
/// embedded whitespace.
pub fn decode_base64_image(raw: &str) -> PipelineResult<Vec<u8>> {
    let trimmed = raw.trim();
    let payload = match trimmed.split_once(";base64,") {
        Some((head, tail)) if head.starts_with("data:") => tail,
        _ => trimmed,
    };
    let compact: String = payload.chars().filter(|ch| !ch.is_whitespace()).collect();
    let bytes = BASE64
        .decode(compact.as_bytes())
        .map_err(|err| PipelineError::invalid_input(format!("image is not valid base64: {err}")))?;
    if bytes.is_empty() {
        return Err(PipelineError::invalid_input("image is empty"));
    }
    Ok(bytes)
}

pub fn is_remote_image(raw: &str) -> bool {
    let trimmed = raw.trim_start();
    trimmed.starts_with("http://") || trimmed.starts_with("https://")
}

/// A submitted drawing is either a URL to download or base64 data.
pub fn load_user_image(raw: &str, fetcher: &dyn ImageFetcher) -> PipelineResult<Vec<u8>> {
    if is_remote_image(raw) {
        let bytes = fetcher.fetch(raw.trim()).map_err(|err| {
            PipelineError::invalid_input(format!(
                "user image could not be fetched: {}",
                error_chain_text(&err, 512)
            ))
        })?;
        if bytes.is_empty() {
            return Err(PipelineError::invalid_input("user image download was empty"));
        }
        return Ok(bytes);
    }
    decode_base64_image(raw)
}

/// All-or-nothing: the first drawing that fails aborts the request.
pub fn load_user_images(
    images: &[String],
    fetcher: &dyn ImageFetcher,
) -> PipelineResult<Vec<Vec<u8>>> {
    images
        .iter()
        .map(|raw| load_user_image(raw, fetcher))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::bail;

    use super::*;

    struct FakeFetcher {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl FakeFetcher {
        fn new(fail: bool) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    impl ImageFetcher for FakeFetcher {
        fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
            self.calls.lock().unwrap().push(url.to_string());
            if self.fail {
                bail!("image download failed ({url}): HTTP 404");
            }
            Ok(vec![7, 7, 7])
        }
    }

    #[test]
    fn analysis_prompt_orders_instruction_image_then_text() {
        let bundle = analysis_prompt("a tree", vec![1, 2], Some("I felt tired"), "Trees mean growth.");
        assert_eq!(bundle.len(), 3);
        let instruction = bundle.parts()[0].as_text().unwrap();
        assert!(instruction.contains("You instructed me to draw a tree."));
        assert!(instruction.contains("Additional Context from Retrieval:\nTrees mean growth."));
        assert!(instruction.contains("[\"emotion\",\"severity\"]"));
        assert!(bundle.parts()[1].is_image());
        assert_eq!(bundle.parts()[2].as_text(), Some("I felt tired"));
    }

    #[test]
    fn analysis_prompt_drops_empty_text() {
        let bundle = analysis_prompt("a house", vec![1], Some(""), "");
        assert_eq!(bundle.len(), 2);
        assert!(bundle.parts()[1].is_image());
    }

    #[test]
    fn reward_image_prompt_is_text_only_with_bullets() {
        let diaries = vec!["Went hiking".to_string(), "Felt calm".to_string()];
        let bundle = reward_image_prompt("watercolor", &diaries);
        assert_eq!(bundle.image_count(), 0);
        let text = bundle.joined_text();
        assert!(text.starts_with("Create an inspirational painting in watercolor.\n"));
        assert!(text.ends_with("Here are some of them\n- Went hiking\n- Felt calm"));
    }

    #[test]
    fn reward_letter_prompt_appends_each_drawing() {
        let bundle = reward_letter_prompt(&["Good day".to_string()], vec![vec![1], vec![2]]);
        assert_eq!(bundle.len(), 3);
        assert_eq!(bundle.image_count(), 2);
        assert!(bundle.parts()[0].as_text().unwrap().contains("- Good day"));
    }

    #[test]
    fn chat_instruction_appends_diary_only_when_present() {
        assert_eq!(chat_system_instruction(&[]), CHAT_PERSONA);
        let with_diary = chat_system_instruction(&["Saw a friend".to_string()]);
        assert!(with_diary.starts_with(CHAT_PERSONA));
        assert!(with_diary.ends_with("\n\nUser's diary for today:\n- Saw a friend"));
    }

    #[test]
    fn decodes_plain_and_data_url_base64() {
        assert_eq!(decode_base64_image("AQID").unwrap(), vec![1, 2, 3]);
        assert_eq!(
            decode_base64_image("data:image/png;base64,AQ\nID").unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn rejects_undecodable_or_empty_base64() {
        assert!(matches!(
            decode_base64_image("not base64!!"),
            Err(PipelineError::InvalidInput(_))
        ));
        assert!(matches!(
            decode_base64_image("   "),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn urls_go_through_the_fetcher() {
        let fetcher = FakeFetcher::new(false);
        let images = vec!["https://cdn.example/a.png".to_string(), "AQID".to_string()];
        let loaded = load_user_images(&images, &fetcher).unwrap();
        assert_eq!(loaded, vec![vec![7, 7, 7], vec![1, 2, 3]]);
        assert_eq!(
            fetcher.calls.lock().unwrap().clone(),
            vec!["https://cdn.example/a.png".to_string()]
        );
    }

    #[test]
    fn one_failed_fetch_fails_the_whole_set() {
        let fetcher = FakeFetcher::new(true);
        let images = vec!["AQID".to_string(), "http://cdn.example/missing.png".to_string()];
        match load_user_images(&images, &fetcher) {
            Err(PipelineError::InvalidInput(message)) => assert!(message.contains("404")),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
