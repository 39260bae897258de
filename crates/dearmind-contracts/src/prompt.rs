/// One segment of a multimodal prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptPart {
    Text(String),
    InlineImage { mime_type: String, data: Vec<u8> },
}

impl PromptPart {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            Self::InlineImage { .. } => None,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::InlineImage { .. })
    }
}

/// Ordered parts handed to a generator in a single call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptBundle {
    parts: Vec<PromptPart>,
}

impl PromptBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.parts.push(PromptPart::Text(text.into()));
        self
    }

    /// Appends `text` only when it has visible content.
    pub fn optional_text(self, text: Option<&str>) -> Self {
        match text.filter(|value| !value.trim().is_empty()) {
            Some(value) => self.text(value),
            None => self,
        }
    }

    pub fn image(mut self, mime_type: &str, data: Vec<u8>) -> Self {
        self.parts.push(PromptPart::InlineImage {
            mime_type: mime_type.to_string(),
            data,
        });
        self
    }

    pub fn parts(&self) -> &[PromptPart] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn image_count(&self) -> usize {
        self.parts.iter().filter(|part| part.is_image()).count()
    }

    /// All text parts joined with newlines, for text-only endpoints.
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(PromptPart::as_text)
            .collect::<Vec<&str>>()
            .join("\n")
    }
}
