use indexmap::IndexMap;

pub const CAP_TEXT: &str = "text";
pub const CAP_VISION: &str = "vision";
pub const CAP_CHAT: &str = "chat";
pub const CAP_IMAGE: &str = "image";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    /// Reward art styles this image model is preferred for.
    pub styles: Vec<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }

    pub fn prefers_style(&self, style: &str) -> bool {
        let normalized = style.trim().to_ascii_lowercase();
        self.styles.iter().any(|item| *item == normalized)
    }
}

/// Known models in preference order; the first model supporting a capability is its default.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }

    /// Image model for a reward art style: a style-specific model when one
    /// claims the style, otherwise the first image model without style claims.
    pub fn image_model_for_style(&self, style: &str) -> Option<ModelSpec> {
        let image_models = self.by_capability(CAP_IMAGE);
        if let Some(model) = image_models.iter().find(|model| model.prefers_style(style)) {
            return Some(model.clone());
        }
        image_models
            .iter()
            .find(|model| model.styles.is_empty())
            .or_else(|| image_models.first())
            .cloned()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[&str], styles: &[&str]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                styles: styles.iter().map(|item| (*item).to_string()).collect(),
            },
        );
    };

    insert(
        "gemini-1.5-flash-002",
        "gemini",
        &[CAP_TEXT, CAP_VISION],
        &[],
    );
    insert(
        "gemini-2.0-flash",
        "gemini",
        &[CAP_TEXT, CAP_VISION, CAP_CHAT],
        &[],
    );
    insert(
        "imagegeneration@006",
        "imagen",
        &[CAP_IMAGE],
        &[],
    );
    insert(
        "imagegeneration@002",
        "imagen",
        &[CAP_IMAGE],
        &["watercolor", "oil_painting"],
    );

    map
}
