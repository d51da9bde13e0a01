use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical operations a provider may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Chat,
    Streaming,
    Embeddings,
    Image,
    Video,
    FunctionCalling,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Chat => "chat",
            Self::Streaming => "streaming",
            Self::Embeddings => "embeddings",
            Self::Image => "image",
            Self::Video => "video",
            Self::FunctionCalling => "function_calling",
        };
        f.write_str(label)
    }
}

/// Which operations one vendor/model combination supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitySet {
    pub chat: bool,
    pub streaming: bool,
    pub embeddings: bool,
    pub image: bool,
    pub video: bool,
    pub function_calling: bool,
}

impl CapabilitySet {
    pub const fn chat_only() -> Self {
        Self {
            chat: true,
            streaming: true,
            embeddings: false,
            image: false,
            video: false,
            function_calling: false,
        }
    }

    pub const fn with_tools(mut self) -> Self {
        self.function_calling = true;
        self
    }

    pub const fn with_embeddings(mut self) -> Self {
        self.embeddings = true;
        self
    }

    pub const fn with_image(mut self) -> Self {
        self.image = true;
        self
    }

    pub const fn with_video(mut self) -> Self {
        self.video = true;
        self
    }

    pub const fn embeddings_only() -> Self {
        Self {
            chat: false,
            streaming: false,
            embeddings: true,
            image: false,
            video: false,
            function_calling: false,
        }
    }

    pub const fn image_only() -> Self {
        Self {
            chat: false,
            streaming: false,
            embeddings: false,
            image: true,
            video: false,
            function_calling: false,
        }
    }

    pub const fn video_only() -> Self {
        Self {
            chat: false,
            streaming: false,
            embeddings: false,
            image: false,
            video: true,
            function_calling: false,
        }
    }

    pub fn supports(&self, operation: Operation) -> bool {
        match operation {
            Operation::Chat => self.chat,
            Operation::Streaming => self.streaming,
            Operation::Embeddings => self.embeddings,
            Operation::Image => self.image,
            Operation::Video => self.video,
            Operation::FunctionCalling => self.function_calling,
        }
    }
}

/// Static capability table for one provider.
///
/// Overrides are matched by model-id prefix; the longest matching prefix wins and
/// models with no matching prefix use `default`.
///
/// # Examples
///
/// ```
/// # use llm_relay::types::{CapabilitySet, Operation, ProviderCapabilities};
/// let caps = ProviderCapabilities::new(CapabilitySet::chat_only())
///     .with_override("text-embedding", CapabilitySet::embeddings_only());
/// assert!(caps.supports("gpt-4o", Operation::Chat));
/// assert!(!caps.supports("text-embedding-3-small", Operation::Chat));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub default: CapabilitySet,
    #[serde(default)]
    pub overrides: Vec<(String, CapabilitySet)>,
}

impl ProviderCapabilities {
    pub fn new(default: CapabilitySet) -> Self {
        Self {
            default,
            overrides: Vec::new(),
        }
    }

    pub fn with_override(mut self, prefix: impl Into<String>, set: CapabilitySet) -> Self {
        self.overrides.push((prefix.into(), set));
        self
    }

    /// Resolves the capability set for `model`.
    pub fn for_model(&self, model: &str) -> CapabilitySet {
        self.overrides
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, set)| *set)
            .unwrap_or(self.default)
    }

    pub fn supports(&self, model: &str, operation: Operation) -> bool {
        self.for_model(model).supports(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let caps = ProviderCapabilities::new(CapabilitySet::chat_only())
            .with_override("amazon.", CapabilitySet::chat_only())
            .with_override("amazon.titan-embed", CapabilitySet::embeddings_only());

        assert!(caps.supports("amazon.titan-embed-text-v2:0", Operation::Embeddings));
        assert!(!caps.supports("amazon.titan-embed-text-v2:0", Operation::Chat));
        assert!(caps.supports("amazon.titan-text-express-v1", Operation::Chat));
    }

    #[test]
    fn unknown_model_uses_default() {
        let caps = ProviderCapabilities::new(CapabilitySet::chat_only().with_tools());
        let set = caps.for_model("anything");
        assert!(set.function_calling);
        assert!(!set.video);
    }
}
