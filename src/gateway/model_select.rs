use std::collections::BTreeSet;

use crate::types::Message;

use super::config::ModelsConfig;

/// Picks the upstream model id for a request. Pure: no I/O.
#[derive(Clone, Debug)]
pub struct ModelSelector {
    config: ModelsConfig,
    canonical: BTreeSet<String>,
}

impl ModelSelector {
    pub fn new(config: ModelsConfig) -> Self {
        let mut canonical: BTreeSet<String> = config.aliases.values().cloned().collect();
        canonical.insert(config.default_model.clone());
        canonical.insert(config.vision_model.clone());
        canonical.insert(config.long_context_model.clone());
        canonical.extend(config.vision_capable.iter().cloned());
        canonical.extend(config.fallback_models.iter().cloned());
        Self { config, canonical }
    }

    /// Priority: explicit name, image content, aggregate length, default.
    pub fn select(
        &self,
        explicit_model: Option<&str>,
        messages: &[Message],
        has_image_attachments: bool,
    ) -> String {
        if let Some(explicit) = explicit_model.map(str::trim).filter(|name| !name.is_empty()) {
            return self.resolve_alias(explicit);
        }

        let has_images =
            has_image_attachments || messages.iter().any(|message| message.content.has_image());
        if has_images {
            return self.config.vision_model.clone();
        }

        let total_chars: usize = messages.iter().map(Message::text_len).sum();
        if total_chars > self.config.long_context_threshold_chars {
            return self.config.long_context_model.clone();
        }

        self.config.default_model.clone()
    }

    /// Maps an alias to its canonical id; unknown names fall back to the default model.
    pub fn resolve_alias(&self, name: &str) -> String {
        if let Some(model) = self.config.aliases.get(name) {
            return model.clone();
        }
        if self.canonical.contains(name) {
            return name.to_string();
        }
        tracing::debug!(requested = name, fallback = %self.config.default_model, "unknown model alias");
        self.config.default_model.clone()
    }

    pub fn is_vision_capable(&self, model: &str) -> bool {
        model == self.config.vision_model
            || self
                .config
                .vision_capable
                .iter()
                .any(|candidate| candidate == model)
    }
}
