use crate::core::api::ModelInfo;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelCatalog {
    pub models: Vec<ModelInfo>,
    /// Explicit model chosen by the user; `None` means the backend default.
    pub override_model: Option<String>,
}

impl ModelCatalog {
    pub fn contains(&self, model_id: &str) -> bool {
        self.models.iter().any(|m| m.id == model_id)
    }

    /// Replace the list. An override that is no longer offered is dropped.
    /// Returns true when the override was dropped.
    pub fn replace(&mut self, models: Vec<ModelInfo>) -> bool {
        self.models = models;
        match &self.override_model {
            Some(id) if !self.models.is_empty() && !self.contains(id) => {
                self.override_model = None;
                true
            }
            _ => false,
        }
    }
}

/// Whether a backend error says the selected model went away.
pub fn is_model_unavailable(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("model")
        && [
            "not available",
            "unavailable",
            "not found",
            "not loaded",
            "no longer",
        ]
        .iter()
        .any(|needle| lower.contains(needle))
}
