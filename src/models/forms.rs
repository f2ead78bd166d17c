use serde::{Deserialize, Serialize};

/// Non-file fields of the upload form.
#[derive(Deserialize, Serialize, Clone, Default, Debug)]
pub struct UploadForm {
    pub prompt: String,
    pub models: Vec<String>,
}

impl UploadForm {
    /// Prompt to send, falling back to `default` when the user left it blank.
    pub fn effective_prompt(&self, default: &str) -> String {
        let prompt = self.prompt.trim();
        if prompt.is_empty() {
            default.to_string()
        } else {
            prompt.to_string()
        }
    }

    /// Selected models in submission order, or `defaults` when none were picked.
    pub fn effective_models(&self, defaults: &[String]) -> Vec<String> {
        let mut models: Vec<String> = Vec::new();
        for model in self.models.iter().map(|m| m.trim()).filter(|m| !m.is_empty()) {
            if !models.iter().any(|m| m == model) {
                models.push(model.to_string());
            }
        }
        if models.is_empty() {
            defaults.to_vec()
        } else {
            models
        }
    }
}
