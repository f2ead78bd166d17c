use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use std::path::Path;
use tracing::{debug, instrument};

use crate::config::AnalysisConfig;
use crate::errors::ModelError;
use crate::services::chat_client::{
    ChatClient, ChatCompletionRequest, ChatMessage, ContentPart, ImageUrl, MessageContent,
};

/// Produces a free-form description of one image with one model.
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    async fn analyze(&self, image_path: &Path, prompt: &str, model: &str) -> Result<String, ModelError>;
}

/// Sends the image inline (base64 data URL) to a vision-capable chat endpoint.
pub struct RemoteVisionAnalyzer {
    client: ChatClient,
    config: AnalysisConfig,
}

impl RemoteVisionAnalyzer {
    pub fn new(client: ChatClient, config: AnalysisConfig) -> Self {
        Self { client, config }
    }

    fn build_request(&self, prompt: &str, model: &str, data_url: String) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage::system(prompt),
                ChatMessage::user(MessageContent::Parts(vec![
                    ContentPart::Text { text: prompt.to_string() },
                    ContentPart::ImageUrl { image_url: ImageUrl { url: data_url } },
                ])),
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }
}

#[async_trait]
impl VisionAnalyzer for RemoteVisionAnalyzer {
    #[instrument(skip(self, prompt), fields(image = %image_path.display()))]
    async fn analyze(&self, image_path: &Path, prompt: &str, model: &str) -> Result<String, ModelError> {
        if !self.config.allowed_models.iter().any(|m| m == model) {
            return Err(ModelError::UnknownModel(model.to_string()));
        }

        let prompt = if prompt.trim().is_empty() {
            self.config.default_prompt.as_str()
        } else {
            prompt
        };

        let image_bytes = tokio::fs::read(image_path).await.map_err(|e| ModelError::ImageRead {
            path: image_path.display().to_string(),
            source: e,
        })?;
        debug!("Encoding {} bytes for model {}", image_bytes.len(), model);

        let data_url = format!(
            "data:{};base64,{}",
            mime_for(image_path),
            general_purpose::STANDARD.encode(&image_bytes)
        );

        let request = self.build_request(prompt, model, data_url);
        self.client.complete(&request).await
    }
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "image/jpeg",
    }
}
