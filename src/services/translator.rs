use async_trait::async_trait;
use tracing::instrument;

use crate::config::TranslationConfig;
use crate::errors::ModelError;
use crate::services::chat_client::{ChatClient, ChatCompletionRequest, ChatMessage, MessageContent};

/// Translates analysis text to English.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str) -> Result<String, ModelError>;
}

pub struct RemoteTranslator {
    client: ChatClient,
    config: TranslationConfig,
}

impl RemoteTranslator {
    pub fn new(client: ChatClient, config: TranslationConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Translator for RemoteTranslator {
    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    async fn translate(&self, text: &str) -> Result<String, ModelError> {
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage::system(self.config.system_prompt.as_str()),
                ChatMessage::user(MessageContent::Text(text.to_string())),
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        self.client.complete(&request).await
    }
}
