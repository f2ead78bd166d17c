use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub provider: ProviderConfig,
    pub analysis: AnalysisConfig,
    pub translation: TranslationConfig,
    pub worker: WorkerConfig,
    pub registry: RegistryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    pub upload_dir: String,
    pub results_dir: String,
    pub max_file_size: usize,  // per file, in bytes
    pub max_files: usize,
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    pub default_prompt: String,
    pub default_models: Vec<String>,
    pub allowed_models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranslationConfig {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub failure_placeholder: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    pub completed_ttl_secs: u64,
    pub max_tasks: usize,
    pub sweep_interval_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // APP_PROVIDER__API_KEY -> provider.api_key
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Total multipart body size the upload route will accept.
    ///
    /// One file beyond `max_files` still fits, so an oversized batch reaches the
    /// handler and gets the file-count message instead of a bare 413.
    pub fn max_request_size(&self) -> usize {
        self.upload.max_file_size * (self.upload.max_files + 1) + FORM_FIELDS_ALLOWANCE
    }
}

// Prompt, model fields and multipart framing.
const FORM_FIELDS_ALLOWANCE: usize = 64 * 1024;

// Defaults mirror config/default.toml.

const DEFAULT_MODELS: [&str; 5] = [
    "gpt-4o-0806",
    "anthropic.claude-sonnet-4-20250514-v1:0",
    "gpt-4.1",
    "Doubao-1.5-vision-pro-32k",
    "claude-3-7-sonnet-v1",
];

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            upload_dir: "uploads".to_string(),
            results_dir: "uploads".to_string(),
            max_file_size: 16 * 1024 * 1024,
            max_files: 10,
            allowed_extensions: ["png", "jpg", "jpeg", "gif", "bmp", "tiff"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            request_timeout_secs: 180,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let models: Vec<String> = DEFAULT_MODELS.iter().map(|m| m.to_string()).collect();
        Self {
            default_prompt: "请分析这张图片的设计特点、视觉效果和用户体验要素。".to_string(),
            default_models: models.clone(),
            allowed_models: models,
            temperature: 0.5,
            max_tokens: 1000,
        }
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-0806".to_string(),
            system_prompt: "You are a professional translator. Translate the following text to English. \
                Keep the meaning accurate and the language natural. \
                Only return the translated text without any additional explanation."
                .to_string(),
            temperature: 0.3,
            max_tokens: 2000,
            failure_placeholder: "Translation failed".to_string(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            queue_capacity: 64,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            completed_ttl_secs: 24 * 60 * 60,
            max_tasks: 1000,
            sweep_interval_secs: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_models_are_allowed() {
        let config = Config::default();
        for model in &config.analysis.default_models {
            assert!(config.analysis.allowed_models.contains(model));
        }
    }

    #[test]
    fn request_limit_leaves_room_for_one_extra_file() {
        let config = Config::default();
        let one_too_many = config.upload.max_file_size * (config.upload.max_files + 1);
        assert!(config.max_request_size() > one_too_many);
    }

    #[test]
    fn env_overrides_use_single_underscore_after_prefix() {
        std::env::set_var("APP_PROVIDER__API_KEY", "from-env");
        std::env::set_var("APP_WORKER__QUEUE_CAPACITY", "7");
        let loaded = Config::load();
        std::env::remove_var("APP_PROVIDER__API_KEY");
        std::env::remove_var("APP_WORKER__QUEUE_CAPACITY");

        let config = loaded.unwrap();
        assert_eq!(config.provider.api_key, "from-env");
        assert_eq!(config.worker.queue_capacity, 7);
        // untouched values still come from config/default.toml
        assert_eq!(config.server.port, 5000);
    }
}
