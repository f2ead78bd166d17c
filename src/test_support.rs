// Shared fixtures for unit tests: a fake chat-completions endpoint, scripted
// analyzer/translator doubles and small filesystem helpers.

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::config::Config;
use crate::errors::ModelError;
use crate::models::ImageJob;
use crate::services::{Translator, VisionAnalyzer};

pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.upload.upload_dir = root.join("uploads").display().to_string();
    config.upload.results_dir = root.join("results").display().to_string();
    config.provider.api_key = "test-key".to_string();
    config.provider.request_timeout_secs = 5;
    config.provider.connect_timeout_secs = 2;
    config
}

pub fn completion_body(text: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": text } }]
    })
}

#[derive(Clone)]
struct FakeChatState {
    status: StatusCode,
    body: Value,
    requests: Arc<Mutex<Vec<Value>>>,
}

pub struct FakeChatServer {
    pub api_base: String,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl FakeChatServer {
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

/// Serves a canned reply on `POST /v1/chat/completions` from an ephemeral port.
pub async fn spawn_chat_server(status: StatusCode, body: Value) -> FakeChatServer {
    async fn handle(
        State(state): State<FakeChatState>,
        Json(request): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        state.requests.lock().unwrap().push(request);
        (state.status, Json(state.body.clone()))
    }

    let requests = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/v1/chat/completions", post(handle))
        .with_state(FakeChatState { status, body, requests: requests.clone() });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeChatServer {
        api_base: format!("http://{}/v1", addr),
        requests,
    }
}

/// Reads the first worksheet of an xlsx file back as rows of cell text.
pub fn read_xlsx_rows(bytes: &[u8]) -> Vec<Vec<String>> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let mut read_part = |name: &str| {
        let mut xml = String::new();
        archive.by_name(name).unwrap().read_to_string(&mut xml).unwrap();
        xml
    };
    let sheet = read_part("xl/worksheets/sheet1.xml");
    let shared = read_part("xl/sharedStrings.xml");

    let strings: Vec<String> = shared.split("<si>").skip(1).map(text_of).collect();

    sheet
        .split("<row ")
        .skip(1)
        .map(|row| {
            let row = row.split("</row>").next().unwrap_or("");
            row.split("<c ")
                .skip(1)
                .map(|cell| {
                    if cell.contains("t=\"s\"") {
                        let index: usize = between(cell, "<v>", "</v>").parse().unwrap();
                        strings[index].clone()
                    } else if cell.contains("<is>") {
                        text_of(cell)
                    } else {
                        unescape(between(cell, "<v>", "</v>"))
                    }
                })
                .collect()
        })
        .collect()
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> &'a str {
    let start = text.find(open).map(|i| i + open.len()).unwrap_or(0);
    let end = text[start..].find(close).map(|i| start + i).unwrap_or(text.len());
    &text[start..end]
}

// Content of the first <t> element, which may carry attributes.
fn text_of(fragment: &str) -> String {
    let Some(open) = fragment.find("<t") else {
        return String::new();
    };
    let after = &fragment[open..];
    let start = after.find('>').map(|i| i + 1).unwrap_or(0);
    unescape(between(&after[start..], "", "</t>"))
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Writes small fake images and returns the matching jobs.
pub fn write_jobs(dir: &Path, names: &[&str]) -> Vec<ImageJob> {
    std::fs::create_dir_all(dir).unwrap();
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let stored_name = format!("20240101_000000_{:02}_{}", i + 1, name);
            let path = dir.join(&stored_name);
            std::fs::write(&path, format!("image bytes of {}", name)).unwrap();
            ImageJob {
                path,
                stored_name,
                original_name: name.to_string(),
            }
        })
        .collect()
}

/// Analyzer double: fails for the listed models or images, succeeds otherwise.
#[derive(Default)]
pub struct ScriptedAnalyzer {
    pub failing_models: Vec<String>,
    pub failing_images: Vec<String>,
    pub panic_on_call: bool,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedAnalyzer {
    pub fn failing_models(models: &[&str]) -> Self {
        Self {
            failing_models: models.iter().map(|m| m.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl VisionAnalyzer for ScriptedAnalyzer {
    async fn analyze(&self, image_path: &Path, _prompt: &str, model: &str) -> Result<String, ModelError> {
        let file_name = image_path.file_name().unwrap().to_string_lossy().to_string();
        self.calls.lock().unwrap().push((file_name.clone(), model.to_string()));

        if self.panic_on_call {
            panic!("analyzer exploded");
        }
        // files must still be on disk while they are being analyzed
        assert!(image_path.exists(), "{} was removed before analysis", file_name);

        let failing_image = self.failing_images.iter().any(|name| file_name.ends_with(name.as_str()));
        if failing_image || self.failing_models.iter().any(|m| m == model) {
            return Err(ModelError::EmptyContent);
        }
        Ok(format!("分析 {} by {}", file_name, model))
    }
}

/// Translator double: fails for texts containing `fail_marker`.
#[derive(Default)]
pub struct ScriptedTranslator {
    pub fail_marker: Option<String>,
}

#[async_trait]
impl Translator for ScriptedTranslator {
    async fn translate(&self, text: &str) -> Result<String, ModelError> {
        if let Some(marker) = &self.fail_marker {
            if text.contains(marker.as_str()) {
                return Err(ModelError::Status { status: 503, body: "overloaded".into() });
            }
        }
        Ok(format!("EN: {}", text))
    }
}

/// Analyzer that announces the call and then never answers.
#[derive(Default)]
pub struct StalledAnalyzer {
    pub started: Notify,
}

#[async_trait]
impl VisionAnalyzer for StalledAnalyzer {
    async fn analyze(&self, _image_path: &Path, _prompt: &str, _model: &str) -> Result<String, ModelError> {
        self.started.notify_one();
        std::future::pending().await
    }
}
