use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::Client;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openrouter;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::{LlmProvider, LlmSettings};
use crate::error::BackendError;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENROUTER_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
    /// e.g. `application/json` to force a JSON answer
    pub response_mime_type: Option<String>,
}

impl Default for GenerationConfig {
    /// Low-temperature JSON extraction.
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 4000,
            response_mime_type: Some("application/json".to_string()),
        }
    }
}

impl GenerationConfig {
    fn wants_json(&self) -> bool {
        self.response_mime_type.as_deref() == Some("application/json")
    }
}

#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageInput {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    pub fn base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64())
    }
}

/// A text-generation model, optionally multimodal.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<String, BackendError>;

    async fn generate_with_image(
        &self,
        prompt: &str,
        image: &ImageInput,
        config: &GenerationConfig,
    ) -> Result<String, BackendError>;
}

/// Build the backend selected in configuration.
pub fn from_settings(settings: &LlmSettings) -> Arc<dyn GenerativeBackend> {
    match settings.provider {
        LlmProvider::Gemini => Arc::new(GeminiBackend::new(
            &settings.api_key,
            &settings.model,
            &settings.vision_model,
        )),
        LlmProvider::OpenRouter => Arc::new(OpenRouterBackend::new(
            &settings.api_key,
            &settings.model,
            &settings.vision_model,
        )),
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, BackendError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await?)
}

/// Google's `generateContent` REST API.
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    model: String,
    vision_model: String,
    base_url: String,
}

impl GeminiBackend {
    pub fn new(api_key: &str, model: &str, vision_model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            vision_model: vision_model.to_string(),
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    fn payload(parts: Vec<Value>, config: &GenerationConfig) -> Value {
        let mut generation_config = json!({
            "temperature": config.temperature,
            "topP": config.top_p,
            "topK": config.top_k,
            "maxOutputTokens": config.max_output_tokens,
        });
        if let Some(mime) = &config.response_mime_type {
            generation_config["responseMimeType"] = json!(mime);
        }
        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config,
        })
    }

    async fn call(&self, model: &str, payload: Value) -> Result<String, BackendError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        debug!(model, "Calling Gemini");
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await?;
        let body = read_json(response).await?;
        gemini_text(&body)
    }
}

/// Concatenated text parts of the first candidate.
fn gemini_text(body: &Value) -> Result<String, BackendError> {
    let parts = body["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| BackendError::Format(format!("no candidates in response: {body}")))?;
    let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    if text.is_empty() {
        return Err(BackendError::Format("empty response text".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl GenerativeBackend for GeminiBackend {
    async fn generate(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<String, BackendError> {
        let payload = Self::payload(vec![json!({ "text": prompt })], config);
        self.call(&self.model, payload).await
    }

    async fn generate_with_image(
        &self,
        prompt: &str,
        image: &ImageInput,
        config: &GenerationConfig,
    ) -> Result<String, BackendError> {
        let parts = vec![
            json!({ "text": prompt }),
            json!({ "inline_data": { "mime_type": image.mime_type, "data": image.base64() } }),
        ];
        info!(bytes = image.bytes.len(), "Sending image to Gemini vision");
        self.call(&self.vision_model, Self::payload(parts, config)).await
    }
}

/// OpenRouter: text through a rig agent, images through the chat completions endpoint.
pub struct OpenRouterBackend {
    rig: openrouter::Client,
    http: Client,
    api_key: String,
    model: String,
    vision_model: String,
}

impl OpenRouterBackend {
    pub fn new(api_key: &str, model: &str, vision_model: &str) -> Self {
        Self {
            rig: openrouter::Client::new(api_key),
            http: Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            vision_model: vision_model.to_string(),
        }
    }

    fn sampling_params(config: &GenerationConfig) -> Value {
        let mut params = json!({ "top_p": config.top_p, "top_k": config.top_k });
        if config.wants_json() {
            params["response_format"] = json!({ "type": "json_object" });
        }
        params
    }
}

#[async_trait]
impl GenerativeBackend for OpenRouterBackend {
    async fn generate(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<String, BackendError> {
        let agent = self
            .rig
            .agent(&self.model)
            .temperature(config.temperature)
            .max_tokens(config.max_output_tokens as u64)
            .additional_params(Self::sampling_params(config))
            .build();
        agent
            .prompt(prompt)
            .await
            .map_err(|e| BackendError::Request(e.to_string()))
    }

    async fn generate_with_image(
        &self,
        prompt: &str,
        image: &ImageInput,
        config: &GenerationConfig,
    ) -> Result<String, BackendError> {
        let mut payload = json!({
            "model": self.vision_model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": image.data_uri() } },
                ],
            }],
            "max_tokens": config.max_output_tokens,
            "temperature": config.temperature,
            "top_p": config.top_p,
        });
        if config.wants_json() {
            payload["response_format"] = json!({ "type": "json_object" });
        }

        info!(
            bytes = image.bytes.len(),
            model = %self.vision_model,
            "Sending image to OpenRouter vision"
        );
        let response = self
            .http
            .post(OPENROUTER_CHAT_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;
        let body = read_json(response).await?;

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BackendError::Format("Invalid response format from LLM".to_string()))
    }
}
