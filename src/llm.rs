use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::text::truncate_chars;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model server returned status {status}: {message}")]
    Status { status: u16, message: String },
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Pick the model wrapper for this configuration.
pub fn from_config(config: &Config) -> Result<Box<dyn LanguageModel>, LlmError> {
    match &config.llm_base_url {
        Some(url) => Ok(Box::new(OllamaModel::new(
            url.clone(),
            config.llm_model.clone(),
            config.llm_max_tokens,
            config.llm_temperature,
            config.llm_timeout,
        )?)),
        None => {
            tracing::warn!("LLM_BASE_URL not set, answers will echo the prompt");
            Ok(Box::new(EchoModel))
        }
    }
}

/// Client for a locally hosted model behind Ollama's `/api/generate`.
pub struct OllamaModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaModel {
    pub fn new(
        base_url: String,
        model: String,
        max_tokens: u32,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            model,
            max_tokens,
            temperature,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };
        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }
        let data: GenerateResponse = resp.json().await?;
        Ok(data.response.trim().to_string())
    }
}

/// Fallback when no model server is configured.
pub struct EchoModel;

#[async_trait]
impl LanguageModel for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        Ok(format!(
            "[local model unavailable] Echo: {}",
            truncate_chars(prompt, 2000)
        ))
    }
}
