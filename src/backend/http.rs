//! HTTP chat backend for Ollama and OpenAI-compatible endpoints.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::prompts::{self, ChatMessage};
use super::{Collaborator, DecisionRequest, Provider, UtteranceRequest};
use crate::config::BackendConfig;
use crate::error::{Result, SimError};

/// Default Ollama server
pub const OLLAMA_DEFAULT_ENDPOINT: &str = "http://localhost:11434";

/// Default OpenAI-compatible endpoint
pub const OPENAI_DEFAULT_ENDPOINT: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: ChatMessage,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// Chat collaborator talking to a remote model server.
///
/// Stateless: every call sends the full perspective of the current speaker.
pub struct ChatBackend {
    client: Client,
    provider: Provider,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: Option<f32>,
}

impl ChatBackend {
    /// Build from backend configuration.
    ///
    /// The API key is read from the environment variable named by
    /// `api_key_env`. A missing key is logged, not rejected.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let endpoint = match (&config.endpoint, config.provider) {
            (Some(endpoint), _) => endpoint.trim_end_matches('/').to_string(),
            (None, Provider::OpenAi) => OPENAI_DEFAULT_ENDPOINT.to_string(),
            (None, _) => OLLAMA_DEFAULT_ENDPOINT.to_string(),
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SimError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if config.provider == Provider::OpenAi && api_key.is_none() {
            tracing::warn!("{} not set; requests may be rejected", config.api_key_env);
        }

        Ok(Self {
            client,
            provider: config.provider,
            endpoint,
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
        })
    }

    /// Endpoint base URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let content = match self.provider {
            Provider::OpenAi => self.chat_completions(&messages).await?,
            _ => self.ollama_chat(&messages).await?,
        };
        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(SimError::Backend("empty reply".to_string()));
        }
        Ok(content)
    }

    async fn ollama_chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = OllamaRequest {
            model: &self.model,
            messages,
            stream: false,
            options: self.temperature.map(|temperature| OllamaOptions { temperature }),
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.endpoint))
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let body: OllamaResponse = response.json().await?;
        Ok(body.message.content)
    }

    async fn chat_completions(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .header("X-Title", "Beliefnet Simulation")
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = check_status(builder.send().await?).await?;
        let body: CompletionResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| SimError::Backend("response had no choices".to_string()))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.as_u16() == 429 {
        return Err(SimError::Backend("rate limited".to_string()));
    }
    let error_text = response.text().await.unwrap_or_default();
    Err(SimError::Backend(format!("API error {status}: {error_text}")))
}

impl Collaborator for ChatBackend {
    fn generate_utterance<'a>(
        &'a self,
        request: &'a UtteranceRequest,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.chat(prompts::utterance_messages(request)))
    }

    fn decide<'a>(&'a self, request: &'a DecisionRequest) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.chat(prompts::decision_messages(request)))
    }

    fn name(&self) -> &str {
        self.provider.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoints() {
        let ollama = ChatBackend::from_config(&BackendConfig::default()).unwrap();
        assert_eq!(ollama.endpoint(), OLLAMA_DEFAULT_ENDPOINT);
        assert_eq!(ollama.name(), "ollama");

        let openai = ChatBackend::from_config(&BackendConfig {
            provider: Provider::OpenAi,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(openai.endpoint(), OPENAI_DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let backend = ChatBackend::from_config(&BackendConfig {
            endpoint: Some("http://gpu-box:11434/".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(backend.endpoint(), "http://gpu-box:11434");
    }

    #[test]
    fn test_ollama_request_shape() {
        let messages = vec![ChatMessage {
            role: "user".into(),
            content: "hi".into(),
        }];
        let request = OllamaRequest {
            model: "gemma3",
            messages: &messages,
            stream: false,
            options: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gemma3");
        assert_eq!(json["stream"], false);
        assert!(json.get("options").is_none());
    }
}
