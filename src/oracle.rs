//! Oracle Client
//!
//! Thin HTTP wrappers around the supported LLM providers. The returned text
//! is untrusted: nothing coming back from an oracle is executed without
//! passing through the safety validator first.

use crate::config::LlmConfig;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// A text-generation oracle: prompt in, candidate SQL text out.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn generate(&self, prompt: &str, system_prompt: &str) -> Result<String>;

    fn model(&self) -> &str;
}

/// Build the configured provider. API keys come from the environment, never
/// from the config file.
pub fn create_oracle(config: &LlmConfig) -> Result<Box<dyn Oracle>> {
    let timeout = Duration::from_secs(config.timeout);
    match config.provider.as_str() {
        "anthropic" => {
            let api_key = std::env::var("ANTHROPIC_API_KEY")
                .map_err(|_| EngineError::Config("ANTHROPIC_API_KEY is not set".to_string()))?;
            Ok(Box::new(AnthropicOracle {
                client: reqwest::Client::new(),
                api_key,
                model: config
                    .model
                    .clone()
                    .unwrap_or_else(|| "claude-3-5-sonnet-20241022".to_string()),
                temperature: config.temperature,
                max_tokens: config.max_tokens,
                timeout,
            }))
        }
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| EngineError::Config("OPENAI_API_KEY is not set".to_string()))?;
            Ok(Box::new(OpenAiOracle {
                client: reqwest::Client::new(),
                api_key,
                model: config.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string()),
                temperature: config.temperature,
                max_tokens: config.max_tokens,
                timeout,
            }))
        }
        "ollama" => Ok(Box::new(OllamaOracle {
            client: reqwest::Client::new(),
            base_url: std::env::var("OLLAMA_HOST")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            model: config.model.clone().unwrap_or_else(|| "llama3.2".to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout,
        })),
        other => Err(EngineError::Config(format!("unknown LLM provider: {}", other))),
    }
}

/// Bound an oracle HTTP call by the configured timeout, so a hung provider
/// consumes one attempt instead of blocking the loop.
async fn bounded<F>(timeout: Duration, call: F) -> Result<reqwest::Response>
where
    F: std::future::Future<Output = std::result::Result<reqwest::Response, reqwest::Error>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => Err(EngineError::OracleTransport(e.to_string())),
        Err(_) => Err(EngineError::OracleTimeout(timeout.as_secs())),
    }
}

async fn response_json(response: reqwest::Response) -> Result<serde_json::Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        return Err(EngineError::OracleTransport(format!(
            "API error ({}): {}",
            status, body
        )));
    }
    response
        .json()
        .await
        .map_err(|e| EngineError::OracleTransport(format!("failed to parse response: {}", e)))
}

pub struct AnthropicOracle {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    timeout: Duration,
}

#[async_trait]
impl Oracle for AnthropicOracle {
    async fn generate(&self, prompt: &str, system_prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": system_prompt,
            "messages": [{"role": "user", "content": prompt}],
        });

        debug!("calling anthropic model {}", self.model);
        let request = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send();
        let response = bounded(self.timeout, request).await?;
        let payload = response_json(response).await?;

        payload["content"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                EngineError::OracleTransport(format!(
                    "no text content in response: {}",
                    payload
                ))
            })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

pub struct OpenAiOracle {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    timeout: Duration,
}

#[async_trait]
impl Oracle for OpenAiOracle {
    async fn generate(&self, prompt: &str, system_prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": prompt},
            ],
        });

        debug!("calling openai model {}", self.model);
        let request = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send();
        let response = bounded(self.timeout, request).await?;
        let payload = response_json(response).await?;

        if let Some(error) = payload.get("error") {
            return Err(EngineError::OracleTransport(format!("API error: {}", error)));
        }
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                EngineError::OracleTransport(format!("no content in response: {}", payload))
            })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

pub struct OllamaOracle {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    timeout: Duration,
}

#[async_trait]
impl Oracle for OllamaOracle {
    async fn generate(&self, prompt: &str, system_prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "prompt": format!("{}\n\n{}", system_prompt, prompt),
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        });

        debug!("calling ollama model {}", self.model);
        let request = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send();
        let response = bounded(self.timeout, request).await?;
        let payload = response_json(response).await?;

        payload["response"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                EngineError::OracleTransport(format!("no response field: {}", payload))
            })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;

    #[test]
    fn unknown_provider_is_a_config_error() {
        let config = LlmConfig {
            provider: "carrier-pigeon".to_string(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            create_oracle(&config),
            Err(EngineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn oracle_timeout_is_reported_as_such() {
        // A pending future stands in for a hung provider.
        let result = bounded(Duration::from_millis(10), std::future::pending()).await;
        assert!(matches!(result, Err(EngineError::OracleTimeout(_))));
    }
}
