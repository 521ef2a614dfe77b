//! DeepSeek VLM provider.
//!
//! High-accuracy fallback for complex layouts and handwritten material.
//! Uses DeepSeek's OpenAI-compatible chat API with vision models.
//! Requires DEEPSEEK_API_KEY environment variable.
//!
//! Rate limiting:
//! - Set DEEPSEEK_DELAY_MS to configure delay between requests (default: 200ms)
//! - Automatically retries on 429 with exponential backoff

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::retry::{apply_rate_delay, retry_on_rate_limit};
use super::{ExtractProvider, ProviderError, ProviderId, ProviderRequest, ProviderResponse};
use crate::config::DeepSeekConfig;

/// Nominal confidence for DeepSeek extractions; the API reports none.
const DEEPSEEK_CONFIDENCE: f32 = 0.90;

/// DeepSeek provider using the OpenAI-compatible chat completions API.
pub struct DeepSeekProvider {
    client: Client,
    api_key: Option<String>,
    model: String,
}

#[derive(Debug, Serialize)]
struct DeepSeekApiRequest {
    model: String,
    messages: Vec<DeepSeekMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct DeepSeekMessage {
    role: String,
    content: Vec<DeepSeekContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum DeepSeekContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: DeepSeekImageUrl },
}

#[derive(Debug, Serialize)]
struct DeepSeekImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct DeepSeekApiResponse {
    choices: Option<Vec<DeepSeekChoice>>,
    error: Option<DeepSeekApiError>,
}

#[derive(Debug, Deserialize)]
struct DeepSeekChoice {
    message: DeepSeekResponseMessage,
}

#[derive(Debug, Deserialize)]
struct DeepSeekResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct DeepSeekApiError {
    message: String,
}

impl DeepSeekProvider {
    /// Create a new DeepSeek provider from configuration.
    pub fn new(config: &DeepSeekConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.request_timeout_secs))
                .build()
                .unwrap_or_default(),
            api_key: std::env::var("DEEPSEEK_API_KEY").ok(),
            model: config.model.clone(),
        }
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn invocation_error(&self, message: impl Into<String>) -> ProviderError {
        ProviderError::Invocation {
            provider: ProviderId::DeepSeek,
            message: message.into(),
        }
    }
}

#[async_trait]
impl ExtractProvider for DeepSeekProvider {
    fn id(&self) -> ProviderId {
        ProviderId::DeepSeek
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn availability_hint(&self) -> String {
        if self.api_key.is_none() {
            "DEEPSEEK_API_KEY not set. Get an API key from https://platform.deepseek.com/"
                .to_string()
        } else {
            format!("DeepSeek is available (model: {})", self.model)
        }
    }

    async fn extract(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            ProviderError::NotAvailable("DEEPSEEK_API_KEY not set".to_string())
        })?;

        let data = base64::engine::general_purpose::STANDARD.encode(request.bytes.as_slice());
        let data_url = format!("data:{};base64,{}", request.mime_type, data);

        let api_request = DeepSeekApiRequest {
            model: self.model.clone(),
            messages: vec![DeepSeekMessage {
                role: "user".to_string(),
                content: vec![
                    DeepSeekContent::Text {
                        text: request.instruction.clone(),
                    },
                    DeepSeekContent::ImageUrl {
                        image_url: DeepSeekImageUrl { url: data_url },
                    },
                ],
            }],
            max_tokens: request.max_output_tokens,
            temperature: 0.1,
        };

        apply_rate_delay("DEEPSEEK_DELAY_MS", 200, "deepseek").await;

        let response = retry_on_rate_limit(ProviderId::DeepSeek, || async {
            self.client
                .post("https://api.deepseek.com/chat/completions")
                .bearer_auth(api_key)
                .json(&api_request)
                .send()
                .await
                .map_err(|e| self.invocation_error(format!("HTTP request failed: {}", e)))
        })
        .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(self.invocation_error(format!("API error ({}): {}", status, body)));
        }

        let api_response: DeepSeekApiResponse = response
            .json()
            .await
            .map_err(|e| self.invocation_error(format!("Failed to parse response: {}", e)))?;

        if let Some(error) = api_response.error {
            return Err(self.invocation_error(format!("API error: {}", error.message)));
        }

        let text = api_response
            .choices
            .and_then(|c| c.into_iter().next())
            .map(|c| c.message.content)
            .unwrap_or_default();

        let mut metadata = HashMap::new();
        metadata.insert("model".to_string(), self.model.clone());

        Ok(ProviderResponse {
            text,
            confidence: DEEPSEEK_CONFIDENCE,
            model: Some(self.model.clone()),
            metadata,
        })
    }
}
