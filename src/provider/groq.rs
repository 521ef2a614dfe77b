//! Groq Vision provider.
//!
//! Uses Groq's OpenAI-compatible API with vision models. The fastest of the
//! AI providers; preferred for simple images and scanned pages.
//! Requires GROQ_API_KEY environment variable.
//!
//! Free tier limits:
//! - 1,000 requests per day
//! - Vision models: Llama 4 Scout (17B), Llama 4 Maverick (17B)
//!
//! Rate limiting:
//! - Set GROQ_DELAY_MS to configure delay between requests (default: 200ms)
//! - Automatically retries on 429 with exponential backoff
//! - Respects Retry-After header from API

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::retry::{apply_rate_delay, retry_on_rate_limit};
use super::{ExtractProvider, ProviderError, ProviderId, ProviderRequest, ProviderResponse};
use crate::config::GroqConfig;

/// Nominal confidence for Groq extractions; the API reports none.
const GROQ_CONFIDENCE: f32 = 0.88;

/// Groq provider using the OpenAI-compatible chat completions API.
pub struct GroqProvider {
    client: Client,
    api_key: Option<String>,
    model: String,
}

#[derive(Debug, Serialize)]
struct GroqApiRequest {
    model: String,
    messages: Vec<GroqMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct GroqMessage {
    role: String,
    content: Vec<GroqContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum GroqContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: GroqImageUrl },
}

#[derive(Debug, Serialize)]
struct GroqImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct GroqApiResponse {
    choices: Option<Vec<GroqChoice>>,
    error: Option<GroqApiError>,
}

#[derive(Debug, Deserialize)]
struct GroqChoice {
    message: GroqResponseMessage,
}

#[derive(Debug, Deserialize)]
struct GroqResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct GroqApiError {
    message: String,
}

impl GroqProvider {
    /// Create a new Groq provider from configuration.
    pub fn new(config: &GroqConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.request_timeout_secs))
                .build()
                .unwrap_or_default(),
            api_key: std::env::var("GROQ_API_KEY").ok(),
            model: config.model.clone(),
        }
    }

    /// Set the vision model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn invocation_error(&self, message: impl Into<String>) -> ProviderError {
        ProviderError::Invocation {
            provider: ProviderId::Groq,
            message: message.into(),
        }
    }
}

#[async_trait]
impl ExtractProvider for GroqProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Groq
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn availability_hint(&self) -> String {
        if self.api_key.is_none() {
            "GROQ_API_KEY not set. Get an API key from https://console.groq.com/\n\
             Free tier: 1,000 req/day with Llama 4 Scout vision"
                .to_string()
        } else {
            format!("Groq is available (model: {})", self.model)
        }
    }

    async fn extract(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            ProviderError::NotAvailable("GROQ_API_KEY not set".to_string())
        })?;

        let data = base64::engine::general_purpose::STANDARD.encode(request.bytes.as_slice());
        let data_url = format!("data:{};base64,{}", request.mime_type, data);

        let api_request = GroqApiRequest {
            model: self.model.clone(),
            messages: vec![GroqMessage {
                role: "user".to_string(),
                content: vec![
                    GroqContent::Text {
                        text: request.instruction.clone(),
                    },
                    GroqContent::ImageUrl {
                        image_url: GroqImageUrl { url: data_url },
                    },
                ],
            }],
            max_tokens: request.max_output_tokens,
            temperature: 0.1,
        };

        apply_rate_delay("GROQ_DELAY_MS", 200, "groq").await;

        let response = retry_on_rate_limit(ProviderId::Groq, || async {
            self.client
                .post("https://api.groq.com/openai/v1/chat/completions")
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

        let api_response: GroqApiResponse = response
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
            confidence: GROQ_CONFIDENCE,
            model: Some(self.model.clone()),
            metadata,
        })
    }
}
