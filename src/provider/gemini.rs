//! Google Gemini multimodal provider.
//!
//! Highest-capability provider in the pool; the only one that accepts PDF
//! bytes directly, which makes it the fast path for native-text PDFs.
//! Requires GEMINI_API_KEY environment variable.
//!
//! Free tier limits (Gemini 1.5 Flash):
//! - 15 requests per minute
//! - 1,500 requests per day
//!
//! Rate limiting:
//! - Set GEMINI_DELAY_MS to configure delay between requests (default: 200ms)
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
use crate::config::GeminiConfig;

/// Nominal confidence for Gemini extractions; the API reports none.
const GEMINI_CONFIDENCE: f32 = 0.92;

/// Gemini provider using Google's Generative AI API.
pub struct GeminiProvider {
    client: Client,
    api_key: Option<String>,
    model: String,
}

#[derive(Debug, Serialize)]
struct GeminiApiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    InlineData { inline_data: GeminiInlineData },
}

#[derive(Debug, Serialize)]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiApiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiApiError>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiResponseContent,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiApiError {
    message: String,
}

impl GeminiProvider {
    /// Create a new Gemini provider from configuration.
    pub fn new(config: &GeminiConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.request_timeout_secs))
                .build()
                .unwrap_or_default(),
            api_key: std::env::var("GEMINI_API_KEY").ok(),
            model: config.model.clone(),
        }
    }

    /// Set the model (e.g. "gemini-1.5-flash", "gemini-1.5-pro").
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn invocation_error(&self, message: impl Into<String>) -> ProviderError {
        ProviderError::Invocation {
            provider: ProviderId::Gemini,
            message: message.into(),
        }
    }
}

#[async_trait]
impl ExtractProvider for GeminiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn availability_hint(&self) -> String {
        if self.api_key.is_none() {
            "GEMINI_API_KEY not set. Get an API key from https://ai.google.dev/\n\
             Free tier: 15 req/min, 1,500 req/day with Gemini 1.5 Flash"
                .to_string()
        } else {
            format!("Gemini is available (model: {})", self.model)
        }
    }

    async fn extract(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            ProviderError::NotAvailable("GEMINI_API_KEY not set".to_string())
        })?;

        let data = base64::engine::general_purpose::STANDARD.encode(request.bytes.as_slice());

        let api_request = GeminiApiRequest {
            contents: vec![GeminiContent {
                parts: vec![
                    GeminiPart::Text {
                        text: request.instruction.clone(),
                    },
                    GeminiPart::InlineData {
                        inline_data: GeminiInlineData {
                            mime_type: request.mime_type.clone(),
                            data,
                        },
                    },
                ],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: 0.1,
                max_output_tokens: request.max_output_tokens,
            },
        };

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, api_key
        );

        apply_rate_delay("GEMINI_DELAY_MS", 200, "gemini").await;

        let response = retry_on_rate_limit(ProviderId::Gemini, || async {
            self.client
                .post(&url)
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

        let api_response: GeminiApiResponse = response
            .json()
            .await
            .map_err(|e| self.invocation_error(format!("Failed to parse response: {}", e)))?;

        if let Some(error) = api_response.error {
            return Err(self.invocation_error(format!("API error: {}", error.message)));
        }

        let text = api_response
            .candidates
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.content.parts.into_iter().next())
            .and_then(|p| p.text)
            .unwrap_or_default();

        let mut metadata = HashMap::new();
        metadata.insert("model".to_string(), self.model.clone());

        Ok(ProviderResponse {
            text,
            confidence: GEMINI_CONFIDENCE,
            model: Some(self.model.clone()),
            metadata,
        })
    }
}
