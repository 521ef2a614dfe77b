//! Provider abstraction for document content extraction.
//!
//! Supports multiple extraction providers:
//! - Gemini: Google multimodal API, highest capability, handles native PDFs
//! - Groq: Vision API (Llama 4 Scout), fast extraction for images and scans
//! - DeepSeek: VLM API, high accuracy on complex or handwritten material
//! - Tesseract: Traditional OCR via command-line, local last resort

mod deepseek;
mod gemini;
mod groq;
pub mod retry;
mod tesseract;

pub use deepseek::DeepSeekProvider;
pub use gemini::GeminiProvider;
pub use groq::GroqProvider;
pub use tesseract::TesseractProvider;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::Config;

/// Instruction text sent by warm-up pings. Providers may special-case it.
pub const WARM_PING_INSTRUCTION: &str = "Reply with the single word: ready";

/// Smallest valid 1x1 PNG, used as the payload for warm-up pings.
pub const WARM_PING_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
    0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x62, 0xf8,
    0xcf, 0xc0, 0x00, 0x00, 0x00, 0x03, 0x00, 0x01, 0x9a, 0x60, 0xe1, 0xd5, 0x00, 0x00, 0x00,
    0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

/// Errors from extraction providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not available: {0}")]
    NotAvailable(String),

    #[error("{provider} invocation failed: {message}")]
    Invocation {
        provider: ProviderId,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_secs:?}s")]
    RateLimited {
        provider: ProviderId,
        retry_after_secs: Option<u64>,
    },

    #[error("{provider} timed out after {elapsed_ms}ms")]
    Timeout { provider: ProviderId, elapsed_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Available extraction provider identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// Google Gemini multimodal API.
    Gemini,
    /// Groq Vision API (Llama 4 Scout).
    Groq,
    /// DeepSeek VLM API.
    DeepSeek,
    /// Tesseract OCR via command-line.
    Tesseract,
}

impl ProviderId {
    /// Static priority order used for routing and fallback chains.
    /// Tesseract is last by policy: OCR is only reachable when no AI
    /// provider is configured or available.
    pub const PRIORITY: [ProviderId; 4] = [
        ProviderId::Gemini,
        ProviderId::Groq,
        ProviderId::DeepSeek,
        ProviderId::Tesseract,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Gemini => "gemini",
            ProviderId::Groq => "groq",
            ProviderId::DeepSeek => "deepseek",
            ProviderId::Tesseract => "tesseract",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gemini" => Some(ProviderId::Gemini),
            "groq" => Some(ProviderId::Groq),
            "deepseek" => Some(ProviderId::DeepSeek),
            "tesseract" | "ocr" => Some(ProviderId::Tesseract),
            _ => None,
        }
    }

    /// Whether this provider is an AI model (as opposed to traditional OCR).
    pub fn is_ai(&self) -> bool {
        !matches!(self, ProviderId::Tesseract)
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single extraction request: document bytes plus instructions.
///
/// Cheap to clone; the document bytes are shared read-only across
/// concurrent attempts.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Raw document bytes, shared across attempts.
    pub bytes: Arc<Vec<u8>>,
    /// MIME type of the document.
    pub mime_type: String,
    /// Instruction text for the provider (opaque to this engine).
    pub instruction: String,
    /// Maximum output tokens for model providers.
    pub max_output_tokens: u32,
}

impl ProviderRequest {
    pub fn new(bytes: Arc<Vec<u8>>, mime_type: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            instruction: instruction.into(),
            max_output_tokens: 8192,
        }
    }

    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = max;
        self
    }

    /// Minimal request used by the warm-session manager.
    pub fn warm_ping() -> Self {
        Self {
            bytes: Arc::new(WARM_PING_PNG.to_vec()),
            mime_type: "image/png".to_string(),
            instruction: WARM_PING_INSTRUCTION.to_string(),
            max_output_tokens: 16,
        }
    }
}

/// Normalized result of a provider invocation.
///
/// Every provider-specific response shape is adapted to this at the
/// boundary, so internal logic never branches on provider wire formats.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// Extracted text content.
    pub text: String,
    /// Confidence score (0.0 - 1.0).
    pub confidence: f32,
    /// Which model produced this result (e.g. "gemini-1.5-flash").
    pub model: Option<String>,
    /// Provider-reported metadata.
    pub metadata: HashMap<String, String>,
}

/// Trait for extraction providers.
///
/// Implementations must be thread-safe (Send + Sync) for use across tasks.
/// Object-safe to allow dynamic dispatch via Arc<dyn ExtractProvider>.
#[async_trait]
pub trait ExtractProvider: Send + Sync {
    /// Get the provider identity.
    fn id(&self) -> ProviderId;

    /// Check if this provider is available (API key set, binary installed).
    fn is_available(&self) -> bool;

    /// Get a description of what's needed to make this provider available.
    fn availability_hint(&self) -> String;

    /// Run extraction on a document.
    async fn extract(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Issue a minimal request to warm up the provider's session.
    async fn warm_ping(&self) -> Result<(), ProviderError> {
        let request = ProviderRequest::warm_ping();
        self.extract(&request).await.map(|_| ())
    }
}

/// Registry holding one handle per configured provider.
///
/// Owned by the process; read-shared by the warm-session manager and the
/// execution engine.
#[derive(Default)]
pub struct ProviderPool {
    providers: Vec<Arc<dyn ExtractProvider>>,
}

impl ProviderPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pool from configuration, registering each enabled provider.
    pub fn from_config(config: &Config) -> Self {
        let mut pool = Self::new();
        if config.providers.gemini.enabled {
            pool.register(Arc::new(GeminiProvider::new(&config.providers.gemini)));
        }
        if config.providers.groq.enabled {
            pool.register(Arc::new(GroqProvider::new(&config.providers.groq)));
        }
        if config.providers.deepseek.enabled {
            pool.register(Arc::new(DeepSeekProvider::new(&config.providers.deepseek)));
        }
        if config.providers.tesseract.enabled {
            pool.register(Arc::new(TesseractProvider::new(&config.providers.tesseract)));
        }
        pool
    }

    /// Register a provider handle.
    pub fn register(&mut self, provider: Arc<dyn ExtractProvider>) {
        self.providers.push(provider);
    }

    /// Get a provider handle by identity.
    pub fn get(&self, id: ProviderId) -> Option<Arc<dyn ExtractProvider>> {
        self.providers.iter().find(|p| p.id() == id).cloned()
    }

    /// Whether a provider is registered in the pool.
    pub fn contains(&self, id: ProviderId) -> bool {
        self.providers.iter().any(|p| p.id() == id)
    }

    /// All registered provider identities, in registration order.
    pub fn ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    /// Registered providers that can actually run right now.
    pub fn available_ids(&self) -> Vec<ProviderId> {
        self.providers
            .iter()
            .filter(|p| p.is_available())
            .map(|p| p.id())
            .collect()
    }

    /// Whether any AI provider is registered and available.
    pub fn has_available_ai(&self) -> bool {
        self.providers
            .iter()
            .any(|p| p.id().is_ai() && p.is_available())
    }

    /// Best available AI provider, walking the static priority order.
    pub fn best_available_ai(&self) -> Option<ProviderId> {
        ProviderId::PRIORITY
            .iter()
            .copied()
            .filter(|id| id.is_ai())
            .find(|id| self.get(*id).is_some_and(|p| p.is_available()))
    }

    /// Iterate over registered provider handles.
    pub fn handles(&self) -> impl Iterator<Item = &Arc<dyn ExtractProvider>> {
        self.providers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_id_round_trip() {
        for id in ProviderId::PRIORITY {
            assert_eq!(ProviderId::from_str(id.as_str()), Some(id));
        }
        assert_eq!(ProviderId::from_str("ocr"), Some(ProviderId::Tesseract));
        assert_eq!(ProviderId::from_str("unknown"), None);
    }

    #[test]
    fn tesseract_is_last_in_priority() {
        assert_eq!(ProviderId::PRIORITY.last(), Some(&ProviderId::Tesseract));
        assert!(ProviderId::PRIORITY[..3].iter().all(|p| p.is_ai()));
    }

    #[test]
    fn empty_pool_has_no_ai() {
        let pool = ProviderPool::new();
        assert!(!pool.has_available_ai());
        assert_eq!(pool.best_available_ai(), None);
        assert!(pool.ids().is_empty());
    }
}
