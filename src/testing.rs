//! Scriptable provider double for unit tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::provider::{
    ExtractProvider, ProviderError, ProviderId, ProviderRequest, ProviderResponse,
    WARM_PING_INSTRUCTION,
};

/// A provider whose availability, latency, and responses are scripted.
pub struct MockProvider {
    id: ProviderId,
    available: bool,
    ping_ok: bool,
    delay: Option<Duration>,
    /// Scripted outcomes consumed per call; when exhausted, extraction
    /// succeeds with a default text.
    responses: Mutex<VecDeque<Result<String, String>>>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(id: ProviderId) -> Self {
        Self {
            id,
            available: true,
            ping_ok: true,
            delay: None,
            responses: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn ping_fails(mut self) -> Self {
        self.ping_ok = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn then_ok(self, text: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(text.to_string()));
        self
    }

    pub fn then_err(self, message: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    /// Number of extraction calls made (warm pings excluded).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ExtractProvider for MockProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn availability_hint(&self) -> String {
        format!("mock {} ({})", self.id, if self.available { "up" } else { "down" })
    }

    async fn extract(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        if request.instruction == WARM_PING_INSTRUCTION {
            return if self.ping_ok {
                Ok(ProviderResponse {
                    text: "ready".to_string(),
                    confidence: 1.0,
                    model: None,
                    metadata: HashMap::new(),
                })
            } else {
                Err(ProviderError::Invocation {
                    provider: self.id,
                    message: "ping refused".to_string(),
                })
            };
        }

        self.calls.fetch_add(1, Ordering::Relaxed);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.responses.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(text)) => Ok(ProviderResponse {
                text,
                confidence: 0.9,
                model: Some("mock-model".to_string()),
                metadata: HashMap::new(),
            }),
            Some(Err(message)) => Err(ProviderError::Invocation {
                provider: self.id,
                message,
            }),
            None => Ok(ProviderResponse {
                text: format!("{} extracted text", self.id),
                confidence: 0.9,
                model: Some("mock-model".to_string()),
                metadata: HashMap::new(),
            }),
        }
    }
}
