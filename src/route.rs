//! Routing policy: classification plus availability in, ordered provider
//! preference list out.
//!
//! Pure decision logic; the only reads are the provider pool's availability
//! flags and the warm manager's atomic state. The static priority is
//! Gemini -> Groq -> DeepSeek -> Tesseract, and OCR is a last resort: it is
//! never placed ahead of an AI provider that could still be tried.

use std::sync::Arc;

use serde::Serialize;

use crate::classify::{Classification, Complexity};
use crate::provider::{ProviderId, ProviderPool};
use crate::warm::WarmSessionManager;

/// The outcome of routing one classified document.
///
/// Derived deterministically from a classification and current provider
/// availability; not persisted beyond the request.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub chosen_provider: ProviderId,
    /// Full ordered fallback chain, chosen provider first. Never contains
    /// a provider absent from the pool.
    pub candidate_order: Vec<ProviderId>,
    pub reason: String,
    /// Confidence 0.0 - 1.0.
    pub confidence: f32,
    /// Informational estimate for progress display, never correctness.
    pub estimated_seconds: f32,
}

/// Maps classifications to ordered provider preferences.
pub struct Router {
    pool: Arc<ProviderPool>,
    warm: Arc<WarmSessionManager>,
}

impl Router {
    pub fn new(pool: Arc<ProviderPool>, warm: Arc<WarmSessionManager>) -> Self {
        Self { pool, warm }
    }

    /// Route a classified document to an ordered provider preference list.
    pub fn route(&self, classification: &Classification) -> RoutingDecision {
        // Providers that are registered and can run right now, in static
        // priority order. When nothing is available we still return the
        // configured chain so every attempt gets recorded before the
        // aggregate failure surfaces.
        let mut candidates: Vec<ProviderId> = ProviderId::PRIORITY
            .iter()
            .copied()
            .filter(|id| self.pool.get(*id).is_some_and(|p| p.is_available()))
            .collect();
        if candidates.is_empty() {
            candidates = ProviderId::PRIORITY
                .iter()
                .copied()
                .filter(|id| self.pool.contains(*id))
                .collect();
        }

        let recommended = classification.recommended_provider;
        let any_ai = candidates.iter().any(|id| id.is_ai());

        let (chosen, reason) = if candidates.is_empty() {
            // Nothing registered at all; surface a decision that the engine
            // will immediately report as exhausted.
            (
                recommended,
                "no providers configured".to_string(),
            )
        } else if candidates.contains(&recommended) && (recommended.is_ai() || !any_ai) {
            (
                recommended,
                format!("classifier recommended {}", recommended),
            )
        } else {
            // Walk the static priority list. Tesseract only wins when no AI
            // provider is reachable.
            let walked = candidates
                .iter()
                .copied()
                .find(|id| id.is_ai())
                .unwrap_or(candidates[0]);
            (
                walked,
                format!(
                    "recommended {} unavailable, walked priority to {}",
                    recommended, walked
                ),
            )
        };

        let mut candidate_order = Vec::with_capacity(candidates.len());
        if candidates.contains(&chosen) || self.pool.contains(chosen) {
            candidate_order.push(chosen);
        }
        for id in candidates {
            if id != chosen {
                candidate_order.push(id);
            }
        }

        let mut confidence = f32::from(classification.confidence) / 100.0;
        if chosen != recommended {
            confidence = (confidence - 0.2).max(0.1);
        }

        let reason = if self.warm.is_warm(chosen) {
            format!("{} (warm)", reason)
        } else {
            reason
        };

        RoutingDecision {
            chosen_provider: chosen,
            estimated_seconds: Self::estimate_seconds(chosen, classification.complexity),
            candidate_order,
            reason,
            confidence,
        }
    }

    /// Estimated wall-clock seconds for one extraction. Base per-provider
    /// constant scaled by the complexity multiplier; purely informational.
    pub fn estimate_seconds(provider: ProviderId, complexity: Complexity) -> f32 {
        let base = match provider {
            ProviderId::Gemini => 8.0,
            ProviderId::Groq => 4.0,
            ProviderId::DeepSeek => 12.0,
            ProviderId::Tesseract => 20.0,
        };
        base * complexity.multiplier()
    }
}
